//! Per-domain watchers, the flusher thread and observer bookkeeping.

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

use super::event::translate;
use super::{
    EventQueue, IgnoreFilter, RootPaths, WatchDomain, WatchEvent, WatchObserver, WatchSettings,
};
use crate::error::{Error, Result};

/// Handle returned by [`WatchRegistry::attach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObserverId(u64);

/// Snapshot of the registry for debugging and the CLI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherState {
    /// Domains with a live watcher
    pub active: Vec<WatchDomain>,
    pub paths: RootPaths,
    /// Paths stored while no observer was attached
    pub pending: Option<RootPaths>,
    pub observers: usize,
    pub queue_len: usize,
    pub dropped_events: u64,
}

struct DomainWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

#[derive(Default)]
struct State {
    paths: RootPaths,
    pending: Option<RootPaths>,
    watchers: HashMap<WatchDomain, DomainWatcher>,
}

struct Inner {
    filter: IgnoreFilter,
    state: Mutex<State>,
    queue: Mutex<EventQueue>,
    wake: Condvar,
    observers: Mutex<Vec<(ObserverId, Arc<dyn WatchObserver>)>>,
    /// Live generation per domain; 0 means no watcher. Callbacks compare
    /// against this so a replaced watcher's late events are discarded.
    generations: [AtomicU64; 3],
    next_generation: AtomicU64,
    next_observer: AtomicU64,
    shutdown: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Watches the mods, mod-play and backup roots and fans batched events out
/// to observers.
///
/// Dropping the registry closes every watcher and stops the flusher thread.
pub struct WatchRegistry {
    inner: Arc<Inner>,
    flusher: Option<JoinHandle<()>>,
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new(WatchSettings::default())
    }
}

impl WatchRegistry {
    pub fn new(settings: WatchSettings) -> Self {
        let inner = Arc::new(Inner {
            filter: IgnoreFilter::with_patterns(&settings.ignore_patterns),
            state: Mutex::new(State::default()),
            queue: Mutex::new(EventQueue::new(&settings)),
            wake: Condvar::new(),
            observers: Mutex::new(Vec::new()),
            generations: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            next_generation: AtomicU64::new(0),
            next_observer: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let thread_inner = Arc::clone(&inner);
        let flusher = std::thread::Builder::new()
            .name("modvault-watch-flush".to_string())
            .spawn(move || thread_inner.run_flusher())
            .map_err(|e| tracing::error!("Could not start watch flusher thread: {}", e))
            .ok();

        Self { inner, flusher }
    }

    /// Merges `next` into the current roots.
    ///
    /// Nothing happens when no effective root changed. A single changed domain
    /// is rebuilt on its own; several changed domains rebuild everything.
    /// Without observers the paths are kept as pending until the first
    /// [`attach`](Self::attach).
    pub fn set_paths(&self, next: RootPaths) {
        self.inner.set_paths(next);
    }

    /// Starts watching `domain` if it has a root and someone is listening.
    /// Calling it again for an already watched root does nothing.
    pub fn enable(&self, domain: WatchDomain) -> Result<()> {
        let mut state = lock(&self.inner.state);
        if self.inner.observer_count() == 0 {
            tracing::debug!("enable({}) deferred: no observers attached", domain);
            return Ok(());
        }
        self.inner.build_one(&mut state, domain).map(|_| ())
    }

    /// Stops watching `domain`. Events still in flight from the old watcher
    /// are discarded once this returns.
    pub fn disable(&self, domain: WatchDomain) {
        let mut state = lock(&self.inner.state);
        self.inner.retire(&mut state, domain);
    }

    /// Closes every watcher.
    pub fn dispose_all(&self) {
        let mut state = lock(&self.inner.state);
        for domain in WatchDomain::ALL {
            self.inner.retire(&mut state, domain);
        }
    }

    pub fn state(&self) -> WatcherState {
        let (active, paths, pending) = {
            let state = lock(&self.inner.state);
            let mut active: Vec<_> = state.watchers.keys().copied().collect();
            active.sort();
            (active, state.paths.clone(), state.pending.clone())
        };
        let (queue_len, dropped_events) = {
            let queue = lock(&self.inner.queue);
            (queue.len(), queue.dropped())
        };
        WatcherState {
            active,
            paths,
            pending,
            observers: self.inner.observer_count(),
            queue_len,
            dropped_events,
        }
    }

    /// Registers an observer. Attaching the same `Arc` twice returns the
    /// original id. Pending paths are applied on attach.
    pub fn attach(&self, observer: Arc<dyn WatchObserver>) -> ObserverId {
        self.inner.attach(observer)
    }

    /// Returns false if `id` was not attached.
    pub fn detach(&self, id: ObserverId) -> bool {
        self.inner.detach(id)
    }

    /// Calls `callback` with every batch until the subscription is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[WatchEvent]) + Send + Sync + 'static,
    {
        let id = self.attach(Arc::new(FnObserver(callback)));
        Subscription::new(&self.inner, id)
    }

    /// Batches as a channel. The observer closes itself once the receiver
    /// is dropped.
    pub fn channel(&self) -> (Subscription, Receiver<Vec<WatchEvent>>) {
        let (tx, rx) = mpsc::channel();
        let observer = Arc::new(ChannelObserver {
            tx,
            closed: AtomicBool::new(false),
        });
        let id = self.attach(observer);
        (Subscription::new(&self.inner, id), rx)
    }

    #[cfg(test)]
    fn inject(&self, event: WatchEvent) {
        self.inner.enqueue(std::iter::once(event), false);
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        {
            // Set under the queue lock so the flusher cannot miss the wakeup
            let _queue = lock(&self.inner.queue);
            self.inner.shutdown.store(true, Ordering::SeqCst);
        }
        self.inner.wake.notify_all();
        self.dispose_all();
        if let Some(handle) = self.flusher.take() {
            if handle.join().is_err() {
                tracing::error!("Watch flusher thread panicked");
            }
        }
    }
}

impl Inner {
    fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    fn set_paths(self: &Arc<Self>, next: RootPaths) {
        // Observers are counted under the state lock so a concurrent attach
        // either sees these paths as pending or runs after they were applied.
        let mut state = lock(&self.state);
        if self.observer_count() == 0 {
            let base = match state.pending.take() {
                Some(pending) => pending,
                None => state.paths.clone(),
            };
            state.pending = Some(base.merged(&next));
            tracing::debug!("No observers yet; watch paths stored as pending");
            return;
        }
        self.apply_paths(&mut state, next);
    }

    fn apply_paths(self: &Arc<Self>, state: &mut State, next: RootPaths) {
        let merged = state.paths.merged(&next);
        let changed = state.paths.changed_domains(&merged);
        state.paths = merged;

        match changed.as_slice() {
            [] => tracing::debug!("Watch paths unchanged; no rebuild"),
            [domain] => {
                tracing::info!("Watch root for {} changed; rebuilding it", domain);
                self.rebuild(state, &[*domain]);
            }
            _ => {
                tracing::info!("Watch roots changed for {:?}; rebuilding all", changed);
                self.rebuild(state, &WatchDomain::ALL);
            }
        }
    }

    fn rebuild(self: &Arc<Self>, state: &mut State, domains: &[WatchDomain]) {
        for domain in domains {
            self.retire(state, *domain);
        }
        for domain in domains {
            if let Err(e) = self.build_one(state, *domain) {
                tracing::warn!("Could not watch {}: {}", domain, e);
            }
        }
        self.enqueue(domains.iter().map(|d| WatchEvent::refresh(*d)), true);
    }

    /// Returns true if a new watcher was started.
    fn build_one(self: &Arc<Self>, state: &mut State, domain: WatchDomain) -> Result<bool> {
        let Some(root) = state.paths.get(domain).map(Path::to_path_buf) else {
            self.retire(state, domain);
            tracing::debug!("No root for {}; watcher disabled", domain);
            return Ok(false);
        };

        if state.watchers.get(&domain).is_some_and(|w| w.root == root) {
            tracing::debug!("Watcher for {} already on {}", domain, root.display());
            return Ok(false);
        }
        self.retire(state, domain);

        if !root.is_dir() {
            return Err(Error::Watch(format!(
                "{} root does not exist: {}",
                domain,
                root.display()
            )));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(self);
        let callback_root = root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<notify::Event>| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_raw(domain, generation, &callback_root, result);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| Error::Watch(format!("Failed to create watcher for {}: {}", domain, e)))?;

        self.generations[domain.index()].store(generation, Ordering::SeqCst);
        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            self.generations[domain.index()].store(0, Ordering::SeqCst);
            return Err(Error::Watch(format!(
                "Failed to watch {}: {}",
                root.display(),
                e
            )));
        }

        tracing::info!("Watching {} at {}", domain, root.display());
        state.watchers.insert(
            domain,
            DomainWatcher {
                root,
                _watcher: watcher,
            },
        );
        Ok(true)
    }

    fn retire(&self, state: &mut State, domain: WatchDomain) {
        self.generations[domain.index()].store(0, Ordering::SeqCst);
        if let Some(old) = state.watchers.remove(&domain) {
            tracing::debug!("Closed watcher for {} at {}", domain, old.root.display());
        }
    }

    fn handle_raw(
        &self,
        domain: WatchDomain,
        generation: u64,
        root: &Path,
        result: notify::Result<notify::Event>,
    ) {
        if self.generations[domain.index()].load(Ordering::SeqCst) != generation {
            tracing::trace!("Discarding event from retired {} watcher", domain);
            return;
        }

        match result {
            Ok(event) => {
                let events = translate(&event.kind, event.paths)
                    .into_iter()
                    .filter(|(_, path)| !self.filter.should_ignore_under(root, path))
                    .map(|(kind, path)| WatchEvent::new(domain, kind, path));
                self.enqueue(events, false);
            }
            Err(e) => {
                tracing::warn!("Watcher error on {}: {}", domain, e);
                self.enqueue(std::iter::once(WatchEvent::refresh(domain)), true);
            }
        }
    }

    fn enqueue(&self, events: impl IntoIterator<Item = WatchEvent>, urgent: bool) {
        let now = Instant::now();
        let mut queued = false;
        {
            let mut queue = lock(&self.queue);
            for event in events {
                if urgent {
                    queue.push_urgent(event, now);
                } else {
                    queue.push(event, now);
                }
                queued = true;
            }
        }
        if queued {
            self.wake.notify_all();
        }
    }

    fn run_flusher(&self) {
        loop {
            let batch = {
                let mut queue = lock(&self.queue);
                loop {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    let now = Instant::now();
                    if queue.is_due(now) {
                        break queue.take_batch(now);
                    }
                    queue = match queue.deadline() {
                        Some(deadline) => {
                            let timeout = deadline.saturating_duration_since(now);
                            match self.wake.wait_timeout(queue, timeout) {
                                Ok((guard, _)) => guard,
                                Err(poisoned) => poisoned.into_inner().0,
                            }
                        }
                        None => self
                            .wake
                            .wait(queue)
                            .unwrap_or_else(|poisoned| poisoned.into_inner()),
                    };
                }
            };
            self.deliver(&batch);
        }
    }

    fn deliver(&self, batch: &[WatchEvent]) {
        if batch.is_empty() {
            return;
        }

        let observers: Vec<Arc<dyn WatchObserver>> = {
            let mut observers = lock(&self.observers);
            observers.retain(|(id, observer)| {
                let closed = observer.is_closed();
                if closed {
                    tracing::debug!("Pruning closed observer {:?}", id);
                }
                !closed
            });
            observers.iter().map(|(_, o)| Arc::clone(o)).collect()
        };

        tracing::trace!(
            "Delivering {} events to {} observers",
            batch.len(),
            observers.len()
        );
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_batch(batch))).is_err() {
                tracing::error!("Watch observer panicked while handling a batch");
            }
        }
    }

    fn attach(self: &Arc<Self>, observer: Arc<dyn WatchObserver>) -> ObserverId {
        // Lock order: state, then observers
        let mut state = lock(&self.state);
        let id = {
            let mut observers = lock(&self.observers);
            if let Some((id, _)) = observers.iter().find(|(_, o)| same_observer(o, &observer)) {
                tracing::debug!("Observer already attached as {:?}", id);
                return *id;
            }
            let id = ObserverId(self.next_observer.fetch_add(1, Ordering::SeqCst) + 1);
            observers.push((id, observer));
            id
        };

        if let Some(pending) = state.pending.take() {
            tracing::info!("Applying pending watch paths");
            self.apply_paths(&mut state, pending);
        }
        id
    }

    fn detach(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }
}

fn same_observer(a: &Arc<dyn WatchObserver>, b: &Arc<dyn WatchObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Detaches its observer when dropped.
pub struct Subscription {
    inner: Weak<Inner>,
    id: ObserverId,
    active: bool,
}

impl Subscription {
    fn new(inner: &Arc<Inner>, id: ObserverId) -> Self {
        Self {
            inner: Arc::downgrade(inner),
            id,
            active: true,
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

struct FnObserver<F>(F);

impl<F> WatchObserver for FnObserver<F>
where
    F: Fn(&[WatchEvent]) + Send + Sync,
{
    fn on_batch(&self, events: &[WatchEvent]) {
        (self.0)(events)
    }
}

struct ChannelObserver {
    tx: Sender<Vec<WatchEvent>>,
    closed: AtomicBool,
}

impl WatchObserver for ChannelObserver {
    fn on_batch(&self, events: &[WatchEvent]) {
        if self.tx.send(events.to_vec()).is_err() {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
