//! Filesystem watching for the managed roots.
//!
//! [`WatchRegistry`] keeps one recursive `notify` watcher per
//! [`WatchDomain`] and delivers filtered, batched [`WatchEvent`]s to attached
//! observers from a dedicated flusher thread.
//!
//! # Example
//!
//! ```rust,ignore
//! use modvault_core::watch::{RootPaths, WatchRegistry};
//!
//! let registry = WatchRegistry::default();
//! let (_subscription, rx) = registry.channel();
//! registry.set_paths(config.watch_paths());
//!
//! while let Ok(batch) = rx.recv() {
//!     for event in batch {
//!         println!("{} {:?} {:?}", event.domain, event.kind, event.path);
//!     }
//! }
//! ```

mod event;
mod filter;
mod queue;
mod registry;

pub use event::{RootPaths, WatchDomain, WatchEvent, WatchEventKind};
pub use filter::IgnoreFilter;
pub use queue::EventQueue;
pub use registry::{ObserverId, Subscription, WatchRegistry, WatcherState};

use std::time::Duration;

/// Default delay between the first queued event and delivery
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);
/// Default largest batch handed to observers
pub const DEFAULT_MAX_BATCH: usize = 25;
/// Default queue size at which the oldest events are dropped
pub const DEFAULT_QUEUE_CEILING: usize = 1000;

/// Tuning for a [`WatchRegistry`]
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub flush_interval: Duration,
    pub max_batch: usize,
    pub queue_ceiling: usize,
    /// Extra ignore patterns on top of the built-in ones
    pub ignore_patterns: Vec<String>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_batch: DEFAULT_MAX_BATCH,
            queue_ceiling: DEFAULT_QUEUE_CEILING,
            ignore_patterns: Vec::new(),
        }
    }
}

/// Receives batches of watch events.
///
/// Called from the registry's flusher thread; implementations should return
/// quickly.
pub trait WatchObserver: Send + Sync {
    fn on_batch(&self, events: &[WatchEvent]);

    /// A closed observer is dropped at the next delivery.
    fn is_closed(&self) -> bool {
        false
    }
}
