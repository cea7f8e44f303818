//! Bounded batching queue between watcher callbacks and observers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::{WatchEvent, WatchSettings};

/// Pending watch events and the flush schedule.
///
/// The queue never holds more than `queue_ceiling` events: at the ceiling the
/// oldest quarter (rounded up) is dropped. It becomes due either
/// `flush_interval` after the first event was queued, or immediately once
/// `max_batch` events are waiting or a refresh was queued.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<WatchEvent>,
    max_batch: usize,
    ceiling: usize,
    interval: Duration,
    deadline: Option<Instant>,
    urgent: bool,
    dropped: u64,
}

impl EventQueue {
    pub fn new(settings: &WatchSettings) -> Self {
        Self {
            events: VecDeque::new(),
            max_batch: settings.max_batch.max(1),
            ceiling: settings.queue_ceiling.max(1),
            interval: settings.flush_interval,
            deadline: None,
            urgent: false,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total events dropped at the ceiling so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Queues a change. A repeat of the last queued change only updates its
    /// timestamp.
    pub fn push(&mut self, event: WatchEvent, now: Instant) {
        if let Some(last) = self.events.back_mut() {
            if last.same_change(&event) {
                last.at = event.at;
                return;
            }
        }

        if self.events.len() >= self.ceiling {
            let drop = self.events.len().div_ceil(4);
            self.events.drain(..drop);
            self.dropped += drop as u64;
            tracing::warn!(
                "Watch queue reached {} events; dropped {} oldest",
                self.ceiling,
                drop
            );
        }

        self.events.push_back(event);

        if self.events.len() >= self.max_batch {
            self.urgent = true;
        } else if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    /// Queues an event that must go out without waiting for the timer.
    pub fn push_urgent(&mut self, event: WatchEvent, now: Instant) {
        self.push(event, now);
        self.urgent = true;
    }

    /// True if a batch should be delivered at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        !self.events.is_empty() && (self.urgent || self.deadline.is_some_and(|d| now >= d))
    }

    /// When the queue becomes due on its own, if ever.
    pub fn deadline(&self) -> Option<Instant> {
        if self.events.is_empty() {
            None
        } else if self.urgent {
            Some(Instant::now())
        } else {
            self.deadline
        }
    }

    /// Removes up to `max_batch` of the oldest events.
    ///
    /// Whatever remains is rescheduled: immediately if another full batch is
    /// waiting, otherwise one interval from `now`.
    pub fn take_batch(&mut self, now: Instant) -> Vec<WatchEvent> {
        let count = self.events.len().min(self.max_batch);
        let batch: Vec<WatchEvent> = self.events.drain(..count).collect();

        let remaining_refresh = self.events.iter().any(WatchEvent::is_refresh);
        self.urgent = self.events.len() >= self.max_batch || remaining_refresh;
        self.deadline = (!self.events.is_empty()).then(|| now + self.interval);
        batch
    }

    /// Drops everything without delivering it.
    pub fn clear(&mut self) {
        self.events.clear();
        self.deadline = None;
        self.urgent = false;
    }
}
