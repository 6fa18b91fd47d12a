//! Multi-lane priority work queue
//!
//! Schedules fixture processing across the worker pool. Items are placed in
//! one of three FIFO lanes and drained in strict priority order: every High
//! item is handed out before any Medium item, and every Medium before any
//! Low. There is no aging, so a continuous stream of High work can delay Low
//! work indefinitely. That is an accepted tradeoff: High is reserved for
//! fixtures that need immediate attention (restarts, in-running changes).
//!
//! Consumers wait on a single shared `Notify` while all lanes are empty.
//! A consumer registers as a waiter before it checks the lanes, so each
//! enqueue wakes a distinct waiter; a waiter also wakes on its own after
//! `max_blocking_wait` so that it re-checks cancellation even when producers
//! are silent.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::QueueConfig;

/// Priority lane of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingPriority {
    High,
    Medium,
    Low,
}

/// Per-lane item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl LaneCounts {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Thread-safe strict-priority queue with blocking consumption.
pub struct PriorityQueue<T> {
    high: Mutex<VecDeque<T>>,
    medium: Mutex<VecDeque<T>>,
    low: Mutex<VecDeque<T>>,
    signal: Notify,
    max_blocking_wait: Duration,
}

impl<T> PriorityQueue<T> {
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_max_blocking_wait(config.max_blocking_wait())
    }

    pub fn with_max_blocking_wait(max_blocking_wait: Duration) -> Self {
        Self {
            high: Mutex::new(VecDeque::new()),
            medium: Mutex::new(VecDeque::new()),
            low: Mutex::new(VecDeque::new()),
            signal: Notify::new(),
            max_blocking_wait,
        }
    }

    fn lane(&self, priority: ProcessingPriority) -> &Mutex<VecDeque<T>> {
        match priority {
            ProcessingPriority::High => &self.high,
            ProcessingPriority::Medium => &self.medium,
            ProcessingPriority::Low => &self.low,
        }
    }

    /// Add an item to its lane and wake one waiting consumer.
    ///
    /// Never blocks beyond the lane lock and never fails.
    pub fn enqueue(&self, item: T, priority: ProcessingPriority) {
        self.lane(priority).lock().push_back(item);
        self.signal.notify_one();
    }

    /// Take the next item in priority order without waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        if let Some(item) = self.high.lock().pop_front() {
            return Some(item);
        }
        if let Some(item) = self.medium.lock().pop_front() {
            return Some(item);
        }
        self.low.lock().pop_front()
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once `cancel` fires. While the lanes are empty the wait
    /// is re-armed every `max_blocking_wait`.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            // register as a waiter before re-checking the lanes so that an
            // enqueue in between wakes this consumer
            let notified = self.signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_dequeue() {
                return Some(item);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.max_blocking_wait) => {
                    trace!("priority queue wait window elapsed, re-checking");
                }
            }
        }
    }

    /// Lazy, unbounded stream of items that ends when `cancel` fires.
    ///
    /// Several consumers may drain the same queue concurrently; each item is
    /// delivered to exactly one of them.
    pub fn consume(&self, cancel: CancellationToken) -> impl Stream<Item = T> + '_ {
        stream::unfold((self, cancel), |(queue, cancel)| async move {
            let item = queue.dequeue(&cancel).await?;
            Some((item, (queue, cancel)))
        })
    }

    /// Whether any queued item matches `predicate`. O(n) over all lanes.
    pub fn contains(&self, predicate: impl Fn(&T) -> bool) -> bool {
        self.high.lock().iter().any(&predicate)
            || self.medium.lock().iter().any(&predicate)
            || self.low.lock().iter().any(&predicate)
    }

    pub fn lane_counts(&self) -> LaneCounts {
        LaneCounts {
            high: self.high.lock().len(),
            medium: self.medium.lock().len(),
            low: self.low.lock().len(),
        }
    }

    /// Total queued items; advisory under concurrent mutation.
    pub fn len(&self) -> usize {
        self.lane_counts().total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

impl<T> fmt::Display for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.lane_counts();
        write!(
            f,
            "PriorityQueue items High: {} Medium: {} Low: {}",
            counts.high, counts.medium, counts.low
        )
    }
}
