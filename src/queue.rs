//! Concurrent work queue with blocking pop and disable-and-drain
//!
//! Each pipeline owns one queue with many producers and a single consumer.
//! `push` never blocks (unbounded buffering); `disable` wakes every waiter
//! and lets subsequent pops drain the remaining items before reporting
//! empty. No ordering is guaranteed across producers.
//!
//! This is the only synchronization primitive the pipelines share state
//! through; there is no other mutable state between the writer and reader
//! loops.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    disabled: bool,
}

/// Thread-safe queue: many producers, one consumer, explicit shutdown.
#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    /// Create an empty, enabled queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                disabled: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue an item. Never blocks. Once the queue is disabled the item
    /// is silently dropped; the return value says whether it was accepted.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.disabled {
            return false;
        }
        state.items.push_back(item);
        self.available.notify_one();
        true
    }

    /// Block until an item is available (`Some`) or the queue is disabled
    /// and fully drained (`None`).
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.disabled {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Pop without blocking; `None` when currently empty.
    pub fn try_pop(&self) -> Option<T> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .items
            .pop_front()
    }

    /// Disable the queue: idempotent, wakes all waiters. Items already
    /// queued remain poppable until drained.
    pub fn disable(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.disabled = true;
        self.available.notify_all();
    }

    /// Whether `disable` has been called.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .disabled
    }

    /// Approximate number of queued items (diagnostic only).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .items
            .len()
    }

    /// Whether the queue currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_push_pop_single_thread() {
        let q = WorkQueue::new();
        assert!(q.push(1));
        assert!(q.push(2));
        assert_eq!(q.len(), 2);
        assert_eq!(q.wait_and_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_disabled_empty_pop_returns_none_promptly() {
        let q: WorkQueue<u32> = WorkQueue::new();
        q.disable();
        // must not block, ever
        assert_eq!(q.wait_and_pop(), None);
        assert_eq!(q.wait_and_pop(), None);
    }

    #[test]
    fn test_disable_drains_remaining_items() {
        let q = WorkQueue::new();
        q.push("a");
        q.push("b");
        q.disable();
        assert_eq!(q.wait_and_pop(), Some("a"));
        assert_eq!(q.wait_and_pop(), Some("b"));
        assert_eq!(q.wait_and_pop(), None);
    }

    #[test]
    fn test_push_after_disable_is_silently_dropped() {
        let q = WorkQueue::new();
        q.disable();
        assert!(!q.push(99));
        assert!(q.is_empty());
        assert_eq!(q.wait_and_pop(), None);
    }

    #[test]
    fn test_disable_wakes_blocked_consumer() {
        let q: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_and_pop())
        };
        thread::sleep(Duration::from_millis(50));
        q.disable();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_consumer_wakes_on_push() {
        let q: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_and_pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.push(7);
        assert_eq!(consumer.join().unwrap(), Some(7));
    }

    #[test]
    fn test_many_producers_one_consumer_counts() {
        let q: Arc<WorkQueue<u64>> = Arc::new(WorkQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..250 {
                        q.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        q.disable();
        let mut seen = 0;
        while q.wait_and_pop().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 1000);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: every item pushed before disable is drained
            /// exactly once (no loss, no duplication).
            #[test]
            fn prop_drain_preserves_all_items(items in prop::collection::vec(any::<u32>(), 0..500)) {
                let q = WorkQueue::new();
                for &it in &items {
                    q.push(it);
                }
                q.disable();
                let mut drained = Vec::new();
                while let Some(it) = q.wait_and_pop() {
                    drained.push(it);
                }
                // single producer: submission order preserved
                prop_assert_eq!(drained, items);
            }
        }
    }
}
