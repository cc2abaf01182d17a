//! Bounded result queue for indexed transmission.

use crate::error::{Result, StreamError};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// What happened to a pushed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The queue was full; the item was dropped and the overflow recorded.
    Overflowed,
    /// The queue was closed; the item was dropped.
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    /// Drops not yet reported to a consumer.
    overflowed: u64,
    closed: bool,
}

/// A bounded FIFO whose producer never blocks.
///
/// `push` drops the item and records an overflow when the queue is full.
/// `pop` returns queued items first, then reports pending overflow once as
/// [`StreamError::Overflow`], then blocks until an item arrives, the queue is
/// closed, or the timeout elapses.
pub struct BlockingResultQueue<T> {
    sink: usize,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> BlockingResultQueue<T> {
    pub fn new(sink: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sink,
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                overflowed: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) -> PushOutcome {
        let mut state = self.lock();
        let outcome = if state.closed {
            PushOutcome::Closed
        } else if state.items.len() >= self.capacity {
            state.overflowed += 1;
            PushOutcome::Overflowed
        } else {
            state.items.push_back(item);
            PushOutcome::Queued
        };
        drop(state);

        if outcome != PushOutcome::Closed {
            self.available.notify_one();
        }
        outcome
    }

    /// Take the oldest item, waiting up to `timeout`.
    ///
    /// A timeout too large to represent as a deadline waits until an item
    /// arrives or the queue is closed.
    pub fn pop(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.overflowed > 0 {
                let dropped = std::mem::take(&mut state.overflowed);
                return Err(StreamError::Overflow {
                    sink: self.sink,
                    dropped,
                });
            }
            if state.closed {
                return Err(StreamError::InstanceDestroyed);
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StreamError::Timeout { waited: timeout });
                    }
                    self.available
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0)
                }
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    /// Drop queued items and wake every waiter with `InstanceDestroyed`.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let dropped = state.items.len();
        state.items.clear();
        drop(state);
        self.available.notify_all();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BlockingResultQueue::new(0, 4);
        for i in 0..3 {
            assert_eq!(queue.push(i), PushOutcome::Queued);
        }
        assert_eq!(queue.len(), 3);
        for i in 0..3 {
            assert_eq!(queue.pop(Duration::from_millis(10)).unwrap(), i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_never_blocks_producer() {
        let queue = BlockingResultQueue::new(2, 3);
        let outcomes: Vec<_> = (0..5).map(|i| queue.push(i)).collect();
        assert_eq!(&outcomes[..3], &[PushOutcome::Queued; 3]);
        assert_eq!(&outcomes[3..], &[PushOutcome::Overflowed; 2]);

        for i in 0..3 {
            assert_eq!(queue.pop(Duration::ZERO).unwrap(), i);
        }
        match queue.pop(Duration::ZERO) {
            Err(StreamError::Overflow { sink, dropped }) => {
                assert_eq!(sink, 2);
                assert_eq!(dropped, 2);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
        // Reported once.
        assert!(queue.pop(Duration::from_millis(5)).unwrap_err().is_timeout());
    }

    #[test]
    fn test_pop_waits_for_push() {
        let queue = Arc::new(BlockingResultQueue::new(0, 1));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                queue.push("late");
            })
        };
        assert_eq!(queue.pop(Duration::from_secs(2)).unwrap(), "late");
        producer.join().unwrap();
    }

    #[test]
    fn test_close_wakes_waiter() {
        let queue = Arc::new(BlockingResultQueue::<u8>::new(0, 1));
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let err = queue.pop(Duration::from_secs(10)).unwrap_err();
                (err.kind(), start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(30));
        queue.close();

        let (kind, waited) = waiter.join().unwrap();
        assert_eq!(kind, ErrorKind::InstanceDestroyed);
        assert!(waited < Duration::from_secs(5));
        assert_eq!(queue.push(1), PushOutcome::Closed);
    }

    #[test]
    fn test_unbounded_timeout() {
        let queue = Arc::new(BlockingResultQueue::new(0, 2));
        queue.push(7);
        assert_eq!(queue.pop(Duration::MAX).unwrap(), 7);

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                queue.push(8);
            })
        };
        assert_eq!(queue.pop(Duration::MAX).unwrap(), 8);
        producer.join().unwrap();

        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop(Duration::MAX).unwrap_err().kind())
        };
        thread::sleep(Duration::from_millis(30));
        queue.close();
        assert_eq!(waiter.join().unwrap(), ErrorKind::InstanceDestroyed);
    }
}
