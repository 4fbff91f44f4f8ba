//! Bounded FIFO hand-off between the capture and accounting workers.
//!
//! One mutex/condition pair guards both ends. Every wait is bounded so callers
//! can re-check their own stop conditions between waits.
//!
//! Besides the single producer and single consumer, the drain in
//! `AccountingWorker::stop` also waits on the condition for the queue to run
//! empty. With three potential waiters a wake-one could be consumed by the
//! wrong party, so every state change wakes all waiters.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use crate::batch::CaptureBatch;

/// Capacity used by the pipeline unless configured otherwise.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid capacity (must be at least 1)")]
    InvalidCapacity,
}

/// A rejected push. The batch is handed back to the caller.
#[derive(Debug)]
pub enum PushError {
    /// The queue is at capacity.
    Full(CaptureBatch),
    /// The caller's gate was closed when checked under the queue lock.
    Gated(CaptureBatch),
}

impl PushError {
    pub fn into_batch(self) -> CaptureBatch {
        match self {
            PushError::Full(batch) | PushError::Gated(batch) => batch,
        }
    }
}

pub struct BatchQueue {
    slots: Mutex<VecDeque<CaptureBatch>>,
    changed: Condvar,
    capacity: usize,
}

impl BatchQueue {
    pub fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::InvalidCapacity);
        }
        Ok(Self {
            slots: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY))),
            changed: Condvar::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.lock().len() >= self.capacity
    }

    /// Pushes without waiting.
    pub fn try_push(&self, batch: CaptureBatch) -> Result<(), PushError> {
        self.push_if(batch, || true)
    }

    /// Pushes only if `gate` returns true while the queue lock is held.
    ///
    /// Paired with [`BatchQueue::locked`] this lets a flag be flipped and
    /// observed atomically with respect to pushes.
    pub fn push_if<G>(&self, batch: CaptureBatch, gate: G) -> Result<(), PushError>
    where
        G: FnOnce() -> bool,
    {
        let mut slots = self.slots.lock();
        if !gate() {
            return Err(PushError::Gated(batch));
        }
        if slots.len() >= self.capacity {
            return Err(PushError::Full(batch));
        }
        slots.push_back(batch);
        drop(slots);
        self.changed.notify_all();
        Ok(())
    }

    /// Waits up to `timeout` for room, then pushes.
    pub fn push_timeout(&self, batch: CaptureBatch, timeout: Duration) -> Result<(), PushError> {
        let mut slots = self.slots.lock();
        let capacity = self.capacity;
        if !self.wait_while(&mut slots, timeout, |s| s.len() >= capacity) {
            return Err(PushError::Full(batch));
        }
        slots.push_back(batch);
        drop(slots);
        self.changed.notify_all();
        Ok(())
    }

    /// Blocks until the batch is queued, re-checking every `poll`.
    pub fn push(&self, mut batch: CaptureBatch, poll: Duration) {
        loop {
            match self.push_timeout(batch, poll) {
                Ok(()) => return,
                Err(rejected) => {
                    tracing::debug!(capacity = self.capacity, "batch queue full, waiting");
                    batch = rejected.into_batch();
                }
            }
        }
    }

    /// Waits up to `timeout` until at least one slot is free.
    pub fn wait_for_space(&self, timeout: Duration) -> bool {
        let mut slots = self.slots.lock();
        let capacity = self.capacity;
        self.wait_while(&mut slots, timeout, |s| s.len() >= capacity)
    }

    pub fn try_pop(&self) -> Option<CaptureBatch> {
        let batch = self.slots.lock().pop_front();
        if batch.is_some() {
            self.changed.notify_all();
        }
        batch
    }

    /// Pops the oldest batch, waiting up to `timeout` while the queue is empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<CaptureBatch> {
        let mut slots = self.slots.lock();
        if !self.wait_while(&mut slots, timeout, VecDeque::is_empty) {
            return None;
        }
        let batch = slots.pop_front();
        drop(slots);
        self.changed.notify_all();
        batch
    }

    /// Waits up to `timeout` for the queue to become empty.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let mut slots = self.slots.lock();
        self.wait_while(&mut slots, timeout, |s| !s.is_empty())
    }

    /// Drops every queued batch and returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        let dropped = slots.len();
        slots.clear();
        drop(slots);
        if dropped > 0 {
            self.changed.notify_all();
        }
        dropped
    }

    /// Runs `f` while holding the queue lock.
    pub fn locked<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _slots = self.slots.lock();
        f()
    }

    /// Waits while `blocked` holds, for at most `timeout`. Returns true once
    /// `blocked` is false.
    fn wait_while<F>(
        &self,
        slots: &mut MutexGuard<'_, VecDeque<CaptureBatch>>,
        timeout: Duration,
        mut blocked: F,
    ) -> bool
    where
        F: FnMut(&VecDeque<CaptureBatch>) -> bool,
    {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while blocked(&**slots) {
                self.changed.wait(slots);
            }
            return true;
        };
        while blocked(&**slots) {
            if self.changed.wait_until(slots, deadline).timed_out() {
                return !blocked(&**slots);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{CaptureBatch, Datalink};
    use bytes::Bytes;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn test_batch(blocks: u32) -> CaptureBatch {
        CaptureBatch::new(Bytes::new(), 64, blocks, Datalink::ETHERNET)
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            BatchQueue::with_capacity(0),
            Err(QueueError::InvalidCapacity)
        ));
    }

    #[test]
    fn pops_in_push_order() {
        let queue = BatchQueue::with_capacity(8).unwrap();
        for blocks in [5, 12, 3] {
            queue.try_push(test_batch(blocks)).unwrap();
        }

        let popped: Vec<u32> = std::iter::from_fn(|| queue.try_pop())
            .map(|b| b.block_count())
            .collect();
        assert_eq!(popped, vec![5, 12, 3]);
    }

    #[test]
    fn signals_full_and_returns_batch() {
        let queue = BatchQueue::with_capacity(2).unwrap();
        queue.try_push(test_batch(1)).unwrap();
        queue.try_push(test_batch(2)).unwrap();

        match queue.try_push(test_batch(3)) {
            Err(PushError::Full(batch)) => assert_eq!(batch.block_count(), 3),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn closed_gate_rejects_push() {
        let queue = BatchQueue::with_capacity(2).unwrap();
        let result = queue.push_if(test_batch(1), || false);
        assert!(matches!(result, Err(PushError::Gated(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_times_out_on_empty_queue() {
        let queue = BatchQueue::with_capacity(2).unwrap();
        let started = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn pop_wakes_on_push() {
        let queue = Arc::new(BatchQueue::with_capacity(2).unwrap());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.try_push(test_batch(7)).unwrap();

        let popped = consumer.join().unwrap();
        assert_eq!(popped.map(|b| b.block_count()), Some(7));
    }

    #[test]
    fn full_queue_blocks_until_one_pop() {
        let queue = Arc::new(BatchQueue::with_capacity(DEFAULT_QUEUE_CAPACITY).unwrap());
        for i in 0..DEFAULT_QUEUE_CAPACITY {
            queue.try_push(test_batch(i as u32)).unwrap();
        }
        assert!(queue.is_full());

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                queue.push(test_batch(u32::MAX), Duration::from_millis(20));
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst), "push should block while full");
        assert_eq!(queue.len(), DEFAULT_QUEUE_CAPACITY);

        let first = queue.try_pop().unwrap();
        assert_eq!(first.block_count(), 0);
        producer.join().unwrap();

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.len(), DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn wait_until_empty_observes_drain() {
        let queue = Arc::new(BatchQueue::with_capacity(4).unwrap());
        for i in 0..3 {
            queue.try_push(test_batch(i)).unwrap();
        }
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                while queue.pop_timeout(Duration::from_millis(50)).is_some() {
                    thread::sleep(Duration::from_millis(5));
                }
            })
        };

        assert!(queue.wait_until_empty(Duration::from_secs(5)));
        consumer.join().unwrap();
    }

    #[test]
    fn clear_reports_dropped_batches() {
        let queue = BatchQueue::with_capacity(4).unwrap();
        queue.try_push(test_batch(1)).unwrap();
        queue.try_push(test_batch(2)).unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn length_never_exceeds_capacity_under_contention() {
        const CAPACITY: usize = 16;
        const TOTAL: u32 = 2_000;

        let queue = Arc::new(BatchQueue::with_capacity(CAPACITY).unwrap());
        let high_water = Arc::new(AtomicUsize::new(0));

        let producer = {
            let queue = Arc::clone(&queue);
            let high_water = Arc::clone(&high_water);
            thread::spawn(move || {
                for i in 0..TOTAL {
                    queue.push(test_batch(i), Duration::from_millis(10));
                    high_water.fetch_max(queue.len(), Ordering::SeqCst);
                }
            })
        };

        let mut received = Vec::with_capacity(TOTAL as usize);
        while received.len() < TOTAL as usize {
            if let Some(batch) = queue.pop_timeout(Duration::from_millis(100)) {
                high_water.fetch_max(queue.len(), Ordering::SeqCst);
                received.push(batch.block_count());
            }
        }
        producer.join().unwrap();

        assert!(high_water.load(Ordering::SeqCst) <= CAPACITY);
        assert_eq!(received, (0..TOTAL).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn fifo_law(counts in proptest::collection::vec(any::<u32>(), 0..256)) {
            let queue = BatchQueue::with_capacity(256).unwrap();
            for &count in &counts {
                queue.try_push(test_batch(count)).unwrap();
            }
            let popped: Vec<u32> = std::iter::from_fn(|| queue.try_pop())
                .map(|b| b.block_count())
                .collect();
            prop_assert_eq!(popped, counts);
        }

        #[test]
        fn bounded_invariant(capacity in 1usize..32, pushes in 0usize..64) {
            let queue = BatchQueue::with_capacity(capacity).unwrap();
            let mut accepted = 0;
            for i in 0..pushes {
                if queue.try_push(test_batch(i as u32)).is_ok() {
                    accepted += 1;
                }
                prop_assert!(queue.len() <= capacity);
            }
            prop_assert_eq!(accepted, pushes.min(capacity));
        }
    }
}
