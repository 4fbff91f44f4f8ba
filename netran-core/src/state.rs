//! State shared by the orchestrator and both workers.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::batch::CaptureBatch;
use crate::queue::{BatchQueue, PushError, QueueError};

/// Owned by the orchestrator, lent to both workers through an `Arc`.
pub struct SharedState {
    queue: BatchQueue,
    /// Pipeline-active flag: true while accounting consumes the queue.
    active: AtomicBool,
    debug_level: AtomicU8,
}

impl SharedState {
    pub fn new(queue_capacity: usize) -> Result<Self, QueueError> {
        Ok(Self {
            queue: BatchQueue::with_capacity(queue_capacity)?,
            active: AtomicBool::new(false),
            debug_level: AtomicU8::new(0),
        })
    }

    pub fn queue(&self) -> &BatchQueue {
        &self.queue
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn activate(&self) {
        self.queue
            .locked(|| self.active.store(true, Ordering::Release));
    }

    /// Clears the active flag under the queue lock. Once this returns, no
    /// [`SharedState::offer`] can queue another batch until reactivation.
    pub fn deactivate(&self) {
        self.queue
            .locked(|| self.active.store(false, Ordering::Release));
    }

    /// Queues `batch` if the pipeline is still active, checked under the
    /// queue lock.
    pub fn offer(&self, batch: CaptureBatch) -> Result<(), PushError> {
        self.queue
            .push_if(batch, || self.active.load(Ordering::Acquire))
    }

    pub fn debug_level(&self) -> u8 {
        self.debug_level.load(Ordering::Relaxed)
    }

    pub fn set_debug_level(&self, level: u8) -> u8 {
        self.debug_level.store(level, Ordering::Relaxed);
        level
    }
}
