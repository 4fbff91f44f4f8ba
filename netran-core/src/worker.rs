//! Named worker threads with an explicit completion signal.
//!
//! The thread body's return value travels through a single-slot channel, so
//! waiting for a worker is a bounded `recv_timeout` rather than a poll on
//! thread liveness. A body that panics drops the sender, which the waiting
//! side observes as a disconnect.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use tracing::error;

use crate::error::PipelineError;

pub struct WorkerThread<T> {
    name: String,
    handle: Option<JoinHandle<()>>,
    done: Receiver<T>,
    finished: Option<T>,
}

impl<T: Send + 'static> WorkerThread<T> {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self, PipelineError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (done_tx, done_rx) = channel::bounded(1);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let outcome = body();
                // The receiver is gone only if the owner gave up waiting.
                let _ = done_tx.send(outcome);
            })?;

        Ok(Self {
            name: name.to_owned(),
            handle: Some(handle),
            done: done_rx,
            finished: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the body has returned or panicked.
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
            || !self.done.is_empty()
            || self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits up to `timeout` for the body to finish. The outcome is kept for
    /// [`WorkerThread::join`].
    pub fn wait(&mut self, timeout: Duration) -> Result<bool, PipelineError> {
        if self.finished.is_some() {
            return Ok(true);
        }
        match self.done.recv_timeout(timeout) {
            Ok(outcome) => {
                self.finished = Some(outcome);
                self.reap();
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                self.reap();
                Err(PipelineError::WorkerPanicked(self.name.clone()))
            }
        }
    }

    /// Waits up to `timeout` and returns the body's value. On timeout the
    /// thread is detached.
    pub fn join(mut self, timeout: Duration) -> Result<T, PipelineError> {
        if !self.wait(timeout)? {
            return Err(PipelineError::JoinTimeout {
                worker: self.name,
                timeout,
            });
        }
        self.finished
            .take()
            .ok_or(PipelineError::WorkerPanicked(self.name))
    }

    fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn join_returns_body_value() {
        let worker = WorkerThread::spawn("test-worker", || 41 + 1).unwrap();
        assert_eq!(worker.join(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn thread_carries_its_name() {
        let worker = WorkerThread::spawn("named-worker", || {
            thread::current().name().map(str::to_owned)
        })
        .unwrap();
        assert_eq!(
            worker.join(Duration::from_secs(5)).unwrap().as_deref(),
            Some("named-worker")
        );
    }

    #[test]
    fn join_times_out_on_running_body() {
        let release = Arc::new(AtomicBool::new(false));
        let worker = {
            let release = Arc::clone(&release);
            WorkerThread::spawn("slow-worker", move || {
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            })
            .unwrap()
        };

        let result = worker.join(Duration::from_millis(30));
        assert!(matches!(result, Err(PipelineError::JoinTimeout { .. })));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn panicking_body_is_reported() {
        let worker = WorkerThread::spawn("doomed-worker", || -> u32 { panic!("boom") }).unwrap();
        let result = worker.join(Duration::from_secs(5));
        assert!(matches!(
            result,
            Err(PipelineError::WorkerPanicked(name)) if name == "doomed-worker"
        ));
    }

    #[test]
    fn wait_keeps_outcome_for_join() {
        let mut worker = WorkerThread::spawn("early-worker", || "done").unwrap();
        assert!(worker.wait(Duration::from_secs(5)).unwrap());
        assert!(worker.is_finished());
        assert_eq!(worker.join(Duration::ZERO).unwrap(), "done");
    }
}
