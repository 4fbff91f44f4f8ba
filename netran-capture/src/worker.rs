//! Capture worker: the producer half of the pipeline.
//!
//! While the pipeline-active flag is set the worker waits (bounded) for a free
//! queue slot, captures one batch and offers it to the queue. While the flag
//! is clear it keeps the capture primitive drained in discard mode, or idles,
//! depending on [`InactivePolicy`]. Any primitive failure ends the loop and is
//! handed back to [`CaptureWorker::stop`].

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use netran_core::queue::PushError;
use netran_core::{
    CaptureMode, CaptureParams, CapturePrimitive, CaptureStatus, Component, InactivePolicy,
    PipelineError, SharedState, StatsBoard, WorkerThread,
};
use netran_telemetry::{EventLogger, KeyValue, MetricsRecorder};
use tracing::{debug, error, info, trace, warn};

const THREAD_NAME: &str = "netran-capture";

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// Longest single wait on a full queue before re-checking the flags.
    pub wait_interval: Duration,
    /// Sleep between flag checks under [`InactivePolicy::Idle`].
    pub idle_interval: Duration,
    pub join_timeout: Duration,
    pub inactive_policy: InactivePolicy,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_secs(2),
            idle_interval: Duration::from_millis(50),
            join_timeout: Duration::from_secs(10),
            inactive_policy: InactivePolicy::Drain,
        }
    }
}

/// What the run loop did before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub batches_queued: u64,
    pub batches_discarded: u64,
    pub saturation_waits: u64,
}

/// Result of [`CaptureWorker::stop`]: the primitive's close status and the
/// run loop's outcome.
#[derive(Debug)]
pub struct CaptureStop {
    pub status: CaptureStatus,
    pub outcome: Result<CaptureReport, PipelineError>,
}

impl CaptureStop {
    pub fn is_clean(&self) -> bool {
        self.status.is_ok() && self.outcome.is_ok()
    }
}

struct CaptureExit<P> {
    primitive: P,
    outcome: Result<CaptureReport, PipelineError>,
}

enum Lifecycle<P> {
    Ready(P),
    Running(WorkerThread<CaptureExit<P>>),
    Stopped,
}

struct RunLoop {
    shared: Arc<SharedState>,
    enabled: Arc<AtomicBool>,
    settings: CaptureSettings,
    metrics: MetricsRecorder,
}

pub struct CaptureWorker<P: CapturePrimitive> {
    lifecycle: Lifecycle<P>,
    shared: Arc<SharedState>,
    enabled: Arc<AtomicBool>,
    settings: CaptureSettings,
    metrics: MetricsRecorder,
    board: StatsBoard,
}

impl<P: CapturePrimitive> CaptureWorker<P> {
    /// Opens `primitive` with `params`. No thread is started; a non-zero
    /// status from the primitive is returned as
    /// [`PipelineError::Initialization`].
    pub fn init(
        mut primitive: P,
        params: &CaptureParams,
        shared: Arc<SharedState>,
        settings: CaptureSettings,
        metrics: MetricsRecorder,
    ) -> Result<Self, PipelineError> {
        let status = primitive.open(params);
        if !status.is_ok() {
            error!(
                device = %params.device.name,
                code = status.code,
                message = %status.message,
                "capture initialization failed"
            );
            return Err(PipelineError::Initialization {
                component: Component::Capture,
                code: status.code,
                message: status.message,
            });
        }
        debug!(
            device = %params.device.name,
            snaplen = params.snaplen,
            buffer_size = params.buffer_size,
            "capture primitive opened"
        );

        Ok(Self {
            board: primitive.statistics(),
            lifecycle: Lifecycle::Ready(primitive),
            shared,
            enabled: Arc::new(AtomicBool::new(false)),
            settings,
            metrics,
        })
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        let primitive = match mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Ready(primitive) => primitive,
            Lifecycle::Running(thread) => {
                self.lifecycle = Lifecycle::Running(thread);
                return Err(PipelineError::AlreadyStarted(Component::Capture));
            }
            Lifecycle::Stopped => return Err(PipelineError::AlreadyStopped(Component::Capture)),
        };

        self.enabled.store(true, Ordering::Release);
        let run = RunLoop {
            shared: Arc::clone(&self.shared),
            enabled: Arc::clone(&self.enabled),
            settings: self.settings,
            metrics: self.metrics.clone(),
        };
        let thread = WorkerThread::spawn(THREAD_NAME, move || run.execute(primitive))?;
        self.lifecycle = Lifecycle::Running(thread);
        info!("capture worker started");
        Ok(())
    }

    /// Stops the run loop, waits for the thread and closes the primitive.
    ///
    /// Safe after the loop already died on a primitive failure; that failure
    /// is returned in [`CaptureStop::outcome`].
    pub fn stop(&mut self) -> CaptureStop {
        self.enabled.store(false, Ordering::Release);

        match mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Ready(mut primitive) => CaptureStop {
                status: primitive.close(),
                outcome: Ok(CaptureReport::default()),
            },
            Lifecycle::Running(thread) => match thread.join(self.settings.join_timeout) {
                Ok(CaptureExit {
                    mut primitive,
                    outcome,
                }) => {
                    if let Err(e) = &outcome {
                        warn!(error = %e, "capture loop had failed before stop");
                    }
                    let status = primitive.close();
                    if !status.is_ok() {
                        warn!(
                            code = status.code,
                            message = %status.message,
                            "capture close failed"
                        );
                    }
                    info!("capture worker stopped");
                    CaptureStop { status, outcome }
                }
                Err(e) => {
                    error!(error = %e, "capture worker did not exit cleanly");
                    CaptureStop {
                        status: CaptureStatus::failed(-1, e.to_string()),
                        outcome: Err(e),
                    }
                }
            },
            Lifecycle::Stopped => {
                let err = PipelineError::AlreadyStopped(Component::Capture);
                CaptureStop {
                    status: CaptureStatus::failed(-1, err.to_string()),
                    outcome: Err(err),
                }
            }
        }
    }

    /// Current primitive counters. Safe while the worker runs.
    pub fn statistics(&self) -> StatsBoard {
        self.board.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.lifecycle, Lifecycle::Running(thread) if !thread.is_finished())
    }

    /// Waits up to `timeout` for the run loop to exit. True if it has.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        match &mut self.lifecycle {
            // A panicked thread has exited too.
            Lifecycle::Running(thread) => thread.wait(timeout).unwrap_or(true),
            _ => true,
        }
    }
}

impl<P: CapturePrimitive> Drop for CaptureWorker<P> {
    fn drop(&mut self) {
        self.enabled.store(false, Ordering::Release);
    }
}

impl RunLoop {
    fn execute<P: CapturePrimitive>(self, mut primitive: P) -> CaptureExit<P> {
        let outcome = self.capture(&mut primitive);
        match &outcome {
            Ok(report) => debug!(
                queued = report.batches_queued,
                discarded = report.batches_discarded,
                saturation_waits = report.saturation_waits,
                "capture loop finished"
            ),
            Err(e) => {
                error!(error = %e, "capture loop terminated");
                self.metrics.record_worker_failure();
                EventLogger::log_event(
                    "worker_failed",
                    vec![
                        KeyValue::new("worker", THREAD_NAME),
                        KeyValue::new("error", e.to_string()),
                    ],
                );
            }
        }
        CaptureExit { primitive, outcome }
    }

    fn capture<P: CapturePrimitive>(
        &self,
        primitive: &mut P,
    ) -> Result<CaptureReport, PipelineError> {
        let mut report = CaptureReport::default();
        let queue = self.shared.queue();

        while self.enabled.load(Ordering::Acquire) {
            if !self.shared.is_active() {
                match self.settings.inactive_policy {
                    InactivePolicy::Drain => {
                        primitive
                            .capture_one(CaptureMode::Discard)
                            .map_err(PipelineError::Capture)?;
                        report.batches_discarded += 1;
                        self.metrics.record_discarded();
                    }
                    InactivePolicy::Idle => thread::sleep(self.settings.idle_interval),
                }
                continue;
            }

            // Only this thread pushes, so a free slot stays free until the
            // offer below.
            if !queue.wait_for_space(self.settings.wait_interval) {
                report.saturation_waits += 1;
                self.metrics.record_saturation();
                debug!(capacity = queue.capacity(), "batch queue saturated");
                continue;
            }

            let batch = primitive
                .capture_one(CaptureMode::Queue)
                .map_err(PipelineError::Capture)?;
            let blocks = batch.block_count();

            match self.shared.offer(batch) {
                Ok(()) => {
                    report.batches_queued += 1;
                    self.metrics.record_queued(queue.len());
                    if self.shared.debug_level() >= 2 {
                        trace!(blocks, depth = queue.len(), "batch queued");
                    }
                }
                Err(PushError::Gated(_)) => {
                    // Accounting paused between the capture and the offer.
                    report.batches_discarded += 1;
                    self.metrics.record_discarded();
                }
                Err(PushError::Full(_)) => {
                    warn!(blocks, "batch queue unexpectedly full, batch dropped");
                    report.batches_discarded += 1;
                    self.metrics.record_discarded();
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netran_core::testing::ScriptedCapture;
    use netran_core::DeviceInfo;
    use std::time::Instant;
    use tracing_test::traced_test;

    fn params() -> CaptureParams {
        CaptureParams {
            device: DeviceInfo::new("eth0"),
            buffer_size: 1 << 20,
            snaplen: 48,
            timeout: Duration::from_millis(100),
            promiscuous: true,
        }
    }

    fn settings() -> CaptureSettings {
        CaptureSettings {
            wait_interval: Duration::from_millis(20),
            idle_interval: Duration::from_millis(5),
            join_timeout: Duration::from_secs(5),
            inactive_policy: InactivePolicy::Drain,
        }
    }

    fn worker(
        capture: ScriptedCapture,
        shared: &Arc<SharedState>,
        settings: CaptureSettings,
    ) -> CaptureWorker<ScriptedCapture> {
        CaptureWorker::init(
            capture,
            &params(),
            Arc::clone(shared),
            settings,
            MetricsRecorder::new().unwrap(),
        )
        .unwrap()
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn init_failure_keeps_primitive_detail() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        let result = CaptureWorker::init(
            ScriptedCapture::new([]).failing_open(7, "no such device"),
            &params(),
            shared,
            settings(),
            MetricsRecorder::new().unwrap(),
        );
        match result {
            Err(PipelineError::Initialization {
                component,
                code,
                message,
            }) => {
                assert_eq!(component, Component::Capture);
                assert_eq!(code, 7);
                assert_eq!(message, "no such device");
            }
            _ => panic!("expected an initialization error"),
        }
    }

    #[test]
    fn inactive_pipeline_discards_everything() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        let mut worker = worker(ScriptedCapture::new([5, 5, 5]), &shared, settings());
        let stats = worker.statistics();
        worker.start().unwrap();

        wait_for(|| stats.get("discard_calls").unwrap_or(0) >= 5);
        assert!(shared.queue().is_empty());

        let stop = worker.stop();
        assert!(stop.is_clean());
        let report = stop.outcome.unwrap();
        assert_eq!(report.batches_queued, 0);
        assert!(report.batches_discarded >= 5);
        assert_eq!(stats.get("queue_calls"), None);
    }

    #[test]
    fn active_pipeline_queues_in_capture_order() {
        let shared = Arc::new(SharedState::new(16).unwrap());
        shared.activate();
        let mut worker = worker(ScriptedCapture::new([3, 1, 4]), &shared, settings());
        let stats = worker.statistics();
        worker.start().unwrap();

        wait_for(|| stats.get("scripted_batches") == Some(3));
        wait_for(|| shared.queue().len() >= 3);
        shared.deactivate();
        let stop = worker.stop();
        assert!(stop.is_clean());

        let counts: Vec<u32> = std::iter::from_fn(|| shared.queue().try_pop())
            .map(|batch| batch.block_count())
            .filter(|&n| n > 0)
            .collect();
        assert_eq!(counts, vec![3, 1, 4]);
    }

    #[test]
    fn full_queue_waits_instead_of_capturing() {
        let shared = Arc::new(SharedState::new(2).unwrap());
        shared.activate();
        let mut worker = worker(ScriptedCapture::new([1, 1, 1, 1]), &shared, settings());
        let stats = worker.statistics();
        worker.start().unwrap();

        wait_for(|| shared.queue().is_full());
        thread::sleep(Duration::from_millis(60));
        // Capture is never called while there is no room.
        assert_eq!(stats.get("queue_calls"), Some(2));

        shared.deactivate();
        let report = worker.stop().outcome.unwrap();
        assert_eq!(report.batches_queued, 2);
        assert!(report.saturation_waits >= 1);
        assert_eq!(shared.queue().len(), 2);
    }

    #[test]
    fn idle_policy_leaves_primitive_alone() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        let mut worker = worker(
            ScriptedCapture::new([]),
            &shared,
            CaptureSettings {
                inactive_policy: InactivePolicy::Idle,
                ..settings()
            },
        );
        let stats = worker.statistics();
        worker.start().unwrap();
        thread::sleep(Duration::from_millis(40));

        let stop = worker.stop();
        assert!(stop.is_clean());
        assert_eq!(stats.get("discard_calls"), None);
        assert_eq!(stats.get("queue_calls"), None);
    }

    #[traced_test]
    #[test]
    fn primitive_failure_ends_loop_and_surfaces_at_stop() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        let mut worker = worker(
            ScriptedCapture::new([]).fail_on_call(3),
            &shared,
            settings(),
        );
        worker.start().unwrap();
        assert!(worker.wait(Duration::from_secs(5)));
        assert!(!worker.is_running());

        let stop = worker.stop();
        assert!(stop.status.is_ok(), "close still runs after a failure");
        match stop.outcome {
            Err(PipelineError::Capture(err)) => assert_eq!(err.code, -1),
            other => panic!("expected capture failure, got {other:?}"),
        }
        assert_eq!(worker.statistics().get("closed"), Some(1));
        assert!(logs_contain("capture loop had failed before stop"));
    }

    #[test]
    fn second_stop_reports_already_stopped() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        let mut worker = worker(ScriptedCapture::new([]), &shared, settings());
        worker.start().unwrap();
        assert!(worker.stop().is_clean());

        let again = worker.stop();
        assert!(!again.status.is_ok());
        assert!(matches!(
            again.outcome,
            Err(PipelineError::AlreadyStopped(Component::Capture))
        ));
    }

    #[test]
    fn stop_without_start_closes_the_handle() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        let mut worker = worker(
            ScriptedCapture::new([]).failing_close(9, "close failed"),
            &shared,
            settings(),
        );
        let stop = worker.stop();
        assert_eq!(stop.status, CaptureStatus::failed(9, "close failed"));
        assert!(stop.outcome.is_ok());
        assert!(matches!(
            worker.start(),
            Err(PipelineError::AlreadyStopped(Component::Capture))
        ));
    }

    #[test]
    fn double_start_is_rejected() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        let mut worker = worker(ScriptedCapture::new([]), &shared, settings());
        worker.start().unwrap();
        assert!(matches!(
            worker.start(),
            Err(PipelineError::AlreadyStarted(Component::Capture))
        ));
        assert!(worker.stop().is_clean());
    }
}
