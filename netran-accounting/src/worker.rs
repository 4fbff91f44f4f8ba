//! Accounting worker: the consumer half of the pipeline.
//!
//! Entering the run loop clears the queue and raises the pipeline-active
//! flag, which is what makes the capture worker start queueing. Batches are
//! analyzed strictly in queue order. Stopping lowers the flag first and lets
//! the loop drain whatever is still queued before the thread is joined.

use std::mem;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use netran_core::{
    AccountingPrimitive, CaptureBatch, Component, DeviceInfo, PipelineError, SharedState,
    StatsBoard, WorkerThread,
};
use netran_telemetry::{EventLogger, KeyValue, MetricsRecorder};
use tracing::{debug, error, info, trace, warn};

const THREAD_NAME: &str = "netran-accounting";

#[derive(Debug, Clone, Copy)]
pub struct AccountingSettings {
    /// Longest single wait on an empty queue before re-checking the enable flag.
    pub wait_interval: Duration,
    /// Pause before lowering the active flag, letting an in-flight capture land.
    pub grace_delay: Duration,
    pub drain_poll: Duration,
    pub join_timeout: Duration,
}

impl Default for AccountingSettings {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_secs(2),
            grace_delay: Duration::from_millis(80),
            drain_poll: Duration::from_millis(50),
            join_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountingReport {
    pub batches_accounted: u64,
    pub blocks_accounted: u64,
    /// Largest block count seen in a single batch.
    pub max_block_count: u32,
}

#[derive(Debug)]
pub struct AccountingStop {
    /// Status returned by the primitive's close; 0 is success.
    pub close_code: i32,
    pub outcome: Result<AccountingReport, PipelineError>,
}

impl AccountingStop {
    pub fn is_clean(&self) -> bool {
        self.close_code == 0 && self.outcome.is_ok()
    }
}

struct AccountingExit<P> {
    primitive: P,
    outcome: Result<AccountingReport, PipelineError>,
}

enum Lifecycle<P> {
    Ready(P),
    Running(WorkerThread<AccountingExit<P>>),
    Stopped,
}

struct RunLoop {
    shared: Arc<SharedState>,
    enabled: Arc<AtomicBool>,
    wait_interval: Duration,
    metrics: MetricsRecorder,
}

pub struct AccountingWorker<P: AccountingPrimitive> {
    lifecycle: Lifecycle<P>,
    shared: Arc<SharedState>,
    enabled: Arc<AtomicBool>,
    settings: AccountingSettings,
    metrics: MetricsRecorder,
    board: StatsBoard,
}

impl<P: AccountingPrimitive> AccountingWorker<P> {
    /// Binds `primitive` to `device` and `destination`. Failure is returned
    /// immediately; without accounting there is no pipeline.
    pub fn init(
        mut primitive: P,
        device: &DeviceInfo,
        destination: IpAddr,
        shared: Arc<SharedState>,
        settings: AccountingSettings,
        metrics: MetricsRecorder,
    ) -> Result<Self, PipelineError> {
        let code = primitive.open(device, destination);
        if code != 0 {
            error!(device = %device.name, %destination, code, "accounting initialization failed");
            return Err(PipelineError::Initialization {
                component: Component::Accounting,
                code,
                message: format!(
                    "cannot account traffic on {} towards {destination}",
                    device.name
                ),
            });
        }

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
                return Err(PipelineError::AlreadyStarted(Component::Accounting));
            }
            Lifecycle::Stopped => {
                return Err(PipelineError::AlreadyStopped(Component::Accounting))
            }
        };

        self.enabled.store(true, Ordering::Release);
        let run = RunLoop {
            shared: Arc::clone(&self.shared),
            enabled: Arc::clone(&self.enabled),
            wait_interval: self.settings.wait_interval,
            metrics: self.metrics.clone(),
        };
        let thread = WorkerThread::spawn(THREAD_NAME, move || run.execute(primitive))?;
        self.lifecycle = Lifecycle::Running(thread);
        info!("accounting worker started");
        Ok(())
    }

    /// Ordered shutdown: grace delay, lower the active flag, wait for the
    /// queue to drain, stop the loop, join, close.
    pub fn stop(&mut self) -> AccountingStop {
        let thread = match mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(thread) => thread,
            Lifecycle::Ready(mut primitive) => {
                self.enabled.store(false, Ordering::Release);
                return AccountingStop {
                    close_code: primitive.close(),
                    outcome: Ok(AccountingReport::default()),
                };
            }
            Lifecycle::Stopped => {
                return AccountingStop {
                    close_code: -1,
                    outcome: Err(PipelineError::AlreadyStopped(Component::Accounting)),
                }
            }
        };

        thread::sleep(self.settings.grace_delay);
        self.shared.deactivate();
        self.drain(&thread);
        self.enabled.store(false, Ordering::Release);

        let joined = thread.join(self.settings.join_timeout);
        // The loop lowers the active flag on exit, so nothing lands after this.
        let late = self.shared.queue().clear();
        if late > 0 {
            warn!(late, "discarding batches queued while accounting was stopping");
        }

        match joined {
            Ok(AccountingExit {
                mut primitive,
                outcome,
            }) => {
                if let Err(e) = &outcome {
                    warn!(error = %e, "accounting loop had failed before stop");
                }
                let close_code = primitive.close();
                if close_code != 0 {
                    warn!(code = close_code, "accounting close failed");
                }
                info!("accounting worker stopped");
                AccountingStop {
                    close_code,
                    outcome,
                }
            }
            Err(e) => {
                error!(error = %e, "accounting worker did not exit cleanly");
                AccountingStop {
                    close_code: -1,
                    outcome: Err(e),
                }
            }
        }
    }

    /// Blocks until the run loop has emptied the queue. Batches left behind
    /// by a loop that already exited are dropped.
    fn drain(&self, thread: &WorkerThread<AccountingExit<P>>) {
        let queue = self.shared.queue();
        while !queue.wait_until_empty(self.settings.drain_poll) {
            if thread.is_finished() {
                let dropped = queue.clear();
                warn!(dropped, "accounting loop gone, discarding undrained batches");
                return;
            }
            trace!(depth = queue.len(), "waiting for accounting to drain the queue");
        }
    }

    pub fn statistics(&self) -> StatsBoard {
        self.board.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.lifecycle, Lifecycle::Running(thread) if !thread.is_finished())
    }

    /// Waits up to `timeout` for the run loop to exit. True if it has.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        match &mut self.lifecycle {
            Lifecycle::Running(thread) => thread.wait(timeout).unwrap_or(true),
            _ => true,
        }
    }
}

impl<P: AccountingPrimitive> Drop for AccountingWorker<P> {
    fn drop(&mut self) {
        self.enabled.store(false, Ordering::Release);
    }
}

impl RunLoop {
    fn execute<P: AccountingPrimitive>(self, mut primitive: P) -> AccountingExit<P> {
        let mut report = AccountingReport::default();
        let outcome = self.account(&mut primitive, &mut report).map(|()| report);
        debug!(max_block_count = report.max_block_count, "accounting loop finished");

        // Nobody consumes the queue any more; send capture into black-hole
        // mode. Also covers a stop that raced the activation above.
        self.shared.deactivate();

        if let Err(e) = &outcome {
            error!(error = %e, "accounting loop terminated");
            self.metrics.record_worker_failure();
            EventLogger::log_event(
                "worker_failed",
                vec![
                    KeyValue::new("worker", THREAD_NAME),
                    KeyValue::new("error", e.to_string()),
                ],
            );
        }
        AccountingExit { primitive, outcome }
    }

    fn account<P: AccountingPrimitive>(
        &self,
        primitive: &mut P,
        report: &mut AccountingReport,
    ) -> Result<(), PipelineError> {
        if !self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }
        let queue = self.shared.queue();
        let stale = queue.clear();
        if stale > 0 {
            debug!(stale, "dropped batches queued before accounting started");
        }
        self.shared.activate();

        while self.enabled.load(Ordering::Acquire) {
            let Some(batch) = queue.pop_timeout(self.wait_interval) else {
                continue;
            };
            self.analyze(primitive, &batch, report)?;
            self.metrics.record_accounted(batch.block_count(), queue.len());
        }
        Ok(())
    }

    fn analyze<P: AccountingPrimitive>(
        &self,
        primitive: &mut P,
        batch: &CaptureBatch,
        report: &mut AccountingReport,
    ) -> Result<(), PipelineError> {
        let blocks = batch.block_count();
        report.max_block_count = report.max_block_count.max(blocks);

        primitive
            .analyze(batch.buffer(), batch.block_size(), blocks, batch.datalink().0)
            .map_err(PipelineError::Accounting)?;

        report.batches_accounted += 1;
        report.blocks_accounted += u64::from(blocks);
        if self.shared.debug_level() >= 2 {
            trace!(blocks, "batch accounted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use netran_core::testing::RecordingAccountant;
    use netran_core::Datalink;
    use std::net::Ipv4Addr;
    use std::time::Instant;
    use tracing_test::traced_test;

    fn settings() -> AccountingSettings {
        AccountingSettings {
            wait_interval: Duration::from_millis(20),
            grace_delay: Duration::from_millis(5),
            drain_poll: Duration::from_millis(5),
            join_timeout: Duration::from_secs(5),
        }
    }

    fn destination() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(194, 244, 5, 206))
    }

    fn batch(blocks: u32) -> CaptureBatch {
        CaptureBatch::new(
            Bytes::from(vec![0u8; 64 * blocks as usize]),
            64,
            blocks,
            Datalink::ETHERNET,
        )
    }

    fn started(
        accountant: RecordingAccountant,
        shared: &Arc<SharedState>,
    ) -> AccountingWorker<RecordingAccountant> {
        let mut worker = AccountingWorker::init(
            accountant,
            &DeviceInfo::new("eth0"),
            destination(),
            Arc::clone(shared),
            settings(),
            MetricsRecorder::new().unwrap(),
        )
        .unwrap();
        worker.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !shared.is_active() {
            assert!(Instant::now() < deadline, "accounting never activated");
            thread::sleep(Duration::from_millis(1));
        }
        worker
    }

    #[test]
    fn init_failure_is_synchronous() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        let result = AccountingWorker::init(
            RecordingAccountant::new().failing_open(5),
            &DeviceInfo::new("eth0"),
            destination(),
            Arc::clone(&shared),
            settings(),
            MetricsRecorder::new().unwrap(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::Initialization {
                component: Component::Accounting,
                code: 5,
                ..
            })
        ));
        assert!(!shared.is_active());
    }

    #[test]
    fn start_clears_stale_batches() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        shared.queue().try_push(batch(9)).unwrap();

        let accountant = RecordingAccountant::new();
        let recorded = accountant.recorded();
        let mut worker = started(accountant, &shared);
        assert!(worker.stop().is_clean());
        assert!(recorded.all().is_empty());
    }

    #[test]
    fn accounts_in_fifo_order_and_tracks_max() {
        let shared = Arc::new(SharedState::new(16).unwrap());
        let accountant = RecordingAccountant::new();
        let recorded = accountant.recorded();
        let mut worker = started(accountant, &shared);

        for blocks in [5, 12, 3] {
            shared.offer(batch(blocks)).unwrap();
        }
        let stop = worker.stop();
        assert!(stop.is_clean());
        assert_eq!(recorded.all(), vec![5, 12, 3]);

        let report = stop.outcome.unwrap();
        assert_eq!(report.max_block_count, 12);
        assert_eq!(report.batches_accounted, 3);
        assert_eq!(report.blocks_accounted, 20);
        assert_eq!(worker.statistics().get("closed"), Some(1));
    }

    #[test]
    fn stop_drains_every_queued_batch() {
        let shared = Arc::new(SharedState::new(64).unwrap());
        let accountant = RecordingAccountant::new().with_pace(Duration::from_millis(2));
        let recorded = accountant.recorded();
        let mut worker = started(accountant, &shared);

        for blocks in 1..=40 {
            shared.offer(batch(blocks)).unwrap();
        }
        let stop = worker.stop();
        assert!(stop.is_clean());
        assert!(shared.queue().is_empty());
        assert!(!shared.is_active());
        assert_eq!(recorded.all(), (1..=40).collect::<Vec<_>>());
    }

    #[traced_test]
    #[test]
    fn failure_deactivates_pipeline_and_surfaces_at_stop() {
        let shared = Arc::new(SharedState::new(16).unwrap());
        let accountant = RecordingAccountant::new()
            .fail_on_call(2)
            .with_pace(Duration::from_millis(5));
        let mut worker = started(accountant, &shared);

        for blocks in [1, 2, 3, 4] {
            // Later offers may be gated once the loop has failed.
            let _ = shared.offer(batch(blocks));
        }
        assert!(worker.wait(Duration::from_secs(5)));
        assert!(!shared.is_active());

        let stop = worker.stop();
        assert_eq!(stop.close_code, 0);
        match stop.outcome {
            Err(PipelineError::Accounting(err)) => assert_eq!(err.code, -3),
            other => panic!("expected accounting failure, got {other:?}"),
        }
        assert!(shared.queue().is_empty());
        assert!(logs_contain("accounting loop had failed before stop"));
    }

    #[test]
    fn stop_racing_activation_leaves_pipeline_paused() {
        let quick = AccountingSettings {
            grace_delay: Duration::ZERO,
            ..settings()
        };
        for _ in 0..50 {
            let shared = Arc::new(SharedState::new(64).unwrap());
            let mut worker = AccountingWorker::init(
                RecordingAccountant::new(),
                &DeviceInfo::new("eth0"),
                destination(),
                Arc::clone(&shared),
                quick,
                MetricsRecorder::new().unwrap(),
            )
            .unwrap();

            let done = Arc::new(AtomicBool::new(false));
            let producer = {
                let shared = Arc::clone(&shared);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        let _ = shared.offer(batch(1));
                        thread::yield_now();
                    }
                })
            };

            worker.start().unwrap();
            assert!(worker.stop().is_clean());
            assert!(!shared.is_active());
            assert!(shared.queue().is_empty());

            done.store(true, Ordering::Release);
            producer.join().unwrap();
            assert!(shared.queue().is_empty());
        }
    }

    #[test]
    fn stop_twice_and_stop_before_start() {
        let shared = Arc::new(SharedState::new(4).unwrap());
        let mut idle = AccountingWorker::init(
            RecordingAccountant::new().failing_close(4),
            &DeviceInfo::new("eth0"),
            destination(),
            Arc::clone(&shared),
            settings(),
            MetricsRecorder::new().unwrap(),
        )
        .unwrap();
        let stop = idle.stop();
        assert_eq!(stop.close_code, 4);
        assert!(stop.outcome.is_ok());

        let mut worker = started(RecordingAccountant::new(), &shared);
        assert!(worker.stop().is_clean());
        assert!(matches!(
            worker.stop().outcome,
            Err(PipelineError::AlreadyStopped(Component::Accounting))
        ));
    }
}
