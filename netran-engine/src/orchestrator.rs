//! Pipeline orchestrator: capture → bounded queue → accounting.
//!
//! Startup runs in creation order (capture init, accounting init, capture
//! thread, accounting thread). Shutdown runs in dependency order: accounting
//! stops first because its stop lowers the active flag and drains the queue,
//! then capture stops.

use std::sync::Arc;
use std::time::{Duration, Instant};

use netran_accounting::AccountingWorker;
use netran_capture::CaptureWorker;
use netran_core::{
    AccountingPrimitive, CapturePrimitive, DeviceInfo, DeviceLookup, PipelineError, SharedState,
};
use netran_telemetry::{EventLogger, KeyValue, MetricsRecorder};
use tracing::{debug, info, instrument, warn};

use crate::report::{PipelineStatistics, ShutdownReport};
use crate::settings::PipelineSettings;

pub struct Orchestrator<C: CapturePrimitive, A: AccountingPrimitive> {
    device: DeviceInfo,
    shared: Arc<SharedState>,
    capture: CaptureWorker<C>,
    accounting: AccountingWorker<A>,
    metrics: MetricsRecorder,
}

impl<C: CapturePrimitive, A: AccountingPrimitive> Orchestrator<C, A> {
    /// Resolves the device and opens both primitives. No thread runs yet.
    ///
    /// If accounting cannot be opened the already opened capture handle is
    /// closed again before the error is returned.
    #[instrument(skip_all, fields(device = settings.device.as_deref().unwrap_or("<default>")))]
    pub fn init<L>(
        settings: &PipelineSettings,
        lookup: &L,
        mut capture: C,
        mut accounting: A,
        metrics: MetricsRecorder,
    ) -> Result<Self, PipelineError>
    where
        L: DeviceLookup + ?Sized,
    {
        let device = lookup
            .find(settings.device.as_deref())
            .map_err(PipelineError::DeviceLookup)?
            .ok_or_else(|| {
                PipelineError::DeviceNotFound(
                    settings.device.clone().unwrap_or_else(|| "<default>".into()),
                )
            })?;
        info!(device = %device.name, "capture device resolved");

        let shared = Arc::new(SharedState::new(settings.queue_capacity)?);
        shared.set_debug_level(settings.debug_level);
        capture.set_debug_level(settings.debug_level);
        accounting.set_debug_level(settings.debug_level);

        let mut capture = CaptureWorker::init(
            capture,
            &settings.capture_params(device.clone()),
            Arc::clone(&shared),
            settings.capture,
            metrics.clone(),
        )?;

        let accounting = match AccountingWorker::init(
            accounting,
            &device,
            settings.destination,
            Arc::clone(&shared),
            settings.accounting,
            metrics.clone(),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                let closed = capture.stop();
                if !closed.status.is_ok() {
                    warn!(message = %closed.status.message, "capture close after failed init");
                }
                return Err(e);
            }
        };

        debug!(
            queue_capacity = settings.queue_capacity,
            destination = %settings.destination,
            "pipeline initialized"
        );
        Ok(Self {
            device,
            shared,
            capture,
            accounting,
            metrics,
        })
    }

    /// Starts the capture thread, then the accounting thread.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.capture.start()?;
        self.accounting.start()?;
        EventLogger::log_event(
            "pipeline_started",
            vec![
                KeyValue::new("device", self.device.name.clone()),
                KeyValue::new("queue_capacity", self.shared.queue().capacity() as i64),
            ],
        );
        Ok(())
    }

    /// Stops accounting (pause, drain, join, close), then capture.
    ///
    /// Never blocks on a worker that already died: its failure comes back in
    /// the report instead.
    #[instrument(skip_all, fields(device = %self.device.name))]
    pub fn stop(&mut self) -> ShutdownReport {
        let accounting = self.accounting.stop();
        let capture = self.capture.stop();
        let report = ShutdownReport {
            accounting,
            capture,
        };

        EventLogger::log_event(
            "pipeline_stopped",
            vec![
                KeyValue::new("device", self.device.name.clone()),
                KeyValue::new("clean", report.is_clean()),
            ],
        );
        report
    }

    pub fn statistics(&self) -> PipelineStatistics {
        PipelineStatistics {
            capture: self.capture.statistics().snapshot(),
            accounting: self.accounting.statistics().snapshot(),
        }
    }

    /// Both worker threads are alive.
    pub fn is_running(&self) -> bool {
        self.capture.is_running() && self.accounting.is_running()
    }

    /// Blocks until both worker threads have terminated or `timeout` elapses.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let capture_done = self.capture.wait(timeout);
        let remaining = deadline.saturating_duration_since(Instant::now());
        capture_done && self.accounting.wait(remaining)
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn state(&self) -> &SharedState {
        &self.shared
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netran_core::testing::{RecordingAccountant, ScriptedCapture, StaticDevices};
    use netran_core::Component;
    use tracing_test::traced_test;

    fn settings() -> PipelineSettings {
        let mut settings = PipelineSettings::default();
        settings.capture.wait_interval = Duration::from_millis(20);
        settings.accounting.wait_interval = Duration::from_millis(20);
        settings.accounting.grace_delay = Duration::from_millis(5);
        settings.accounting.drain_poll = Duration::from_millis(5);
        settings
    }

    #[test]
    fn unknown_device_is_reported() {
        let settings = PipelineSettings {
            device: Some("wlan9".into()),
            ..settings()
        };
        let result = Orchestrator::init(
            &settings,
            &StaticDevices::eth0(),
            ScriptedCapture::new([]),
            RecordingAccountant::new(),
            MetricsRecorder::new().unwrap(),
        );
        assert!(matches!(result, Err(PipelineError::DeviceNotFound(name)) if name == "wlan9"));
    }

    #[test]
    fn capture_init_failure_aborts_before_accounting() {
        let accountant = RecordingAccountant::new();
        let stats = accountant.statistics();
        let result = Orchestrator::init(
            &settings(),
            &StaticDevices::eth0(),
            ScriptedCapture::new([]).failing_open(3, "permission denied"),
            accountant,
            MetricsRecorder::new().unwrap(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::Initialization {
                component: Component::Capture,
                code: 3,
                ..
            })
        ));
        assert_eq!(stats.get("closed"), None);
    }

    #[test]
    fn accounting_init_failure_closes_capture() {
        let capture = ScriptedCapture::new([]);
        let stats = capture.statistics();
        let result = Orchestrator::init(
            &settings(),
            &StaticDevices::eth0(),
            capture,
            RecordingAccountant::new().failing_open(1),
            MetricsRecorder::new().unwrap(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::Initialization {
                component: Component::Accounting,
                ..
            })
        ));
        assert_eq!(stats.get("closed"), Some(1));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let settings = PipelineSettings {
            queue_capacity: 0,
            ..settings()
        };
        let result = Orchestrator::init(
            &settings,
            &StaticDevices::eth0(),
            ScriptedCapture::new([]),
            RecordingAccountant::new(),
            MetricsRecorder::new().unwrap(),
        );
        assert!(matches!(result, Err(PipelineError::Queue(_))));
    }

    #[test]
    fn metrics_follow_both_workers() {
        let accountant = RecordingAccountant::new();
        let recorded = accountant.recorded();
        let mut pipeline = Orchestrator::init(
            &settings(),
            &StaticDevices::eth0(),
            ScriptedCapture::new([3, 4]),
            accountant,
            MetricsRecorder::new().unwrap(),
        )
        .unwrap();
        pipeline.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while recorded.non_empty().len() < 2 {
            assert!(Instant::now() < deadline, "scripted batches not accounted");
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(pipeline.stop().is_clean());

        let metrics = pipeline.metrics();
        assert!(metrics.batches_queued.get() >= 2.0);
        assert!(metrics.batches_accounted.get() >= 2.0);
        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("netran_batches_accounted_total"));
    }

    #[traced_test]
    #[test]
    fn lifecycle_events_are_logged() {
        let mut pipeline = Orchestrator::init(
            &settings(),
            &StaticDevices::eth0(),
            ScriptedCapture::new([2, 2]),
            RecordingAccountant::new(),
            MetricsRecorder::new().unwrap(),
        )
        .unwrap();
        pipeline.start().unwrap();
        assert_eq!(pipeline.device().name, "eth0");

        let report = pipeline.stop();
        assert!(report.is_clean());
        assert!(logs_contain("Pipeline event: pipeline_started"));
        assert!(logs_contain("Pipeline event: pipeline_stopped"));
    }
}
