use netran_accounting::AccountingStop;
use netran_capture::CaptureStop;
use netran_core::Counters;
use serde::Serialize;

/// Per-worker results of [`crate::Orchestrator::stop`], in shutdown order.
#[derive(Debug)]
pub struct ShutdownReport {
    pub accounting: AccountingStop,
    pub capture: CaptureStop,
}

impl ShutdownReport {
    /// Both handles closed cleanly and neither loop failed.
    pub fn is_clean(&self) -> bool {
        self.accounting.is_clean() && self.capture.is_clean()
    }
}

/// Counter snapshots of both primitives.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStatistics {
    pub capture: Counters,
    pub accounting: Counters,
}
