//! ## netran-telemetry::logging
//! **Structured logging with tracing and OpenTelemetry key/values**
//!
//! Worker threads are named, so thread names are part of every line.

use opentelemetry::KeyValue;
use tracing::info_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. `RUST_LOG` overrides `default_directive`.
    pub fn init(default_directive: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_directive))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_span_events(FmtSpan::NONE)
            .try_init()
    }

    /// Emits a pipeline lifecycle event (start, stop, worker failure, ...).
    #[inline]
    pub fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!(
            "pipeline_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );
        let _entered = span.enter();
        tracing::info!(metadata = ?metadata, "Pipeline event: {event_type}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn logs_lifecycle_event() {
        EventLogger::log_event(
            "pipeline_started",
            vec![KeyValue::new("device", "eth0")],
        );
        assert!(logs_contain("Pipeline event: pipeline_started"));
        assert!(logs_contain("eth0"));
    }
}
