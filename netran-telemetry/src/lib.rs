//! # netran telemetry
//!
//! Structured logging and Prometheus metrics for the pipeline workers.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;

pub use opentelemetry::KeyValue;
