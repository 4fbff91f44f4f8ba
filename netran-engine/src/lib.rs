//! # netran engine
//!
//! Wires device lookup, the capture worker and the accounting worker into one
//! pipeline with ordered startup and dependency-ordered shutdown.

pub mod orchestrator;
pub mod report;
pub mod settings;

pub use orchestrator::Orchestrator;
pub use report::{PipelineStatistics, ShutdownReport};
pub use settings::PipelineSettings;

pub mod prelude {
    pub use super::{Orchestrator, PipelineSettings, PipelineStatistics, ShutdownReport};
}
