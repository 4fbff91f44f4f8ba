//! # netran-core
//!
//! Shared building blocks for the capture → accounting pipeline.
//!
//! ### Key Submodules:
//! - `batch`: immutable capture batches and their block layout
//! - `queue`: bounded FIFO hand-off guarded by one mutex/condition pair
//! - `state`: queue plus the atomic pipeline-active flag
//! - `primitive`: contracts for the capture, accounting and device collaborators
//! - `worker`: named threads with a completion signal and bounded join

pub mod batch;
pub mod device;
pub mod error;
pub mod primitive;
pub mod queue;
pub mod state;
pub mod stats;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub mod prelude {
    pub use crate::batch::*;
    pub use crate::device::*;
    pub use crate::error::*;
    pub use crate::primitive::*;
    pub use crate::queue::*;
    pub use crate::state::*;
    pub use crate::stats::*;
    pub use crate::worker::*;
}

pub use batch::{BatchBuilder, CaptureBatch, Datalink};
pub use device::DeviceInfo;
pub use error::{Component, PipelineError, PrimitiveError};
pub use primitive::{
    AccountingPrimitive, CaptureMode, CaptureParams, CapturePrimitive, CaptureStatus,
    DeviceLookup, InactivePolicy,
};
pub use queue::{BatchQueue, DEFAULT_QUEUE_CAPACITY};
pub use state::SharedState;
pub use stats::{Counters, StatsBoard};
pub use worker::WorkerThread;
