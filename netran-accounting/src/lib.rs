//! # netran accounting
//!
//! The consumer side of the pipeline: a worker thread that drains the batch
//! queue into an accounting primitive, and the built-in traffic accountant.

pub mod accountant;
pub mod frame;
pub mod worker;

pub use accountant::TrafficAccountant;
pub use frame::{FrameError, FrameParser, IpEndpoints};
pub use worker::{AccountingReport, AccountingSettings, AccountingStop, AccountingWorker};
