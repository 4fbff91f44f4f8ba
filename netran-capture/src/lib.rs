//! netran‑capture
//!
//! The capture side of the pipeline: a worker thread that feeds the batch
//! queue, plus the pcap-backed capture primitive and device lookup it is
//! normally paired with.

pub mod device;
pub mod pcap_source;
pub mod worker;

pub use device::PcapDeviceLookup;
pub use pcap_source::PcapCapture;
pub use worker::{CaptureReport, CaptureSettings, CaptureStop, CaptureWorker};
