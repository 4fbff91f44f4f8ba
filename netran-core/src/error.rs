use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Pipeline component a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Capture,
    Accounting,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Capture => f.write_str("capture"),
            Component::Accounting => f.write_str("accounting"),
        }
    }
}

/// Failure reported by a capture or accounting primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct PrimitiveError {
    pub code: i32,
    pub message: String,
}

impl PrimitiveError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{component} initialization failed: {message} (code {code})")]
    Initialization {
        component: Component,
        code: i32,
        message: String,
    },

    #[error("No capture device matches {0:?}")]
    DeviceNotFound(String),

    #[error("Device lookup failed: {0}")]
    DeviceLookup(#[source] PrimitiveError),

    #[error("Capture error: {0}")]
    Capture(#[source] PrimitiveError),

    #[error("Accounting error: {0}")]
    Accounting(#[source] PrimitiveError),

    #[error("Worker thread {0} panicked")]
    WorkerPanicked(String),

    #[error("Worker thread {worker} did not terminate within {timeout:?}")]
    JoinTimeout { worker: String, timeout: Duration },

    #[error("{0} worker already started")]
    AlreadyStarted(Component),

    #[error("{0} worker already stopped")]
    AlreadyStopped(Component),

    #[error("Invalid batch queue: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
