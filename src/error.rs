use thiserror::Error;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid predictor configuration: {0}")]
    Creation(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Error in mxnet during {operation}: {message}")]
    Native {
        operation: String,
        message: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Graph contains a cycle: {0}")]
    Cycle(String),

    #[error("Profiler not started: {0}")]
    NotStarted(String),

    #[error("Invalid profiler transition: {0}")]
    InvalidTransition(String),

    #[error("Profiler already started")]
    AlreadyStarted,

    #[error("Another profiling session is active on this engine")]
    ProfilerBusy,

    #[error("Use after close: {0}")]
    Closed(String),

    #[error("Profile dump not found at {0}")]
    MissingArtifact(PathBuf),

    #[error("Export error: {0}")]
    Export(String),
}

impl Error {
    /// Build a native error from the engine's last diagnostic message
    pub fn native(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Native {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True for errors reported by the native engine
    pub fn is_native(&self) -> bool {
        matches!(self, Error::Native { .. })
    }

    /// True for misuse of the predictor or profiler lifecycle
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            Error::NotStarted(_)
                | Error::InvalidTransition(_)
                | Error::AlreadyStarted
                | Error::ProfilerBusy
                | Error::Closed(_)
        )
    }

    /// Nothing in this crate retries; callers own retry policy for whole pipelines.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
