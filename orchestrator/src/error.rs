use std::fmt;

use worker::WorkerErr;

/// All errors that can occur on the controller side of a session.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid session layout, caught before spawning any worker.
    InvalidConfig(String),
    /// A worker rejected a command, the worker itself keeps running.
    WorkerError { worker_id: usize, msg: String },
    /// A worker answered with a message that doesn't fit the request.
    UnexpectedMsg { worker_id: usize, got: &'static str },
    /// A hosted worker's main loop ended with an error.
    WorkerFailed { worker_id: usize, source: WorkerErr },
    /// A hosting thread panicked.
    WorkerPanicked { worker_id: usize },
    /// An underlying I/O error not covered by the above variants.
    Io(std::io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::WorkerError { worker_id, msg } => {
                write!(f, "worker {worker_id} error: {msg}")
            }
            Self::UnexpectedMsg { worker_id, got } => {
                write!(f, "worker {worker_id} sent an unexpected {got} message")
            }
            Self::WorkerFailed { worker_id, source } => {
                write!(f, "worker {worker_id} failed: {source}")
            }
            Self::WorkerPanicked { worker_id } => write!(f, "worker {worker_id} panicked"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WorkerFailed { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WorkerErr> for OrchestratorError {
    fn from(e: WorkerErr) -> Self {
        match e {
            WorkerErr::Io(e) => Self::Io(e),
            other => Self::InvalidConfig(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
