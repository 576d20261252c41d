//! Error types for the training worker

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for a worker invocation
///
/// The set is closed: every failure an invocation can surface maps to exactly
/// one variant, and none of them is retried inside the worker.
#[derive(Error, Debug)]
pub enum Error {
    // Tensor store errors
    #[error("Storage fault: {message}")]
    StorageFault { message: String },

    // Synchronization errors
    #[error("Barrier fault for job {job_id}, worker {worker}: {reason}")]
    BarrierFault {
        job_id: String,
        worker: u32,
        reason: String,
    },

    // Request errors
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    #[error("Task {task:?} not recognized")]
    UnrecognizedTask { task: String },

    #[error("Unsupported output format: {found}")]
    UnsupportedOutputFormat { found: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // User hook errors
    #[error("Hook {hook} failed: {message}")]
    Hook { hook: &'static str, message: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Discriminant of [`Error`], used by the shell boundary to pick a transport code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StorageFault,
    BarrierFault,
    MalformedRequest,
    UnrecognizedTask,
    UnsupportedOutputFormat,
    InvalidConfig,
    Hook,
    Serialization,
}

impl Error {
    /// Shorthand for a storage fault
    pub fn storage(message: impl Into<String>) -> Self {
        Error::StorageFault {
            message: message.into(),
        }
    }

    /// Shorthand for a configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
        }
    }

    /// Wrap a failure reported by a user hook
    pub fn hook(hook: &'static str, message: impl ToString) -> Self {
        Error::Hook {
            hook,
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StorageFault { .. } => ErrorKind::StorageFault,
            Error::BarrierFault { .. } => ErrorKind::BarrierFault,
            Error::MalformedRequest { .. } => ErrorKind::MalformedRequest,
            Error::UnrecognizedTask { .. } => ErrorKind::UnrecognizedTask,
            Error::UnsupportedOutputFormat { .. } => ErrorKind::UnsupportedOutputFormat,
            Error::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Error::Hook { .. } => ErrorKind::Hook,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Returns true if the error was caused by the request rather than the
    /// worker's collaborators
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MalformedRequest
                | ErrorKind::UnrecognizedTask
                | ErrorKind::InvalidConfig
                | ErrorKind::Serialization
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
