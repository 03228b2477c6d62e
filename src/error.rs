//! Error taxonomy

use thiserror::Error;

/// Top-level bridge errors surfaced to callers
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bad input, rejected synchronously before any work happens
    #[error("validation error: {0}")]
    Validation(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Stable, user-presentable failure categories for the external process
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessErrorKind {
    Timeout,
    ConnectionError,
    MemoryError,
    RateLimit,
    ServiceNotFound,
    ProcessingError,
}

impl ProcessErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessErrorKind::Timeout => "TIMEOUT",
            ProcessErrorKind::ConnectionError => "CONNECTION_ERROR",
            ProcessErrorKind::MemoryError => "MEMORY_ERROR",
            ProcessErrorKind::RateLimit => "RATE_LIMIT",
            ProcessErrorKind::ServiceNotFound => "SERVICE_NOT_FOUND",
            ProcessErrorKind::ProcessingError => "PROCESSING_ERROR",
        }
    }

    /// Short message suitable for showing to an end user
    pub fn user_message(&self) -> &'static str {
        match self {
            ProcessErrorKind::Timeout => "The assistant took too long to respond",
            ProcessErrorKind::ConnectionError => "Could not reach the assistant service",
            ProcessErrorKind::MemoryError => "The assistant ran out of memory",
            ProcessErrorKind::RateLimit => "Rate limited, please try again shortly",
            ProcessErrorKind::ServiceNotFound => "The assistant CLI is not installed",
            ProcessErrorKind::ProcessingError => "The assistant failed to process the request",
        }
    }
}

/// A classified failure from the external assistant process
#[derive(Debug, Clone, Error)]
#[error("{} ({message})", kind.as_str())]
pub struct ProcessError {
    pub kind: ProcessErrorKind,
    pub message: String,
}

impl ProcessError {
    pub fn new(kind: ProcessErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map a spawn failure to a stable category
    pub fn from_spawn(err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ProcessErrorKind::ServiceNotFound,
            std::io::ErrorKind::OutOfMemory => ProcessErrorKind::MemoryError,
            _ => ProcessErrorKind::ProcessingError,
        };
        Self::new(kind, err.to_string())
    }

    /// Classify a failed run by inspecting what the process wrote to stderr
    pub fn from_process_output(stderr: &str, exit_code: Option<i32>) -> Self {
        let lowered = stderr.to_lowercase();
        let kind = if lowered.contains("rate limit") || lowered.contains("429") {
            ProcessErrorKind::RateLimit
        } else if lowered.contains("enomem") || lowered.contains("out of memory") {
            ProcessErrorKind::MemoryError
        } else if lowered.contains("econnrefused")
            || lowered.contains("connection")
            || lowered.contains("network")
        {
            ProcessErrorKind::ConnectionError
        } else if lowered.contains("timed out") || lowered.contains("timeout") {
            ProcessErrorKind::Timeout
        } else if lowered.contains("command not found") || lowered.contains("no such file") {
            ProcessErrorKind::ServiceNotFound
        } else {
            ProcessErrorKind::ProcessingError
        };

        let message = if stderr.trim().is_empty() {
            match exit_code {
                Some(code) => format!("process exited with code {}", code),
                None => "process terminated by signal".to_string(),
            }
        } else {
            stderr.trim().chars().take(500).collect()
        };

        Self::new(kind, message)
    }
}
