use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Network trouble, throttling or server-side hiccups; worth retrying
    Transient,
    /// The remote side reported the work as failed, cancelled or rejected
    Permanent,
    /// The remote answered, but with malformed or missing content
    Protocol,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Protocol => "protocol",
        }
    }

    /// Classify an HTTP status returned by a remote service
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            408 | 429 => ErrorKind::Transient,
            c if c >= 500 => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote API error with status code information
#[derive(Debug, Clone)]
pub struct AiError {
    /// Error message
    pub message: String,
    /// HTTP status code if available
    pub status_code: Option<u16>,
    pub kind: ErrorKind,
}

impl AiError {
    /// Error without a status code; treated as a network failure
    pub fn new(message: impl Into<String>) -> Self {
        AiError {
            message: message.into(),
            status_code: None,
            kind: ErrorKind::Transient,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        AiError {
            message: message.into(),
            status_code: Some(status_code),
            kind: ErrorKind::from_status(status_code),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        AiError {
            message: message.into(),
            status_code: None,
            kind: ErrorKind::Permanent,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        AiError {
            message: message.into(),
            status_code: None,
            kind: ErrorKind::Protocol,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.status_code {
            write!(f, "[HTTP {}] {}", code, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AiError {}

impl From<String> for AiError {
    fn from(s: String) -> Self {
        AiError::new(s)
    }
}

impl From<&str> for AiError {
    fn from(s: &str) -> Self {
        AiError::new(s)
    }
}
