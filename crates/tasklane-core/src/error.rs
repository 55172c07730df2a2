use std::fmt;
use std::time::Duration;

/// Failure of a list load or a mutation.
///
/// All variants end up as one line of text in the error modal; the variant itself
/// is kept for logging and tests.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Required input was empty; raised before any request is sent.
    #[error("{0}")]
    Validation(String),

    /// The request failed in transport or came back with a non-2xx status.
    #[error("{message}")]
    Network { status: Option<u16>, message: String },

    /// No response within the configured request timeout.
    #[error("Request timed out after {}s.", .0.as_secs())]
    Timeout(Duration),

    /// A 2xx response whose body lacks the expected fields.
    #[error("{0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Network,
    Timeout,
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Network { .. } => ErrorKind::Network,
            SyncError::Timeout(_) => ErrorKind::Timeout,
            SyncError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// HTTP status carried by a network failure, if the server answered at all.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            SyncError::Network { status, .. } => *status,
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }
}
