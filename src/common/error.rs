//! Error types for lazylog

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Wire Errors ===
    #[error("Malformed frame: {0}")]
    Protocol(String),

    #[error("Unknown message tag: {0}")]
    UnknownTag(String),

    #[error("Frame too large ({0} bytes)")]
    FrameTooLarge(usize),

    #[error("Payload contains '|' or newline")]
    InvalidPayload,

    #[error("Unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: &'static str, got: String },

    #[error("Peer replied ERR{}", remote_suffix(.0))]
    Remote(Option<String>),

    // === Sequencer Errors ===
    #[error("Replica is sealed, retry later")]
    Sealed,

    // === Shard Errors ===
    #[error("Shard not ready for range up to {0}")]
    NotReady(u64),

    // === Coordination Errors ===
    #[error("Coordination error: {0}")]
    Coordination(String),

    #[error("Coordination session lost")]
    SessionLost,

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

fn remote_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!("|{r}"),
        None => String::new(),
    }
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::Sealed
                | Error::NotReady(_)
                | Error::SessionLost
                | Error::Io(_)
        )
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout("deadline elapsed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Sealed.is_retryable());
        assert!(Error::NotReady(7).is_retryable());
        assert!(Error::ConnectionFailed("refused".into()).is_retryable());
        assert!(!Error::InvalidPayload.is_retryable());
        assert!(!Error::Protocol("bad tag".into()).is_retryable());
    }

    #[test]
    fn test_remote_display() {
        assert_eq!(Error::Remote(None).to_string(), "Peer replied ERR");
        assert_eq!(
            Error::Remote(Some("UNKNOWN".into())).to_string(),
            "Peer replied ERR|UNKNOWN"
        );
    }
}
