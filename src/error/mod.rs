//! Error handling module
//!
//! `DeviceError` is what transports and adapters raise; `MonitorError` is what
//! leaves the scheduler/service surface.

use thiserror::Error;

/// Errors raised while talking to a device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Connection closed by device: {0}")]
    Closed(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Device rejected command: {0}")]
    Trap(String),

    #[error("Malformed response: {0}")]
    Protocol(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl DeviceError {
    /// Whether a fresh session might succeed where this one failed.
    /// Drives the pool's single reconnect-and-retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceError::Timeout(_)
                | DeviceError::Transport(_)
                | DeviceError::SessionExpired
                | DeviceError::Closed(_)
        )
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => DeviceError::Timeout(e.to_string()),
            std::io::ErrorKind::UnexpectedEof => DeviceError::Closed(e.to_string()),
            _ => DeviceError::Transport(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DeviceError::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            DeviceError::Transport(e.to_string())
        } else if e.is_decode() {
            DeviceError::Protocol(e.to_string())
        } else {
            DeviceError::Transport(e.to_string())
        }
    }
}

/// Errors surfaced by the scheduler and service
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Unknown vendor: {0}")]
    UnknownVendor(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Host {host} is backing off, retry in {retry_in_secs}s")]
    Backoff { host: String, retry_in_secs: u64 },

    #[error("Host {0} is not subscribed")]
    NotSubscribed(String),

    #[error("No credentials registered for {0}")]
    NoCredentials(String),

    #[error("Connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl MonitorError {
    /// Expected failures (device down, backing off) versus contract violations
    pub fn is_contract_error(&self) -> bool {
        matches!(
            self,
            MonitorError::UnknownVendor(_) | MonitorError::InvalidKey(_)
        )
    }
}

/// Replace every occurrence of each non-empty secret with `***`
pub fn redact(message: &str, secrets: &[&str]) -> String {
    let mut out = message.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret, "***");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("login admin:s3cret@10.0.0.1 failed (s3cret)", &["s3cret"]),
            "login admin:***@10.0.0.1 failed (***)"
        );
        assert_eq!(redact("nothing to hide", &[""]), "nothing to hide");
    }

    #[test]
    fn test_retryable() {
        assert!(DeviceError::Timeout("read".into()).is_retryable());
        assert!(DeviceError::SessionExpired.is_retryable());
        assert!(!DeviceError::Auth("bad password".into()).is_retryable());
        assert!(!DeviceError::Trap("no such command".into()).is_retryable());
    }

    #[test]
    fn test_io_error_mapping() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(DeviceError::from(eof), DeviceError::Closed(_)));
    }
}
