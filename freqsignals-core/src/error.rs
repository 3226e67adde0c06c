//! Structured error types for signal operations.
//!
//! Only connect timeouts are retried by the request layer. Every other
//! variant surfaces to the caller on first occurrence.

use thiserror::Error;

/// Errors produced by the signal client, store, loader and series I/O.
///
/// These are designed to be displayable in both CLI and host log contexts.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request to {url} timed out after {attempts} attempt(s)")]
    Timeout { url: String, attempts: u32 },

    #[error("bad return status code: {}{}", .status, format_body(.body))]
    Request { status: u16, body: String },

    #[error("usage error: {0}")]
    Usage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("series I/O error: {0}")]
    Series(String),
}

fn format_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" - {body}")
    }
}

impl SignalError {
    /// True for the one error class the request layer considers transient.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SignalError::Timeout { .. })
    }

    /// HTTP status carried by a `Request` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            SignalError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SignalError>;
