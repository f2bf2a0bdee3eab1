//! Error types for the request session.
//!
//! # Design
//! Only programmer errors are returned as `Err`: calling an operation at a
//! readyState that does not allow it. Transport failures, HTTP error
//! statuses and timeouts are reported through the event channel and the
//! `status` / `response` fields, never through this type.

use std::fmt;

/// Errors returned synchronously by `RequestSession` operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XhrError {
    /// The operation is not allowed in the session's current readyState.
    InvalidState {
        operation: &'static str,
        message: &'static str,
    },

    /// A `SessionConfig` could not be parsed.
    Config(String),
}

impl XhrError {
    pub(crate) fn invalid_state(operation: &'static str, message: &'static str) -> Self {
        XhrError::InvalidState { operation, message }
    }

    /// True for the `InvalidStateError` family.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, XhrError::InvalidState { .. })
    }
}

impl fmt::Display for XhrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XhrError::InvalidState { operation, message } => {
                write!(
                    f,
                    "InvalidStateError: Failed to execute '{operation}' on 'XMLHttpRequest': {message}"
                )
            }
            XhrError::Config(msg) => write!(f, "invalid session config: {msg}"),
        }
    }
}

impl std::error::Error for XhrError {}
