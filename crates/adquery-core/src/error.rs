//! Error types for adquery

use std::time::Duration;

use thiserror::Error;

use crate::{RC_INVALID_CREDENTIALS, RC_SIZE_LIMIT_EXCEEDED};

pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    // Credential Errors
    #[error("The supplied credential is invalid: {0}")]
    InvalidCredentials(String),

    // Transport Errors
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection reset by peer: {0}")]
    ConnectionReset(String),

    #[error("Operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    // Server Errors
    #[error("LDAP error {code}: {message}")]
    Protocol { code: u32, message: String },

    /// Raised by a connection when the server truncated the result set.
    /// Search sessions turn this into a partial, successful result.
    #[error("Size limit exceeded")]
    SizeLimitExceeded,

    // Caller Errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DirectoryError {
    /// Symbolic error code, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            DirectoryError::InvalidCredentials(_) => "LDAP_INVALID_CREDENTIALS",
            DirectoryError::Connection(_) => "ECONNREFUSED",
            DirectoryError::ConnectionReset(_) => "ECONNRESET",
            DirectoryError::Timeout { .. } => "ETIMEDOUT",
            DirectoryError::Protocol { .. } => "LDAP_PROTOCOL_ERROR",
            DirectoryError::SizeLimitExceeded => "LDAP_SIZE_LIMIT_EXCEEDED",
            DirectoryError::InvalidArgument(_) => "INVALID_ARGUMENT",
            DirectoryError::Config(_) => "INVALID_CONFIGURATION",
        }
    }

    /// Numeric LDAP result code, when the server produced one
    pub fn result_code(&self) -> Option<u32> {
        match self {
            DirectoryError::InvalidCredentials(_) => Some(RC_INVALID_CREDENTIALS),
            DirectoryError::Protocol { code, .. } => Some(*code),
            DirectoryError::SizeLimitExceeded => Some(RC_SIZE_LIMIT_EXCEEDED),
            _ => None,
        }
    }

    /// Whether a retry of the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::Connection(_)
                | DirectoryError::ConnectionReset(_)
                | DirectoryError::Timeout { .. }
        )
    }

    /// Elapsed time for timeouts
    pub fn timeout_after(&self) -> Option<Duration> {
        match self {
            DirectoryError::Timeout { elapsed } => Some(*elapsed),
            _ => None,
        }
    }

    /// Build the error for a non-zero LDAP result code
    pub fn from_result_code(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            RC_INVALID_CREDENTIALS => DirectoryError::InvalidCredentials(message),
            RC_SIZE_LIMIT_EXCEEDED => DirectoryError::SizeLimitExceeded,
            _ => DirectoryError::Protocol { code, message },
        }
    }
}
