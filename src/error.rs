//! Error types for the Warden custody service.
//!
//! This module provides a unified error type [`WardenError`] for all Warden operations,
//! along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Validation**: malformed filters, out-of-range policy values. Returned to the caller.
//! - **Integrity**: hash, signature or chain mismatches. Never corrected automatically.
//! - **Policy**: an action blocked by a legal hold or a family setting.
//! - **Authorization**: missing permission or a missing/invalid step-up token.
//! - **State**: a governance or rotation transition attempted from the wrong state.
//! - **Storage**: the object store or a repository failed for a single item.
//!
//! # Example
//!
//! ```rust
//! use warden::error::{Result, WardenError};
//!
//! fn check_retention(days: u32) -> Result<u32> {
//!     if !(1..=3650).contains(&days) {
//!         return Err(WardenError::Validation(format!("retention_days {} out of range", days)));
//!     }
//!     Ok(days)
//! }
//!
//! let err = check_retention(0).unwrap_err();
//! assert!(!err.is_retryable());
//! ```

use std::io;
use thiserror::Error;

/// Main error type for Warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    // Caller input
    #[error("Validation error: {0}")]
    Validation(String),

    // Integrity
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Digest mismatch for {subject}: expected {expected}, got {actual}")]
    DigestMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    // Policy
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    // Authorization
    #[error("Step-up authentication required")]
    StepUpRequired,

    #[error("Step-up token invalid: {0}")]
    StepUpInvalid(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // State machine errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No staged key for {0}")]
    NothingStaged(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Storage
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    // Configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Check if error is retryable.
    ///
    /// Validation, integrity, authorization and state errors are permanent: replaying the
    /// same operation cannot succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WardenError::Storage(_)
                | WardenError::ObjectNotFound(_)
                | WardenError::Conflict(_)
                | WardenError::Io(_)
                | WardenError::Internal(_)
        )
    }

    /// Whether this error reports tampering or corruption.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            WardenError::Integrity(_) | WardenError::DigestMismatch { .. }
        )
    }

    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            WardenError::Validation(_) => "validation_error",
            WardenError::Integrity(_) | WardenError::DigestMismatch { .. } => "integrity_error",
            WardenError::PolicyViolation(_) => "policy_violation",
            WardenError::StepUpRequired => "step_up_required",
            WardenError::StepUpInvalid(_) => "step_up_invalid",
            WardenError::Forbidden(_) => "forbidden",
            WardenError::InvalidState(_) => "invalid_state",
            WardenError::NothingStaged(_) => "nothing_staged",
            WardenError::Conflict(_) => "conflict",
            WardenError::NotFound(_) => "not_found",
            WardenError::Storage(_) | WardenError::ObjectNotFound(_) => "storage_error",
            WardenError::Config(_) | WardenError::InvalidConfig { .. } => "config_error",
            WardenError::Serialization(_) => "serialization_error",
            WardenError::Io(_) => "io_error",
            WardenError::Crypto(_) => "crypto_error",
            WardenError::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        WardenError::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for WardenError {
    fn from(e: base64::DecodeError) -> Self {
        WardenError::Serialization(format!("base64: {}", e))
    }
}

/// Result type alias for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
