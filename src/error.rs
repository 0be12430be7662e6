//! Error taxonomy shared by every component of the store core.
//!
//! Every fallible public operation returns [`Result`]. Backends translate
//! their native errors into this taxonomy via [`SqlErrorClassifier`] rather
//! than leaking driver-specific error types across the backend seam.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The error taxonomy shared across the store core and its backends.
///
/// Kinds are grouped by cause, not by originating type: a SQL unique
/// constraint violation and an interceptor's field-validation failure both
/// surface as [`StoreError::Validation`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// Input-shape violation: a field failed validation, or a backend
    /// reported a unique/foreign-key constraint failure.
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable summary.
        message: String,
        /// Optional per-field error list.
        errors: Vec<FieldError>,
    },

    /// Lifecycle misuse: an operation was attempted before `initialize()`,
    /// or a backend object (e.g. a table) is missing.
    #[error("state error: expected '{expected_state}', found '{current_state}'")]
    State {
        /// The state the store was actually in.
        current_state: String,
        /// The state the operation required.
        expected_state: String,
    },

    /// Contention or lock contention; retryable.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Remote backend reachability failure.
    #[error("network error: {0}")]
    Network(String),

    /// Unclassified backend or replication failure.
    #[error("sync error: {0}")]
    Sync(String),

    /// The circuit breaker is open and is rejecting requests.
    #[error("circuit breaker open, retry after {retry_after:?}")]
    CircuitBreakerOpen {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
    },
}

impl StoreError {
    /// Whether retrying the operation without external intervention is
    /// reasonable (contention and circuit-breaker rejections are
    /// transient; validation and state errors are not).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Transaction(_) | StoreError::CircuitBreakerOpen { .. }
        )
    }

    /// Construct a validation error with no per-field detail.
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Construct a state error.
    pub fn state(current: impl Into<String>, expected: impl Into<String>) -> Self {
        StoreError::State {
            current_state: current.into(),
            expected_state: expected.into(),
        }
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable failure reason.
    pub message: String,
}

impl FieldError {
    /// Construct a new field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Raised by [`crate::interceptor::builtin::ValidationInterceptor`] when a
/// request fails validation. Carries the same shape as
/// [`StoreError::Validation`] so it can be folded into the taxonomy at the
/// boundary of the interceptor chain.
#[derive(Error, Debug, Clone)]
#[error("validation failed: {message}")]
pub struct ValidationException {
    /// Human-readable summary.
    pub message: String,
    /// Per-field error list.
    pub errors: Vec<FieldError>,
}

impl From<ValidationException> for StoreError {
    fn from(e: ValidationException) -> Self {
        StoreError::Validation {
            message: e.message,
            errors: e.errors,
        }
    }
}

/// Classifies a SQL driver error message into the store's error taxonomy.
///
/// Message substring matching drives the classification because
/// `sqlx`'s error variants do not expose a stable, cross-database
/// error-code enum.
pub struct SqlErrorClassifier;

impl SqlErrorClassifier {
    /// Classify a `sqlx::Error` (or any driver error whose `Display` output
    /// resembles one) into a [`StoreError`].
    pub fn classify(err: &sqlx::Error) -> StoreError {
        let message = err.to_string();
        Self::classify_message(&message)
    }

    /// Classify a raw error message, independent of the driver error type.
    /// Exposed so non-`sqlx` adapters can reuse the same rules.
    pub fn classify_message(message: &str) -> StoreError {
        let lower = message.to_lowercase();
        if lower.contains("unique") || lower.contains("uniqueviolation") {
            StoreError::validation(message.to_string())
        } else if lower.contains("foreign key") || lower.contains("foreignkeyviolation") {
            StoreError::validation(message.to_string())
        } else if lower.contains("database is locked") || lower.contains("busy") {
            StoreError::Transaction(message.to_string())
        } else if lower.contains("no such table") {
            StoreError::state("table_missing", "table_exists")
        } else {
            StoreError::Sync(message.to_string())
        }
    }
}
