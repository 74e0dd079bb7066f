//! Error handling for Tessera Core.
//!
//! This module provides:
//! - A single crate-wide error type with machine-readable codes
//! - Severity and category classification used for logging
//! - Structured details naming the offending entity
//! - Exit code mapping for the operator CLI
//! - Error counting through the `metrics` facade
//!
//! # Usage
//!
//! ```rust,ignore
//! use tessera_core::error::{TesseraError, Result, ErrorContext};
//!
//! fn load() -> Result<String> {
//!     std::fs::read_to_string("topology.yaml").context("Failed to read topology")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, warn};

use crate::telemetry::ERRORS_TOTAL;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and appear in JSON error output of the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Topology Errors (1000-1099)
    UnknownReference,
    DuplicateKey,
    InvalidInput,

    // Policy Errors (1100-1199)
    EmptyScope,

    // Constraint Errors (1200-1299)
    MultiAccountUser,
    GroupCeilingExceeded,
    AsymmetricRole,
    MfaTrustMissing,
    ForeignTrustPrincipal,
    ValidationFailed,

    // Reconciliation Errors (1300-1399)
    ApplyFailed,
    ControlPlaneError,
    LiveStateUnavailable,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // I/O Errors (2300-2399)
    IoError,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::UnknownReference => 1000,
            Self::DuplicateKey => 1001,
            Self::InvalidInput => 1002,

            Self::EmptyScope => 1100,

            Self::MultiAccountUser => 1200,
            Self::GroupCeilingExceeded => 1201,
            Self::AsymmetricRole => 1202,
            Self::MfaTrustMissing => 1203,
            Self::ForeignTrustPrincipal => 1204,
            Self::ValidationFailed => 1205,

            Self::ApplyFailed => 1300,
            Self::ControlPlaneError => 1301,
            Self::LiveStateUnavailable => 1302,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::IoError => 2300,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Process exit code used by the CLI when a command fails with this error.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownReference
            | Self::DuplicateKey
            | Self::InvalidInput
            | Self::EmptyScope
            | Self::DeserializationError
            | Self::ConfigurationError => 2,

            Self::MultiAccountUser
            | Self::GroupCeilingExceeded
            | Self::AsymmetricRole
            | Self::MfaTrustMissing
            | Self::ForeignTrustPrincipal
            | Self::ValidationFailed => 3,

            Self::ApplyFailed | Self::ControlPlaneError | Self::LiveStateUnavailable => 4,

            Self::SerializationError | Self::IoError | Self::InternalError => 1,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Apply failures leave the account in a partial state that a fresh
    /// diff picks up, so retrying the whole run is always correct for them.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ApplyFailed | Self::ControlPlaneError | Self::LiveStateUnavailable
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "topology",
            1100..=1199 => "policy",
            1200..=1299 => "constraint",
            1300..=1399 => "reconcile",
            2200..=2299 => "serialization",
            2300..=2399 => "io",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Operator input errors (bad topology, bad config)
    Low,
    /// Rejected plans and control-plane hiccups
    Medium,
    /// Security invariants violated or partial applies
    High,
    /// Bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::UnknownReference
            | ErrorCode::DuplicateKey
            | ErrorCode::InvalidInput
            | ErrorCode::EmptyScope
            | ErrorCode::AsymmetricRole
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError => Self::Low,

            ErrorCode::MultiAccountUser
            | ErrorCode::GroupCeilingExceeded
            | ErrorCode::ValidationFailed
            | ErrorCode::ControlPlaneError
            | ErrorCode::LiveStateUnavailable
            | ErrorCode::IoError => Self::Medium,

            ErrorCode::MfaTrustMissing
            | ErrorCode::ForeignTrustPrincipal
            | ErrorCode::ApplyFailed
            | ErrorCode::SerializationError => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,

    /// Offending entity (scope name, user name, role ARN...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Offending entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Tessera Core.
#[derive(Debug)]
pub struct TesseraError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Operator-facing message
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for TesseraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl std::error::Error for TesseraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl TesseraError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both operator-facing and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the operator-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the CLI exit code.
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    entity = ?self.details.entity_id,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            ERRORS_TOTAL,
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Report
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializable view of an error for JSON/YAML CLI output.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub details: ErrorDetails,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl From<&TesseraError> for ErrorReport {
    fn from(error: &TesseraError) -> Self {
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            code: error.code,
            numeric_code: error.code.numeric_code(),
            category: error.code.category().to_string(),
            message: error.message.to_string(),
            details: error.details.clone(),
            causes,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to foreign errors.
pub trait ErrorContext<T> {
    /// Wrap the error as an internal error with the given message.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap the error with a specific code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| TesseraError::internal(message).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| {
            let message = e.to_string();
            TesseraError::new(code, message).with_source(e)
        })
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| TesseraError::internal(message))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| TesseraError::new(code, "Value not present"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for TesseraError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_data() || error.is_syntax() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };
        Self::with_internal(code, "JSON processing failed", error.to_string()).with_source(error)
    }
}

impl From<serde_yaml::Error> for TesseraError {
    fn from(error: serde_yaml::Error) -> Self {
        let mut err = Self::with_internal(
            ErrorCode::DeserializationError,
            "YAML processing failed",
            error.to_string(),
        );
        if let Some(location) = error.location() {
            err = err
                .with_context("line", location.line())
                .with_context("column", location.column());
        }
        err.with_source(error)
    }
}

impl From<toml::de::Error> for TesseraError {
    fn from(error: toml::de::Error) -> Self {
        Self::with_internal(
            ErrorCode::DeserializationError,
            "TOML processing failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<toml::ser::Error> for TesseraError {
    fn from(error: toml::ser::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "TOML rendering failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<std::io::Error> for TesseraError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::IoError, "I/O operation failed", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for TesseraError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error",
            error.to_string(),
        )
        .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain-Specific Error Constructors
// ═══════════════════════════════════════════════════════════════════════════════

impl TesseraError {
    // ─────────────────────────────────────────────────────────────────────────
    // Topology Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// A topology entry references an entity that was never declared.
    pub fn unknown_reference(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        referenced_by: impl Into<String>,
    ) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        let referenced_by = referenced_by.into();
        Self::new(
            ErrorCode::UnknownReference,
            format!(
                "Unknown {} '{}' referenced by {}",
                entity_type, entity_id, referenced_by
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity(&entity_type, &entity_id)
                .with_context("referenced_by", &referenced_by),
        )
    }

    /// A topology entry is declared twice.
    pub fn duplicate_key(entity_type: impl Into<String>, key: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let key = key.into();
        Self::new(
            ErrorCode::DuplicateKey,
            format!("Duplicate {} '{}'", entity_type, key),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &key))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Policy Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// A scope has no allow statements.
    pub fn empty_scope(scope: impl Into<String>) -> Self {
        let scope = scope.into();
        Self::new(
            ErrorCode::EmptyScope,
            format!("Scope '{}' has no allow statements", scope),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("scope", &scope)
                .with_suggestion("Add at least one allow statement; a scope must grant something"),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// A control-plane primitive failed.
    pub fn control_plane(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        let operation = operation.into();
        Self::new(
            ErrorCode::ControlPlaneError,
            format!("Control plane rejected {}: {}", operation, reason.into()),
        )
        .with_details(ErrorDetails::new().with_entity("operation", &operation))
    }

    /// The live-state collaborator could not produce a snapshot.
    pub fn live_state_unavailable(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::LiveStateUnavailable,
            format!("Live IAM state unavailable: {}", reason.into()),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
