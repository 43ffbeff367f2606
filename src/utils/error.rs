use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the control agent.
///
/// Variants mirror the error taxonomy in the specification: each one is a
/// *kind*, not a wrapped foreign type, so callers can match on it to decide
/// whether to retry, surface to a command row, or abort a recipe step.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum AppError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Broken pipe, timeout, connection reset — recoverable by one
    /// reconnect + one retry at the transport layer.
    #[error("transient transport error: {message}")]
    TransportTransient { message: String },

    /// Endpoint resolution failed for every configured target.
    #[error("transport exhausted all endpoints: {message}")]
    TransportFatal { message: String },

    /// A Modbus exception response (illegal address, illegal value, ...).
    #[error("modbus protocol error: {message}")]
    Protocol { message: String },

    /// Value out of range, parameter not writable, missing command target.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Recipe already running, purge already in flight, etc.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Ambiguous set-point reconciliation; logged, DB wins, not fatal.
    #[error("external state divergence: {message}")]
    ExternalStateDivergence { message: String },

    /// Resource not found (parameter, valve, recipe, command, execution).
    #[error("not found: {resource_type} {message}")]
    NotFound {
        resource_type: String,
        message: String,
    },

    /// Database/persistence layer error not otherwise classified above.
    #[error("persistence error: {message}")]
    Persistence { message: String },

    /// Serialization/deserialization failure.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Catch-all for conditions that do not fit another variant.
    #[error("error: {message}")]
    Generic { message: String },
}

impl AppError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn transport_transient(message: impl Into<String>) -> Self {
        Self::TransportTransient { message: message.into() }
    }

    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::TransportFatal { message: message.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn external_state_divergence(message: impl Into<String>) -> Self {
        Self::ExternalStateDivergence { message: message.into() }
    }

    pub fn not_found(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound { resource_type: resource_type.into(), message: message.into() }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into() }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic { message: message.into() }
    }

    /// Short machine-readable code written into a command's `error` column.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration { .. } => "configuration",
            AppError::TransportTransient { .. } => "transport_transient",
            AppError::TransportFatal { .. } => "transport_fatal",
            AppError::Protocol { .. } => "protocol",
            AppError::Validation { .. } => "validation",
            AppError::Conflict { .. } => "conflict",
            AppError::ExternalStateDivergence { .. } => "external_state_divergence",
            AppError::NotFound { .. } => "not_found",
            AppError::Persistence { .. } => "persistence",
            AppError::Serialization { .. } => "serialization",
            AppError::Generic { .. } => "generic",
        }
    }

    /// True when the transport layer should attempt one reconnect + retry.
    pub fn is_retryable_transport(&self) -> bool {
        matches!(self, AppError::TransportTransient { .. })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization { message: err.to_string() }
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::Persistence { message: err.to_string() }
    }
}

pub type AppResult<T> = Result<T, AppError>;
