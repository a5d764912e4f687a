use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured error type for pollcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollcastError {
    /// Error code for programmatic handling
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional context for additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Severity level
    pub severity: ErrorSeverity,
    /// Error category, drives how the failure is recovered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    /// Unique identifier, assigned when the error enters the message log
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}

impl PollcastError {
    /// Create a new error builder with the specified error code
    pub fn new(code: ErrorCode) -> PollcastErrorBuilder {
        PollcastErrorBuilder {
            code,
            message: String::new(),
            context: None,
            severity: ErrorSeverity::Error,
            category: None,
            error_id: None,
        }
    }

    /// Whether this error should open the host's log viewer
    pub fn is_severe(&self) -> bool {
        self.severity == ErrorSeverity::Critical
    }
}

/// Builder for creating PollcastError instances
pub struct PollcastErrorBuilder {
    code: ErrorCode,
    message: String,
    context: Option<String>,
    severity: ErrorSeverity,
    category: Option<ErrorCategory>,
    error_id: Option<String>,
}

impl PollcastErrorBuilder {
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn error_id(mut self, id: impl Into<String>) -> Self {
        self.error_id = Some(id.into());
        self
    }

    /// Build the final PollcastError
    pub fn build(self) -> PollcastError {
        PollcastError {
            code: self.code,
            message: self.message,
            context: self.context,
            severity: self.severity,
            category: self.category,
            error_id: self.error_id,
        }
    }
}

/// Error codes for different types of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // General errors
    Unknown,
    Internal,

    // Transport errors
    TransportConnectFailed,
    TransportConnectTimeout,
    TransportClosed,
    TransportSendFailed,
    ReconnectExhausted,

    // Protocol errors
    ProtocolMalformedFrame,
    ProtocolServerError,

    // Queued poll validation errors
    ValidationIncidentMissing,
    ValidationIncidentUnavailable,
    ValidationOptionCount,

    // Backend errors
    BackendRequestFailed,
    BackendDesync,
    SubscriptionAuthFailed,

    // Poll errors
    PollActionFailed,

    // Configuration related errors
    ConfigInvalid,
    ConfigMissing,
}

/// Taxonomy of failures, using thiserror
#[derive(Error, Debug, Clone)]
pub enum PollcastErrorType {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Failed to connect to {url}: {reason}")]
    TransportConnectFailed { url: String, reason: String },

    #[error("Connecting to {url} timed out after {seconds}s")]
    TransportConnectTimeout { url: String, seconds: u64 },

    #[error("Connection closed: {reason}")]
    TransportClosed { reason: String },

    #[error("Failed to send frame: {reason}")]
    TransportSendFailed { reason: String },

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: usize },

    #[error("Malformed frame: {reason}")]
    ProtocolMalformedFrame { reason: String },

    #[error("Server reported error {code:?}: {message}")]
    ProtocolServerError { code: Option<i64>, message: String },

    #[error("The option \"{label}\" doesn't exist in the game.")]
    ValidationIncidentMissing { label: String },

    #[error("The option \"{label}\" isn't possible at this time.")]
    ValidationIncidentUnavailable { label: String },

    #[error("A poll needs exactly two options, this one has {count}.")]
    ValidationOptionCount { count: usize },

    #[error("Backend request '{operation}' failed: {reason}")]
    BackendRequestFailed { operation: String, reason: String },

    #[error("Backend disagrees with local state: {reason}")]
    BackendDesync { reason: String },

    #[error("Could not authorize subscription to {channel}")]
    SubscriptionAuthFailed { channel: String },

    #[error("Winning action for '{option}' failed: {reason}")]
    PollActionFailed { option: String, reason: String },

    #[error("Invalid configuration value for '{key}': {reason}")]
    ConfigInvalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Required configuration key '{key}' is missing")]
    ConfigMissing { key: String },
}

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Informational messages that don't impact functionality
    Info,
    /// Degraded but continuing operation
    Warning,
    /// Functionality lost for this operation, the process continues
    Error,
    /// Opens the host's log viewer
    Critical,
}

/// Error categories, one per recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connect/send failures, recovered by the reconnect loop
    Transport,
    /// Malformed or unexpected frames, dropped
    Protocol,
    /// Queued poll cannot run in the current game, reported and discarded
    Validation,
    /// Local state disagrees with a backend response, local state is reset
    BackendDesync,
    /// HTTP collaborator failures, converted to sentinels
    Backend,
    /// Configuration errors, not recoverable without user action
    Configuration,
    /// Bugs and failing user callbacks
    Internal,
}

impl fmt::Display for PollcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "{}: {} ({})", self.code, self.message, context)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::TransportConnectFailed => "TRANSPORT_CONNECT_FAILED",
            ErrorCode::TransportConnectTimeout => "TRANSPORT_CONNECT_TIMEOUT",
            ErrorCode::TransportClosed => "TRANSPORT_CLOSED",
            ErrorCode::TransportSendFailed => "TRANSPORT_SEND_FAILED",
            ErrorCode::ReconnectExhausted => "RECONNECT_EXHAUSTED",
            ErrorCode::ProtocolMalformedFrame => "PROTOCOL_MALFORMED_FRAME",
            ErrorCode::ProtocolServerError => "PROTOCOL_SERVER_ERROR",
            ErrorCode::ValidationIncidentMissing => "VALIDATION_INCIDENT_MISSING",
            ErrorCode::ValidationIncidentUnavailable => "VALIDATION_INCIDENT_UNAVAILABLE",
            ErrorCode::ValidationOptionCount => "VALIDATION_OPTION_COUNT",
            ErrorCode::BackendRequestFailed => "BACKEND_REQUEST_FAILED",
            ErrorCode::BackendDesync => "BACKEND_DESYNC",
            ErrorCode::SubscriptionAuthFailed => "SUBSCRIPTION_AUTH_FAILED",
            ErrorCode::PollActionFailed => "POLL_ACTION_FAILED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::ConfigMissing => "CONFIG_MISSING",
        };
        write!(f, "{}", code)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transport => write!(f, "Transport"),
            ErrorCategory::Protocol => write!(f, "Protocol"),
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::BackendDesync => write!(f, "BackendDesync"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Configuration => write!(f, "Configuration"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl std::error::Error for PollcastError {}

impl From<PollcastErrorType> for PollcastError {
    fn from(err: PollcastErrorType) -> Self {
        let message = err.to_string();
        let (code, category, severity) = match &err {
            PollcastErrorType::Internal(_) => {
                (ErrorCode::Internal, ErrorCategory::Internal, ErrorSeverity::Error)
            }
            PollcastErrorType::TransportConnectFailed { .. } => (
                ErrorCode::TransportConnectFailed,
                ErrorCategory::Transport,
                ErrorSeverity::Warning,
            ),
            PollcastErrorType::TransportConnectTimeout { .. } => (
                ErrorCode::TransportConnectTimeout,
                ErrorCategory::Transport,
                ErrorSeverity::Warning,
            ),
            PollcastErrorType::TransportClosed { .. } => (
                ErrorCode::TransportClosed,
                ErrorCategory::Transport,
                ErrorSeverity::Warning,
            ),
            PollcastErrorType::TransportSendFailed { .. } => (
                ErrorCode::TransportSendFailed,
                ErrorCategory::Transport,
                ErrorSeverity::Warning,
            ),
            // Nothing reconnects on its own after this one
            PollcastErrorType::ReconnectExhausted { .. } => (
                ErrorCode::ReconnectExhausted,
                ErrorCategory::Transport,
                ErrorSeverity::Critical,
            ),
            PollcastErrorType::ProtocolMalformedFrame { .. } => (
                ErrorCode::ProtocolMalformedFrame,
                ErrorCategory::Protocol,
                ErrorSeverity::Warning,
            ),
            PollcastErrorType::ProtocolServerError { .. } => (
                ErrorCode::ProtocolServerError,
                ErrorCategory::Protocol,
                ErrorSeverity::Error,
            ),
            PollcastErrorType::ValidationIncidentMissing { .. } => (
                ErrorCode::ValidationIncidentMissing,
                ErrorCategory::Validation,
                ErrorSeverity::Info,
            ),
            PollcastErrorType::ValidationIncidentUnavailable { .. } => (
                ErrorCode::ValidationIncidentUnavailable,
                ErrorCategory::Validation,
                ErrorSeverity::Info,
            ),
            PollcastErrorType::ValidationOptionCount { .. } => (
                ErrorCode::ValidationOptionCount,
                ErrorCategory::Validation,
                ErrorSeverity::Info,
            ),
            PollcastErrorType::BackendRequestFailed { .. } => (
                ErrorCode::BackendRequestFailed,
                ErrorCategory::Backend,
                ErrorSeverity::Error,
            ),
            PollcastErrorType::BackendDesync { .. } => (
                ErrorCode::BackendDesync,
                ErrorCategory::BackendDesync,
                ErrorSeverity::Warning,
            ),
            PollcastErrorType::SubscriptionAuthFailed { .. } => (
                ErrorCode::SubscriptionAuthFailed,
                ErrorCategory::Backend,
                ErrorSeverity::Critical,
            ),
            PollcastErrorType::PollActionFailed { .. } => (
                ErrorCode::PollActionFailed,
                ErrorCategory::Internal,
                ErrorSeverity::Error,
            ),
            PollcastErrorType::ConfigInvalid { .. } => (
                ErrorCode::ConfigInvalid,
                ErrorCategory::Configuration,
                ErrorSeverity::Critical,
            ),
            PollcastErrorType::ConfigMissing { .. } => (
                ErrorCode::ConfigMissing,
                ErrorCategory::Configuration,
                ErrorSeverity::Critical,
            ),
        };

        PollcastError::new(code)
            .message(message)
            .category(category)
            .severity(severity)
            .build()
    }
}

impl From<anyhow::Error> for PollcastError {
    fn from(err: anyhow::Error) -> Self {
        PollcastError::new(ErrorCode::Unknown)
            .message(err.to_string())
            .category(ErrorCategory::Internal)
            .build()
    }
}

/// Result type alias for pollcast operations
pub type PollcastResult<T> = Result<T, PollcastError>;

pub fn transport_connect_failed(url: &str, err: impl fmt::Display) -> PollcastError {
    PollcastErrorType::TransportConnectFailed {
        url: url.to_string(),
        reason: err.to_string(),
    }
    .into()
}

pub fn transport_connect_timeout(url: &str, seconds: u64) -> PollcastError {
    PollcastErrorType::TransportConnectTimeout {
        url: url.to_string(),
        seconds,
    }
    .into()
}

pub fn transport_closed(reason: impl fmt::Display) -> PollcastError {
    PollcastErrorType::TransportClosed {
        reason: reason.to_string(),
    }
    .into()
}

pub fn transport_send_failed(event: &str, err: impl fmt::Display) -> PollcastError {
    PollcastErrorType::TransportSendFailed {
        reason: format!("{} frame: {}", event, err),
    }
    .into()
}

pub fn reconnect_exhausted(attempts: usize) -> PollcastError {
    PollcastErrorType::ReconnectExhausted { attempts }.into()
}

pub fn malformed_frame(err: impl fmt::Display) -> PollcastError {
    PollcastErrorType::ProtocolMalformedFrame {
        reason: err.to_string(),
    }
    .into()
}

pub fn server_error(code: Option<i64>, message: impl Into<String>) -> PollcastError {
    PollcastErrorType::ProtocolServerError {
        code,
        message: message.into(),
    }
    .into()
}

pub fn incident_missing(label: &str) -> PollcastError {
    PollcastErrorType::ValidationIncidentMissing {
        label: label.to_string(),
    }
    .into()
}

pub fn incident_unavailable(label: &str) -> PollcastError {
    PollcastErrorType::ValidationIncidentUnavailable {
        label: label.to_string(),
    }
    .into()
}

pub fn option_count(count: usize) -> PollcastError {
    PollcastErrorType::ValidationOptionCount { count }.into()
}

pub fn backend_request_failed(operation: &str, err: impl fmt::Display) -> PollcastError {
    PollcastErrorType::BackendRequestFailed {
        operation: operation.to_string(),
        reason: err.to_string(),
    }
    .into()
}

pub fn backend_desync(reason: impl Into<String>) -> PollcastError {
    PollcastErrorType::BackendDesync {
        reason: reason.into(),
    }
    .into()
}

pub fn subscription_auth_failed(channel: &str) -> PollcastError {
    PollcastErrorType::SubscriptionAuthFailed {
        channel: channel.to_string(),
    }
    .into()
}

pub fn poll_action_failed(option: &str, err: impl fmt::Display) -> PollcastError {
    PollcastErrorType::PollActionFailed {
        option: option.to_string(),
        reason: err.to_string(),
    }
    .into()
}

pub fn config_invalid(key: &str, value: &str, reason: &str) -> PollcastError {
    PollcastErrorType::ConfigInvalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

pub fn config_missing(key: &str) -> PollcastError {
    PollcastErrorType::ConfigMissing {
        key: key.to_string(),
    }
    .into()
}
