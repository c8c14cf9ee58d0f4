//! Error types for the API contract.
//!
//! Two kinds of failure exist:
//!
//! 1. **ApiError**: a command or query was rejected (engine not ready, unknown
//!    task, no pending ask, bad input). Async operations fail by returning
//!    `Err(ApiError)` instead of panicking.
//!
//! 2. **UnknownTag**: a string outside one of the closed vocabularies
//!    (`ClineAsk`, `ClineSay`, configuration keys, event names) was decoded.
//!    These never leak to consumers as valid values.
//!
//! Provider failures inside a task are not contract errors. They reach the
//! user through `ask: "api_req_failed"` / `say: "error"` messages; see
//! [`ApiError::to_message`].

use crate::message::{ClineAsk, ClineMessage, ClineSay, ExpectedResponse};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// A string that is not a member of a closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {set} value: {value:?}")]
pub struct UnknownTag {
    /// Name of the vocabulary (e.g. `ClineSay`).
    pub set: &'static str,

    /// The rejected string.
    pub value: String,
}

impl UnknownTag {
    pub fn new(set: &'static str, value: impl Into<String>) -> Self {
        Self {
            set,
            value: value.into(),
        }
    }
}

/// Standard error type for all API operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct ApiError {
    /// Error code (machine-readable)
    pub code: ErrorCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Additional context (for debugging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,

    /// Is this recoverable?
    pub recoverable: bool,

    /// Suggested action for recovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<SuggestedAction>,
}

impl ApiError {
    /// Create a new error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.default_severity(),
            message: message.into(),
            context: None,
            recoverable: code.is_typically_recoverable(),
            suggested_action: None,
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let context = self.context.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            context.insert(key.into(), v);
        }
        self
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_suggestion(mut self, action: SuggestedAction) -> Self {
        self.suggested_action = Some(action);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Format for display in the chat UI.
    ///
    /// Includes what went wrong and, when known, what to do next.
    pub fn to_user_message(&self) -> String {
        let mut msg = format!("Error: {}", self.message);
        if let Some(ref action) = self.suggested_action {
            match action {
                SuggestedAction::Retry { after_ms } => {
                    msg.push_str(&format!(". Retry after {}ms", after_ms));
                }
                SuggestedAction::WaitUntilReady => {
                    msg.push_str(". Wait until the extension is ready");
                }
                SuggestedAction::StartNewTask => {
                    msg.push_str(". Start a new task");
                }
                SuggestedAction::UserAction { description } => {
                    msg.push_str(&format!(". User action needed: {}", description));
                }
                SuggestedAction::CheckConfig { key } => {
                    msg.push_str(&format!(". Check configuration key: {}", key));
                }
                SuggestedAction::ReportBug => {
                    msg.push_str(". This may be a bug, please report it");
                }
            }
        }
        msg
    }

    /// Render this error as a `say: "error"` chat message.
    pub fn to_message(&self) -> ClineMessage {
        ClineMessage::say(ClineSay::Error).with_text(self.to_user_message())
    }

    // ═══════════════════════════════════════════════════════════
    // Common error constructors
    // ═══════════════════════════════════════════════════════════

    /// The engine has not finished initializing.
    pub fn not_ready() -> Self {
        Self::new(ErrorCode::NotReady, "The extension is not ready")
            .with_suggestion(SuggestedAction::WaitUntilReady)
    }

    pub fn task_not_found(task_id: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task {} not found", task_id),
        )
        .with_context("task_id", task_id.to_string())
    }

    pub fn no_active_task() -> Self {
        Self::new(ErrorCode::NoActiveTask, "No task is currently active")
            .with_suggestion(SuggestedAction::StartNewTask)
    }

    pub fn no_pending_ask() -> Self {
        Self::new(
            ErrorCode::NoPendingAsk,
            "The active task is not waiting for a response",
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn already_completed(task_id: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::TaskAlreadyCompleted,
            format!("Task {} has already completed", task_id),
        )
        .recoverable(false)
    }

    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(ErrorCode::ConfigurationError, message)
            .with_suggestion(SuggestedAction::CheckConfig { key })
    }

    /// Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageError, message)
            .with_suggestion(SuggestedAction::Retry { after_ms: 1000 })
    }

    /// The LLM provider failed or rejected a request.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderError, message)
            .with_suggestion(SuggestedAction::Retry { after_ms: 5000 })
    }

    /// The pending ask offers no secondary action.
    pub fn no_secondary_action(ask: ClineAsk) -> Self {
        Self::new(
            ErrorCode::InvalidState,
            format!("ask {} has no secondary action", ask),
        )
        .with_suggestion(SuggestedAction::UserAction {
            description: format!(
                "Press \"{}\" or answer with a message",
                primary_label(ask)
            ),
        })
    }

    pub fn checksum_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ChecksumMismatch, message)
    }

    /// Internal error (bug)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
            .with_severity(Severity::Fatal)
            .recoverable(false)
            .with_suggestion(SuggestedAction::ReportBug)
    }
}

fn primary_label(ask: ClineAsk) -> &'static str {
    match ask.expected_response() {
        ExpectedResponse::Approval { primary, .. } | ExpectedResponse::Acknowledge { primary } => {
            primary
        }
        ExpectedResponse::Text => "Send",
    }
}

impl Default for ApiError {
    fn default() -> Self {
        Self::new(ErrorCode::Internal, "Unknown error")
    }
}

/// Error codes shared by every host implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// `is_ready()` is false
    NotReady,

    /// Unknown task identifier
    TaskNotFound,

    /// Operation needs an active task
    NoActiveTask,

    /// Button press or message without a pending ask
    NoPendingAsk,

    /// Invalid input provided
    InvalidInput,

    /// Invalid state for operation
    InvalidState,

    /// Task already reached `taskCompleted`
    TaskAlreadyCompleted,

    /// String outside a closed vocabulary
    UnknownTag,

    /// Configuration value rejected
    ConfigurationError,

    /// Storage error (read/write failed)
    StorageError,

    /// Checksum mismatch (corruption)
    ChecksumMismatch,

    /// Contract version mismatch
    VersionMismatch,

    /// LLM provider request failed
    ProviderError,

    /// Internal error (bug)
    Internal,
}

impl ErrorCode {
    /// Get default severity for this error code
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::Internal | Self::ChecksumMismatch => Severity::Fatal,
            Self::NotReady => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Check if this error is typically recoverable
    pub fn is_typically_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Internal | Self::ChecksumMismatch | Self::VersionMismatch
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotReady => "NOT_READY",
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::NoActiveTask => "NO_ACTIVE_TASK",
            Self::NoPendingAsk => "NO_PENDING_ASK",
            Self::InvalidInput => "INVALID_INPUT",
            Self::InvalidState => "INVALID_STATE",
            Self::TaskAlreadyCompleted => "TASK_ALREADY_COMPLETED",
            Self::UnknownTag => "UNKNOWN_TAG",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::StorageError => "STORAGE_ERROR",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, not really an error
    Info,

    /// Warning, operation may succeed later
    Warning,

    /// Error, operation failed but recoverable
    Error,

    /// Fatal, host is in a bad state
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Suggested actions for error recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation
    Retry {
        /// Milliseconds to wait before retry
        after_ms: u64,
    },

    /// Poll `is_ready()` and try again
    WaitUntilReady,

    /// Start a fresh task
    StartNewTask,

    /// User intervention needed
    UserAction { description: String },

    /// Check configuration
    CheckConfig {
        /// Configuration key to check
        key: String,
    },

    /// Report a bug
    ReportBug,
}

impl From<UnknownTag> for ApiError {
    fn from(e: UnknownTag) -> Self {
        ApiError::new(ErrorCode::UnknownTag, e.to_string())
            .with_context("set", e.set)
            .with_context("value", e.value)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::storage(format!("I/O error: {}", e))
            .with_context("io_error_kind", format!("{:?}", e.kind()))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::new(ErrorCode::InvalidInput, format!("JSON error: {}", e))
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;
