use crate::error_code::ErrorCode;
use thiserror::Error;

/// Structured error context for configuration and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "BATCH_SIZE", "input[0]")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config", "text_validator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the batcher.
///
/// The first four variants are terminal, caller-visible request outcomes.
/// `Configuration` is fatal at startup and `Validation` belongs to the
/// validation collaborator that runs before admission.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Queue is full (max: {max}); service temporarily overloaded")]
    QueueFull { max: usize },

    #[error("Service unavailable: shutdown in progress")]
    ServiceUnavailable,

    #[error("Inference failed: {message}")]
    InferenceFailure { message: String },

    #[error("Request unresolved after {waited_ms}ms shutdown drain")]
    ShutdownTimeout { waited_ms: u64 },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Error::InferenceFailure {
            message: msg.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// Stable classification used at the transport boundary.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::QueueFull { .. } => ErrorCode::QueueFull,
            Error::ServiceUnavailable => ErrorCode::ServiceUnavailable,
            Error::InferenceFailure { .. } => ErrorCode::InferenceFailure,
            Error::ShutdownTimeout { .. } => ErrorCode::ShutdownTimeout,
            Error::Configuration { .. } => ErrorCode::Configuration,
            Error::Validation { .. } => ErrorCode::InvalidRequest,
        }
    }

    /// Whether the caller may resubmit the same request later.
    pub fn is_retryable(&self) -> bool {
        self.code().retryable()
    }
}
