//! Stable error codes for surfacing batcher outcomes at the transport boundary.
//!
//! Every [`crate::Error`] maps onto exactly one [`ErrorCode`]. The code carries
//! the metadata a transport layer needs without matching on error internals:
//! a canonical code string, a name, a category, a retry hint and the HTTP
//! status it is conventionally surfaced as.
//!
//! ## Error Code Categories
//!
//! | Prefix | Category  | Description                                  |
//! |--------|-----------|----------------------------------------------|
//! | E1xxx  | client    | Request rejected by the validation collaborator |
//! | E2xxx  | capacity  | Backpressure: the pending queue is saturated |
//! | E3xxx  | inference | The inference backend failed a whole batch   |
//! | E4xxx  | lifecycle | Shutdown and startup conditions              |
//!
//! ## Example
//!
//! ```rust
//! use embed_batcher::error_code::ErrorCode;
//!
//! let code = ErrorCode::QueueFull;
//! assert_eq!(code.code(), "E2001");
//! assert!(code.retryable());
//! assert_eq!(code.http_status(), 503);
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// E1001: Input text or flag selection failed validation
    InvalidRequest,
    /// E2001: Pending queue at MAX_QUEUE_SIZE
    QueueFull,
    /// E3001: Inference backend failed for the whole batch
    InferenceFailure,
    /// E4001: Admission closed because shutdown has begun
    ServiceUnavailable,
    /// E4002: Request still unresolved when the drain deadline elapsed
    ShutdownTimeout,
    /// E4003: Invalid startup configuration
    Configuration,
}

impl ErrorCode {
    /// Returns the canonical code string (e.g., `"E2001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "E1001",
            Self::QueueFull => "E2001",
            Self::InferenceFailure => "E3001",
            Self::ServiceUnavailable => "E4001",
            Self::ShutdownTimeout => "E4002",
            Self::Configuration => "E4003",
        }
    }

    /// Returns the standard name (e.g., `"queue_full"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::QueueFull => "queue_full",
            Self::InferenceFailure => "inference_failure",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ShutdownTimeout => "shutdown_timeout",
            Self::Configuration => "configuration",
        }
    }

    /// Returns whether resubmitting the same request later may succeed.
    ///
    /// Inference failures are hard failures at this layer and are not retried.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull | Self::ServiceUnavailable | Self::ShutdownTimeout
        )
    }

    /// Returns the category: `"client"`, `"capacity"`, `"inference"` or `"lifecycle"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "client",
            Self::QueueFull => "capacity",
            Self::InferenceFailure => "inference",
            Self::ServiceUnavailable | Self::ShutdownTimeout | Self::Configuration => "lifecycle",
        }
    }

    /// HTTP status the transport layer should answer with.
    ///
    /// Both backpressure and draining surface as 503 "service temporarily
    /// overloaded"; the code string keeps them distinguishable.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::QueueFull | Self::ServiceUnavailable => 503,
            Self::InferenceFailure | Self::Configuration => 500,
            Self::ShutdownTimeout => 504,
        }
    }

    /// Parses a standard name back into a code.
    pub fn from_name(name: &str) -> Option<Self> {
        let code = match name {
            "invalid_request" => Self::InvalidRequest,
            "queue_full" => Self::QueueFull,
            "inference_failure" => Self::InferenceFailure,
            "service_unavailable" => Self::ServiceUnavailable,
            "shutdown_timeout" => Self::ShutdownTimeout,
            "configuration" => Self::Configuration,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
