//! Error types for call admission and execution.
//!
//! [`DispatchError`] is the client-facing taxonomy: every variant maps to a
//! stable wire code and is answered as an ordinary error response.
//! [`ExecutionFault`] covers wiring mistakes in the host process and is never
//! sent to clients.

use std::thread::ThreadId;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::protocol::{ErrorCode, ErrorObject};
use crate::registry::{HandlerError, SchemaViolation, ThreadAffinity};

/// Lifecycle stage at which a call ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// The call waited in the queue for too long.
    Queued,
    /// The handler reported that its execution budget ran out.
    Executing,
}

impl TimeoutStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Executing => "executing",
        }
    }
}

/// Reasons a call was cancelled without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The dispatcher is shutting down.
    ShuttingDown,
}

impl CancelReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Request-level failures reported to clients.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("method '{method}' is not registered")]
    UnknownMethod { method: String },

    #[error("invalid params for '{method}': {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("handler for '{method}' failed: {cause}")]
    HandlerExecution {
        method: String,
        cause: String,
        data: Option<Value>,
    },

    #[error("'{method}' timed out while {} after {budget:?}", .stage.as_str())]
    Timeout {
        method: String,
        stage: TimeoutStage,
        budget: Duration,
    },

    #[error("queue is full ({depth} calls pending)")]
    QueueFull { depth: usize },

    #[error("call to '{method}' was cancelled: {}", .reason.as_str())]
    Cancelled {
        method: String,
        reason: CancelReason,
    },
}

impl DispatchError {
    /// Creates an unknown method error.
    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    /// Creates an invalid params error from a schema violation.
    pub fn invalid_params(method: impl Into<String>, violation: &SchemaViolation) -> Self {
        Self::InvalidParams {
            method: method.into(),
            reason: violation.to_string(),
        }
    }

    /// Creates an error for a handler that panicked.
    pub fn panicked(method: impl Into<String>, message: &str) -> Self {
        Self::HandlerExecution {
            method: method.into(),
            cause: format!("handler panicked: {message}"),
            data: None,
        }
    }

    /// Converts an error returned by a handler.
    pub fn from_handler(method: impl Into<String>, error: HandlerError) -> Self {
        let method = method.into();
        match error {
            HandlerError::Failed { message, data } => Self::HandlerExecution {
                method,
                cause: message,
                data,
            },
            HandlerError::InvalidParams { message } => Self::InvalidParams {
                method,
                reason: message,
            },
            HandlerError::TimedOut { budget } => Self::Timeout {
                method,
                stage: TimeoutStage::Executing,
                budget,
            },
        }
    }

    /// Stable code category for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownMethod { .. } => ErrorCode::MethodNotFound,
            Self::InvalidParams { .. } => ErrorCode::InvalidParams,
            Self::HandlerExecution { .. } => ErrorCode::HandlerExecution,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::QueueFull { .. } => ErrorCode::ServerBusy,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }

    /// Builds the wire error object, attaching structured detail.
    pub fn to_error_object(&self) -> ErrorObject {
        let data = match self {
            Self::UnknownMethod { method } => json!({ "method": method }),
            Self::InvalidParams { method, reason } => json!({ "method": method, "reason": reason }),
            Self::HandlerExecution {
                method,
                cause,
                data,
            } => {
                let mut detail = json!({ "method": method, "cause": cause });
                if let (Some(extra), Some(object)) = (data, detail.as_object_mut()) {
                    object.insert("detail".to_owned(), extra.clone());
                }
                detail
            }
            Self::Timeout {
                method,
                stage,
                budget,
            } => json!({
                "method": method,
                "stage": stage.as_str(),
                "budget_ms": u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
            }),
            Self::QueueFull { depth } => json!({ "depth": depth }),
            Self::Cancelled { method, reason } => {
                json!({ "method": method, "reason": reason.as_str() })
            }
        };
        ErrorObject::new(self.code()).with_data(data)
    }
}

/// Process-level faults raised by the execution thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFault {
    /// A handler bound to the execution thread was reached from elsewhere.
    #[error(
        "'{method}' requires {affinity} but pump ran on {actual:?} instead of {expected:?}"
    )]
    ThreadAffinityViolation {
        method: String,
        affinity: ThreadAffinity,
        expected: ThreadId,
        actual: ThreadId,
    },

    /// `pump` was called while a pump was already running.
    #[error("pump is already running")]
    Reentrant,

    /// The execution thread was already bound to a different thread.
    #[error("execution thread already bound to {bound:?}")]
    AlreadyBound { bound: ThreadId },
}
