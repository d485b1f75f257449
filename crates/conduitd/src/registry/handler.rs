//! Handler callables and the errors they return.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::dispatch::CallContext;

/// Errors a handler reports back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    /// The operation failed. Application state may be partially mutated.
    #[error("{message}")]
    Failed {
        message: String,
        data: Option<Value>,
    },

    /// The handler rejected its parameters after schema validation passed.
    #[error("invalid params: {message}")]
    InvalidParams { message: String },

    /// The handler observed that its execution budget ran out.
    #[error("execution budget of {budget:?} exhausted")]
    TimedOut { budget: Duration },
}

impl HandlerError {
    /// Creates a failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            data: None,
        }
    }

    /// Creates a failure carrying structured detail for the client.
    pub fn failed_with_data(message: impl Into<String>, data: Value) -> Self {
        Self::Failed {
            message: message.into(),
            data: Some(data),
        }
    }

    /// Creates a handler-detected parameter error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }
}

/// Callable invoked for one method.
///
/// Any `Fn(&CallContext, Value) -> Result<Value, HandlerError>` that is
/// `Send + Sync` is a handler.
pub trait Handler: Send + Sync {
    /// Runs the operation with validated parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the operation cannot complete.
    fn call(&self, context: &CallContext, params: Value) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&CallContext, Value) -> Result<Value, HandlerError> + Send + Sync,
{
    fn call(&self, context: &CallContext, params: Value) -> Result<Value, HandlerError> {
        self(context, params)
    }
}
