//! JSON Schema validation for handler parameters.
//!
//! Descriptors declare their parameters as a JSON Schema document. The
//! registry compiles each document once at registration; the dispatcher
//! checks params against the compiled form before a call is queued.

use std::fmt;
use std::sync::Arc;

use jsonschema::{Validator, validator_for};
use serde_json::{Value, json};
use thiserror::Error;

/// Schema document that accepts every value.
pub fn accept_any() -> Value {
    json!({})
}

/// First mismatch between a params value and a compiled schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SchemaViolation {
    message: String,
}

impl SchemaViolation {
    /// Validator message describing the mismatch.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A parameter schema compiled for repeated validation.
#[derive(Clone)]
pub struct CompiledSchema {
    validator: Arc<Validator>,
}

impl CompiledSchema {
    /// Compiles `document`, detecting its draft from `$schema`.
    ///
    /// # Errors
    ///
    /// Returns the compiler's message when `document` is not a valid schema.
    pub fn compile(document: &Value) -> Result<Self, String> {
        let validator = validator_for(document).map_err(|error| error.to_string())?;
        Ok(Self {
            validator: Arc::new(validator),
        })
    }

    /// Checks `params` against the schema.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaViolation`] carrying the first error reported.
    pub fn validate(&self, params: &Value) -> Result<(), SchemaViolation> {
        let mut errors = self.validator.iter_errors(params);
        match errors.next() {
            Some(first) => Err(SchemaViolation {
                message: first.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}
