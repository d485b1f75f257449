//! Response envelopes.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use super::codes::ErrorCode;
use super::request::RequestId;

/// Structured error carried by a failed response.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ErrorObject {
    /// Stable numeric code.
    pub code: i64,
    /// Short human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Builds an error object carrying the canonical message for `code`.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_owned(),
            data: None,
        }
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Correlated response to exactly one request.
///
/// `id` is absent only for connection-fatal errors where no id could be
/// recovered; it is then encoded as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    id: Option<RequestId>,
    outcome: Result<Value, ErrorObject>,
}

impl CommandResponse {
    /// Successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: Ok(result),
        }
    }

    /// Failed response correlated with a request.
    pub fn failure(id: RequestId, error: ErrorObject) -> Self {
        Self {
            id: Some(id),
            outcome: Err(error),
        }
    }

    /// Failed response for a frame whose id could not be recovered.
    pub fn uncorrelated(error: ErrorObject) -> Self {
        Self {
            id: None,
            outcome: Err(error),
        }
    }

    /// Correlation token echoed from the request.
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// Result or error carried by the response.
    pub fn outcome(&self) -> &Result<Value, ErrorObject> {
        &self.outcome
    }

    /// Returns true when the response carries a result.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl Serialize for CommandResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("id", &self.id)?;
        match &self.outcome {
            Ok(result) => map.serialize_entry("result", result)?,
            Err(error) => map.serialize_entry("error", error)?,
        }
        map.end()
    }
}
