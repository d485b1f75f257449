//! Request envelopes and frame decoding.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::errors::ProtocolError;

/// Client-supplied correlation token.
///
/// The bridge never interprets the token; it only echoes it back on the
/// response so clients can match replies to requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric token.
    Number(Number),
    /// String token.
    Text(String),
}

impl RequestId {
    fn from_value(value: Value) -> Result<Self, ProtocolError> {
        match value {
            Value::Number(number) => Ok(Self::Number(number)),
            Value::String(text) => Ok(Self::Text(text)),
            other => Err(ProtocolError::UnrecoverableId {
                found: json_kind(&other),
            }),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(formatter, "{number}"),
            Self::Text(text) => write!(formatter, "\"{text}\""),
        }
    }
}

/// Decoded command request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    id: RequestId,
    method: String,
    params: Value,
}

impl CommandRequest {
    /// Builds a request directly, bypassing the wire format.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Correlation token supplied by the client.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Method name used for registry lookup.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Structured parameters (an object or an array).
    pub fn params(&self) -> &Value {
        &self.params
    }

    pub(crate) fn into_parts(self) -> (RequestId, String, Value) {
        (self.id, self.method, self.params)
    }
}

/// Request whose envelope was invalid but whose id was recovered, so the
/// failure can be answered without closing the connection.
#[derive(Debug)]
pub struct RejectedRequest {
    /// Recovered correlation token.
    pub id: RequestId,
    /// Reason the envelope was rejected.
    pub error: ProtocolError,
}

/// Outcome of decoding one envelope within a frame.
pub type Decoded = Result<CommandRequest, RejectedRequest>;

/// Decodes a frame into its envelopes.
///
/// The outer error is connection-fatal: no id could be recovered, so the
/// failure cannot be correlated with a request.
pub(super) fn decode_frame(
    bytes: &[u8],
    allow_batches: bool,
) -> Result<Vec<Decoded>, ProtocolError> {
    let trimmed = trim_ascii_whitespace(bytes);
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }

    let value: Value = serde_json::from_slice(trimmed).map_err(ProtocolError::from_json_error)?;
    match value {
        Value::Object(envelope) => Ok(vec![decode_envelope(envelope)?]),
        Value::Array(items) => {
            if !allow_batches {
                return Err(ProtocolError::BatchesDisabled);
            }
            if items.is_empty() {
                return Err(ProtocolError::EmptyBatch);
            }
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(envelope) => decode_envelope(envelope),
                    other => Err(ProtocolError::UnexpectedFrame {
                        found: json_kind(&other),
                    }),
                })
                .collect()
        }
        other => Err(ProtocolError::UnexpectedFrame {
            found: json_kind(&other),
        }),
    }
}

fn decode_envelope(mut envelope: Map<String, Value>) -> Result<Decoded, ProtocolError> {
    let id = match envelope.remove("id") {
        Some(value) => RequestId::from_value(value)?,
        None => return Err(ProtocolError::MissingId),
    };

    Ok(match decode_body(envelope) {
        Ok((method, params)) => Ok(CommandRequest { id, method, params }),
        Err(error) => Err(RejectedRequest { id, error }),
    })
}

fn decode_body(mut envelope: Map<String, Value>) -> Result<(String, Value), ProtocolError> {
    if let Some(version) = envelope.remove("jsonrpc") {
        match version {
            Value::String(text) if text == "2.0" => {}
            Value::String(text) => return Err(ProtocolError::UnsupportedVersion { version: text }),
            other => {
                return Err(ProtocolError::UnsupportedVersion {
                    version: other.to_string(),
                });
            }
        }
    }

    let method = match envelope.remove("method") {
        Some(Value::String(method)) if !method.trim().is_empty() => method,
        Some(_) => return Err(ProtocolError::InvalidMethod),
        None => return Err(ProtocolError::MissingMethod),
    };

    let params = match envelope.remove("params") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(params @ (Value::Object(_) | Value::Array(_))) => params,
        Some(other) => {
            return Err(ProtocolError::UnstructuredParams {
                found: json_kind(&other),
            });
        }
    };

    Ok((method, params))
}

/// Names the JSON type of a value for error messages.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    bytes.get(start..end).unwrap_or_default()
}
