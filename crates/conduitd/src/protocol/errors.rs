//! Errors raised while decoding request frames.
//!
//! Whether an error ends the connection depends on whether the request id
//! could be recovered: the decoder reports recoverable failures alongside the
//! id (see [`RejectedRequest`](super::RejectedRequest)) and everything else
//! as a frame-level [`ProtocolError`].

use thiserror::Error;

/// Malformed request envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame contained no bytes other than whitespace.
    #[error("empty request frame")]
    EmptyFrame,

    /// The frame is not valid JSON.
    #[error("malformed JSON: {message}")]
    MalformedJson {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// The frame is valid JSON but neither an object nor an array.
    #[error("request frame must be an object or an array, found {found}")]
    UnexpectedFrame { found: &'static str },

    /// A batch frame contained no requests.
    #[error("batch contains no requests")]
    EmptyBatch,

    /// A batch frame arrived while batching is disabled.
    #[error("batched requests are disabled")]
    BatchesDisabled,

    /// The envelope carries no `id` member.
    #[error("request is missing the id member")]
    MissingId,

    /// The `id` member is present but is neither a string nor a number.
    #[error("request id must be a string or a number, found {found}")]
    UnrecoverableId { found: &'static str },

    /// The `method` member is absent.
    #[error("request is missing the method member")]
    MissingMethod,

    /// The `method` member is not a non-empty string.
    #[error("request method must be a non-empty string")]
    InvalidMethod,

    /// The envelope declares an unsupported protocol version.
    #[error("unsupported jsonrpc version '{version}'")]
    UnsupportedVersion { version: String },

    /// The `params` member cannot be treated as a structured value.
    #[error("params must be an object or an array, found {found}")]
    UnstructuredParams { found: &'static str },
}

impl ProtocolError {
    /// Creates a malformed JSON error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedJson {
            message: source.to_string(),
            source,
        }
    }
}
