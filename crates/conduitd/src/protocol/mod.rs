//! Wire codec for the bridge protocol.
//!
//! Requests and responses are JSON documents, one per newline-terminated
//! frame:
//!
//! ```json
//! {"id":1,"method":"asset.list","params":{"path":"/Game"}}
//! ```
//!
//! ```json
//! {"id":1,"result":{"assets":["/Game/Hero"]}}
//! {"id":2,"error":{"code":-32601,"message":"Method not found"}}
//! ```
//!
//! A frame may also carry a JSON array of request objects; each element is
//! decoded independently and answered on its own line. The codec is pure and
//! holds no state beyond its policy flags.

mod codes;
mod errors;
mod request;
mod response;

use serde_json::json;

pub use self::codes::ErrorCode;
pub use self::errors::ProtocolError;
pub use self::request::{CommandRequest, Decoded, RejectedRequest, RequestId};
pub use self::response::{CommandResponse, ErrorObject};

/// Bytes emitted if a response cannot be serialised.
const ENCODE_FALLBACK: &[u8] =
    b"{\"id\":null,\"error\":{\"code\":-32000,\"message\":\"Handler execution failed\"}}\n";

/// Decoder and encoder for request and response frames.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    allow_batches: bool,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            allow_batches: true,
        }
    }
}

impl Codec {
    /// Creates a codec with the given batching policy.
    pub fn new(allow_batches: bool) -> Self {
        Self { allow_batches }
    }

    /// Decodes one frame into its request envelopes.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when no request id can be recovered from
    /// the frame. Such failures are connection-fatal. Envelopes that fail
    /// after their id is known are reported as [`RejectedRequest`] entries
    /// instead.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<Decoded>, ProtocolError> {
        request::decode_frame(bytes, self.allow_batches)
    }

    /// Encodes a response as a newline-terminated frame.
    pub fn encode(&self, response: &CommandResponse) -> Vec<u8> {
        match serde_json::to_vec(response) {
            Ok(mut bytes) => {
                bytes.push(b'\n');
                bytes
            }
            Err(_) => ENCODE_FALLBACK.to_vec(),
        }
    }
}

/// Builds the error object reported for a malformed envelope.
pub fn protocol_error_object(error: &ProtocolError) -> ErrorObject {
    ErrorObject::new(ErrorCode::InvalidRequest).with_data(json!({ "reason": error.to_string() }))
}
