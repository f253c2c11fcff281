//! Error types for the protocol layer.
//!
//! A `ProtocolError` means the bytes arrived fine but did not make sense:
//! malformed JSON, a payload that does not decode, or a message whose
//! payload contradicts its declared type.

use crate::Endpoint;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A JSON body did not match the expected shape.
    #[error("decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// An encoded payload (message text, file chunk) could not be decoded.
    ///
    /// Decoding never returns partial data; the whole payload is rejected.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    /// The message is well-formed JSON but violates protocol rules, e.g. a
    /// `system` message without a system event.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The endpoint needs a chatroom id and none is known yet.
    #[error("endpoint {0} requires a chatroom id")]
    MissingChatroomId(Endpoint),
}
