//! Unified error type for the Teahaz client.

use teahaz_chatroom::{ChatroomError, DispatchError, RequestFailure};
use teahaz_protocol::ProtocolError;
use teahaz_session::RegistryError;
use teahaz_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `teahaz` meta-crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attributes let `?` convert sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TeahazError {
    /// The server could not be reached.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A response or payload did not decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection registry refused an update.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A request was rejected or failed in flight.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A chatroom operation failed.
    #[error(transparent)]
    Chatroom(#[from] ChatroomError),
}

impl TeahazError {
    /// The rejected request, if the server answered with a non-200 status.
    pub fn request_failure(&self) -> Option<&RequestFailure> {
        match self {
            Self::Dispatch(DispatchError::Request(failure)) => Some(failure),
            Self::Chatroom(err) => err.request_failure(),
            _ => None,
        }
    }
}
