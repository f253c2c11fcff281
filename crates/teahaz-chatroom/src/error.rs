//! Error types for the chatroom layer.

use teahaz_protocol::ProtocolError;
use teahaz_transport::{HttpRequest, Method, TransportError};

/// A request that reached the server and came back with a status other
/// than 200.
///
/// Carries the full request so a handler (or a log line) can tell exactly
/// what was asked.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{method} {url} failed with status {status}: {body}")]
pub struct RequestFailure {
    pub method: Method,
    pub url: String,
    pub status: u16,
    /// Response body as text.
    pub body: String,
    pub request: HttpRequest,
}

/// Errors returned by the request dispatcher.
///
/// Only failures nobody subscribed to end up here; a subscribed failure is
/// delivered as an event and the call returns `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The exchange did not complete (DNS, refused connection, timeout).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-200 status.
    #[error(transparent)]
    Request(#[from] RequestFailure),

    /// A 200 response whose body is not JSON.
    #[error("response body is not JSON: {0}")]
    MalformedBody(#[from] serde_json::Error),

    /// The task running the request panicked or was cancelled.
    #[error("dispatch task failed: {0}")]
    TaskFailed(String),
}

/// Errors that can occur during chatroom operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatroomError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The chatroom is not in a state that allows this operation, e.g.
    /// sending before a channel is selected or logging in without a
    /// chatroom id.
    #[error("invalid chatroom state: {0}")]
    InvalidState(String),
}

impl ChatroomError {
    /// The failed request, if this error came from a non-200 response.
    pub fn request_failure(&self) -> Option<&RequestFailure> {
        match self {
            Self::Dispatch(DispatchError::Request(failure)) => Some(failure),
            _ => None,
        }
    }
}
