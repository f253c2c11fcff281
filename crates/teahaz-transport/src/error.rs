/// Errors that can occur in the transport layer.
///
/// These are failures to *talk* to the server at all. A server that answers
/// with a non-200 status is not a transport failure; that is an
/// application-level outcome handled above this crate.
///
/// Every variant carries a rendered message rather than the backend's error
/// type, so the error stays `Clone` and can be handed to several event
/// subscribers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request used an HTTP method the protocol does not speak.
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// The target URL could not be parsed or used.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// DNS resolution failed or the connection was refused.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request did not complete within its deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Any other failure while sending the request or reading the body.
    #[error("request failed: {0}")]
    Request(String),
}
