//! Error types for the session layer.

/// Errors that can occur while updating the connection registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No chatroom has been registered for this server yet.
    ///
    /// A server has to be registered before one of its chatrooms can
    /// become the active identity.
    #[error("unknown server {0}")]
    UnknownServer(String),
}
