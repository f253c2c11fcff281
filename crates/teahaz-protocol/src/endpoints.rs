//! Endpoint templates and the resolver that fills them in.
//!
//! Every API path is a template keyed by [`Endpoint`]. Resolution is a pure
//! function of two inputs: the server URL and (for most endpoints) the
//! chatroom id.

use std::fmt;

use crate::{ChatroomId, ProtocolError};

/// API prefix appended to every server URL.
pub const API_BASE: &str = "/api/v0";

/// The API endpoints of a Teahaz server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// POST: create a chatroom.
    Chatroom,
    /// POST: log into a chatroom.
    Login,
    /// GET/POST: list or create channels.
    Channels,
    /// GET/POST/DELETE: list, send, or delete messages.
    Messages,
    /// GET/POST: download or upload file chunks.
    Files,
    /// GET/POST: create or use an invite.
    Invites,
    /// GET: list users of a chatroom.
    Users,
}

impl Endpoint {
    /// Every endpoint, in table order.
    pub const ALL: [Endpoint; 7] = [
        Self::Chatroom,
        Self::Login,
        Self::Channels,
        Self::Messages,
        Self::Files,
        Self::Invites,
        Self::Users,
    ];

    /// The path template. `{base}` is `{url}/api/v0`; `{chatroom_id}` is the
    /// chatroom the request targets.
    pub fn template(self) -> &'static str {
        match self {
            Self::Chatroom => "{base}/chatroom",
            Self::Login => "{base}/login/{chatroom_id}",
            Self::Channels => "{base}/channels/{chatroom_id}",
            Self::Messages => "{base}/messages/{chatroom_id}",
            Self::Files => "{base}/files/{chatroom_id}",
            Self::Invites => "{base}/invites/{chatroom_id}",
            Self::Users => "{base}/users/{chatroom_id}",
        }
    }

    /// Whether the template contains `{chatroom_id}`.
    pub fn needs_chatroom(self) -> bool {
        self.template().contains("{chatroom_id}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Chatroom => "chatroom",
            Self::Login => "login",
            Self::Channels => "channels",
            Self::Messages => "messages",
            Self::Files => "files",
            Self::Invites => "invites",
            Self::Users => "users",
        };
        f.write_str(name)
    }
}

/// Maps an endpoint to a concrete URL for one server and chatroom.
///
/// Cheap to construct; callers build a fresh one from the current
/// connection context rather than mutating a shared instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResolver {
    url: String,
    chatroom_id: Option<ChatroomId>,
}

impl EndpointResolver {
    /// `url` is the server root (e.g. `https://teahaz.co.uk`); a trailing
    /// slash is ignored.
    pub fn new(url: impl Into<String>, chatroom_id: Option<ChatroomId>) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        Self { url, chatroom_id }
    }

    /// `{url}/api/v0`.
    pub fn base(&self) -> String {
        format!("{}{API_BASE}", self.url)
    }

    pub fn chatroom_id(&self) -> Option<&ChatroomId> {
        self.chatroom_id.as_ref()
    }

    /// Fills in the endpoint's template.
    ///
    /// # Errors
    /// [`ProtocolError::MissingChatroomId`] when the template needs a
    /// chatroom id and this resolver has none.
    pub fn resolve(&self, endpoint: Endpoint) -> Result<String, ProtocolError> {
        let mut path = endpoint.template().replace("{base}", &self.base());
        if endpoint.needs_chatroom() {
            let id = self
                .chatroom_id
                .as_ref()
                .ok_or(ProtocolError::MissingChatroomId(endpoint))?;
            path = path.replace("{chatroom_id}", id.as_str());
        }
        Ok(path)
    }
}
