//! The immutable connection context of a chatroom.
//!
//! Login, channel discovery, and channel selection each produce a *new*
//! context; the chatroom swaps it in under a lock. The poll task and
//! foreground calls therefore always see a consistent (server, chatroom,
//! user, channel) tuple, never one that is half-updated.

use teahaz_protocol::{Channel, ChannelId, ChatroomId, EndpointResolver};

use crate::ChatroomError;

/// Who this chatroom is talking to, as whom, and in which channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    server_url: String,
    chatroom_id: Option<ChatroomId>,
    chatroom_name: Option<String>,
    username: Option<String>,
    /// Known channels, unique by id, in discovery order.
    channels: Vec<Channel>,
    active_channel: Option<ChannelId>,
}

impl ConnectionContext {
    /// A context for a server with nothing known yet.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            chatroom_id: None,
            chatroom_name: None,
            username: None,
            channels: Vec::new(),
            active_channel: None,
        }
    }

    // -- Builders (each returns a new context) ----------------------------

    /// Points the context at chatroom `id`. Moving to a different chatroom
    /// forgets the old one's name, user, and channels.
    pub fn with_chatroom(&self, id: ChatroomId, name: Option<String>) -> Self {
        if self.chatroom_id.as_ref().is_some_and(|current| *current != id) {
            return Self {
                chatroom_id: Some(id),
                chatroom_name: name,
                ..Self::new(self.server_url.clone())
            };
        }
        Self {
            chatroom_id: Some(id),
            chatroom_name: name.or_else(|| self.chatroom_name.clone()),
            ..self.clone()
        }
    }

    pub fn with_username(&self, username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..self.clone()
        }
    }

    /// Adds channels not known yet (by id). If no channel is active, the
    /// first known one becomes active.
    pub fn with_channels(&self, channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut next = self.clone();
        for channel in channels {
            if !next.channels.iter().any(|c| c.id == channel.id) {
                next.channels.push(channel);
            }
        }
        if next.active_channel.is_none() {
            next.active_channel = next.channels.first().map(|c| c.id.clone());
        }
        next
    }

    /// Makes `channel` active, adding it to the known channels if needed.
    pub fn with_active_channel(&self, channel: Channel) -> Self {
        let id = channel.id.clone();
        let mut next = self.with_channels([channel]);
        next.active_channel = Some(id);
        next
    }

    // -- Accessors --------------------------------------------------------

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn chatroom_id(&self) -> Option<&ChatroomId> {
        self.chatroom_id.as_ref()
    }

    pub fn chatroom_name(&self) -> Option<&str> {
        self.chatroom_name.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn active_channel(&self) -> Option<&Channel> {
        let id = self.active_channel.as_ref()?;
        self.channels.iter().find(|c| &c.id == id)
    }

    /// An endpoint resolver for this server and chatroom.
    pub fn resolver(&self) -> EndpointResolver {
        EndpointResolver::new(self.server_url.clone(), self.chatroom_id.clone())
    }

    // -- Preconditions ----------------------------------------------------

    pub(crate) fn require_chatroom(&self) -> Result<&ChatroomId, ChatroomError> {
        self.chatroom_id.as_ref().ok_or_else(|| {
            ChatroomError::InvalidState("no chatroom id; create or log into a chatroom first".into())
        })
    }

    pub(crate) fn require_username(&self) -> Result<&str, ChatroomError> {
        self.username
            .as_deref()
            .ok_or_else(|| ChatroomError::InvalidState("not logged in".into()))
    }

    pub(crate) fn require_channel(&self) -> Result<&Channel, ChatroomError> {
        self.active_channel().ok_or_else(|| {
            ChatroomError::InvalidState("no active channel; call set_channel first".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str) -> Channel {
        Channel {
            id: ChannelId::from(id),
            name: format!("#{id}"),
            permissions: Default::default(),
        }
    }

    #[test]
    fn test_with_channels_dedupes_and_selects_first() {
        let ctx = ConnectionContext::new("https://a.example/")
            .with_channels([channel("c1"), channel("c2")])
            .with_channels([channel("c2"), channel("c3")]);

        let ids: Vec<_> = ctx.channels().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(ctx.active_channel().map(|c| c.id.as_str()), Some("c1"));
        assert_eq!(ctx.server_url(), "https://a.example");
    }

    #[test]
    fn test_with_active_channel_adds_unknown_channel() {
        let ctx = ConnectionContext::new("u")
            .with_channels([channel("c1")])
            .with_active_channel(channel("c9"));

        assert_eq!(ctx.channels().len(), 2);
        assert_eq!(ctx.active_channel().map(|c| c.id.as_str()), Some("c9"));
    }

    #[test]
    fn test_builders_leave_original_untouched() {
        let base = ConnectionContext::new("u");
        let next = base
            .with_chatroom(ChatroomId::from("r1"), Some("tea".into()))
            .with_username("alma");

        assert!(base.chatroom_id().is_none());
        assert!(base.username().is_none());
        assert_eq!(next.chatroom_name(), Some("tea"));
        assert_eq!(next.username(), Some("alma"));
    }

    #[test]
    fn test_with_chatroom_keeps_known_name() {
        let ctx = ConnectionContext::new("u")
            .with_chatroom(ChatroomId::from("r1"), Some("tea".into()))
            .with_chatroom(ChatroomId::from("r1"), None);
        assert_eq!(ctx.chatroom_name(), Some("tea"));
    }

    #[test]
    fn test_with_chatroom_other_id_forgets_channels() {
        let ctx = ConnectionContext::new("u")
            .with_chatroom(ChatroomId::from("r1"), Some("tea".into()))
            .with_username("alma")
            .with_channels([channel("c1")])
            .with_chatroom(ChatroomId::from("r2"), None);

        assert_eq!(ctx.chatroom_id().map(ChatroomId::as_str), Some("r2"));
        assert!(ctx.chatroom_name().is_none());
        assert!(ctx.username().is_none());
        assert!(ctx.channels().is_empty());
        assert!(ctx.active_channel().is_none());
        assert_eq!(ctx.server_url(), "u");
    }

    #[test]
    fn test_require_checks_report_invalid_state() {
        let ctx = ConnectionContext::new("u");
        assert!(matches!(ctx.require_chatroom(), Err(ChatroomError::InvalidState(_))));
        assert!(matches!(ctx.require_username(), Err(ChatroomError::InvalidState(_))));
        assert!(matches!(ctx.require_channel(), Err(ChatroomError::InvalidState(_))));
    }

    #[test]
    fn test_resolver_uses_context_ids() {
        let ctx = ConnectionContext::new("http://h").with_chatroom(ChatroomId::from("r1"), None);
        assert_eq!(
            ctx.resolver().resolve(teahaz_protocol::Endpoint::Messages).unwrap(),
            "http://h/api/v0/messages/r1"
        );
    }
}
