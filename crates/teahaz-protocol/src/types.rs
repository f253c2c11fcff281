//! Core protocol types: identifiers, domain objects, and their wire shapes.
//!
//! Wire structs mirror the server's JSON field names exactly (`messageID`,
//! `channelID`, ...) via `#[serde(rename)]`; the domain types expose Rust
//! names and enforce the protocol's invariants on construction.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{PayloadCodec, ProtocolError};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Declares a string newtype identifier.
///
/// Server ids are opaque strings (UUIDs in practice). Wrapping each kind in
/// its own type keeps a `ChannelId` from being passed where a `MessageId`
/// is expected; `#[serde(transparent)]` keeps the JSON a plain string.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifies a chatroom on its server.
    ChatroomId
);
string_id!(
    /// Identifies a channel inside a chatroom.
    ChannelId
);
string_id!(
    /// Identifies a message.
    MessageId
);
string_id!(
    /// Identifies an uploaded file; assigned by the server on the first chunk.
    FileId
);
string_id!(
    /// Identifies an invite.
    InviteId
);
string_id!(
    /// Identifies a user.
    UserId
);

// ---------------------------------------------------------------------------
// Message kind and payload
// ---------------------------------------------------------------------------

/// The declared type of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    File,
    /// A system event clients normally display (a user joined, ...).
    System,
    /// A system event meant for debugging; clients normally hide it.
    SystemSilent,
    /// Marks an earlier message as deleted.
    Delete,
    /// A type this client does not know. Dispatched as a new message.
    Other(String),
}

impl MessageKind {
    /// Parses the wire `type` field. Never fails; unknown names become
    /// [`MessageKind::Other`].
    pub fn from_wire(name: &str) -> Self {
        match name {
            "text" => Self::Text,
            "file" => Self::File,
            "system" => Self::System,
            "system-silent" => Self::SystemSilent,
            "delete" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::System => "system",
            Self::SystemSilent => "system-silent",
            Self::Delete => "delete",
            Self::Other(name) => name,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System | Self::SystemSilent)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-generated event, carried only by system messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub event_type: String,
    /// Opaque, event-specific detail (usually the affected user).
    #[serde(rename = "user_info", alias = "event_info")]
    pub info: String,
}

/// The content of a message. Which variant is allowed depends on the
/// message's [`MessageKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    File(Vec<u8>),
    System(SystemEvent),
    /// The id of the message a `delete` message removes.
    Deleted(MessageId),
    /// Undecoded data of an unknown message kind.
    Raw(Value),
}

impl Payload {
    fn matches(&self, kind: &MessageKind) -> bool {
        matches!(
            (kind, self),
            (MessageKind::Text, Payload::Text(_))
                | (MessageKind::File, Payload::File(_))
                | (MessageKind::System | MessageKind::SystemSilent, Payload::System(_))
                | (MessageKind::Delete, Payload::Deleted(_))
                | (MessageKind::Other(_), Payload::Raw(_))
        )
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message as the server stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "messageID")]
    pub id: MessageId,
    #[serde(deserialize_with = "number_or_string")]
    pub time: f64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "channelID", default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "replyID", default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<MessageId>,
}

/// A decoded message.
///
/// Invariant: `payload` matches `kind` (text carries text, system kinds
/// carry a [`SystemEvent`], ...). Both are fixed at construction. System messages never carry a channel or
/// a sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Epoch seconds at which the server accepted the message.
    pub send_time: f64,
    kind: MessageKind,
    payload: Payload,
    pub channel_id: Option<ChannelId>,
    pub username: Option<String>,
    pub reply_id: Option<MessageId>,
}

impl Message {
    /// Builds a message, checking the payload against the kind.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] if the payload variant does not fit
    /// the kind.
    pub fn new(
        id: MessageId,
        send_time: f64,
        kind: MessageKind,
        payload: Payload,
        channel_id: Option<ChannelId>,
        username: Option<String>,
    ) -> Result<Self, ProtocolError> {
        if !payload.matches(&kind) {
            return Err(ProtocolError::InvalidMessage(format!(
                "message {id} of type {kind} has a mismatched payload"
            )));
        }
        let (channel_id, username) = if kind.is_system() {
            (None, None)
        } else {
            (channel_id, username)
        };
        Ok(Self {
            id,
            send_time,
            kind,
            payload,
            channel_id,
            username,
            reply_id: None,
        })
    }

    /// Decodes a wire message. Text and file data pass through `codec`.
    ///
    /// # Errors
    /// - [`ProtocolError::CorruptPayload`] when the encoded data is malformed.
    /// - [`ProtocolError::InvalidMessage`] when `data` has the wrong JSON
    ///   shape for the declared type.
    pub fn from_wire<C>(wire: WireMessage, codec: &C) -> Result<Self, ProtocolError>
    where
        C: PayloadCodec + ?Sized,
    {
        let kind = MessageKind::from_wire(&wire.kind);
        let payload = match &kind {
            MessageKind::Text => Payload::Text(codec.decode_text(expect_str(&wire, &kind)?)?),
            MessageKind::File => Payload::File(codec.decode(expect_str(&wire, &kind)?)?),
            MessageKind::System | MessageKind::SystemSilent => {
                Payload::System(serde_json::from_value(wire.data.clone()).map_err(|e| {
                    ProtocolError::InvalidMessage(format!(
                        "message {} has no system event: {e}",
                        wire.id
                    ))
                })?)
            }
            MessageKind::Delete => Payload::Deleted(MessageId::from(expect_str(&wire, &kind)?)),
            MessageKind::Other(_) => Payload::Raw(wire.data.clone()),
        };

        let mut message = Self::new(
            wire.id,
            wire.time,
            kind,
            payload,
            wire.channel_id,
            wire.username,
        )?;
        message.reply_id = wire.reply_id;
        Ok(message)
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::File(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn system_event(&self) -> Option<&SystemEvent> {
        match &self.payload {
            Payload::System(event) => Some(event),
            _ => None,
        }
    }

    pub fn deleted_id(&self) -> Option<&MessageId> {
        match &self.payload {
            Payload::Deleted(id) => Some(id),
            _ => None,
        }
    }
}

fn expect_str<'a>(wire: &'a WireMessage, kind: &MessageKind) -> Result<&'a str, ProtocolError> {
    wire.data.as_str().ok_or_else(|| {
        ProtocolError::InvalidMessage(format!(
            "message {} of type {kind} must carry string data",
            wire.id
        ))
    })
}

/// Accepts `1617.5` as well as `"1617.5"`; servers have sent both.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Channels, users, invites
// ---------------------------------------------------------------------------

/// A named sub-space of a chatroom. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "channelID")]
    pub id: ChannelId,
    #[serde(alias = "channel_name")]
    pub name: String,
    /// What the current user may do here (`r`, `w`, `x`, ...).
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,
}

impl Channel {
    pub fn can(&self, permission: &str) -> bool {
        self.permissions.get(permission).copied().unwrap_or(false)
    }
}

/// A user's display colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// A member of a chatroom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    /// Servers that key users by name omit this.
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    #[serde(default)]
    pub color: Option<UserColor>,
}

impl User {
    /// The colour as a `r;g;b` markup tag, or `None` if the user has none.
    pub fn color_tag(&self) -> Option<String> {
        self.color.map(|c| format!("{};{};{}", c.r, c.g, c.b))
    }
}

/// An invitation to join a chatroom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invite {
    pub url: String,
    #[serde(rename = "inviteID")]
    pub id: InviteId,
    #[serde(rename = "chatroomID")]
    pub chatroom_id: ChatroomId,
    /// Remaining uses.
    pub uses: u32,
    /// Epoch seconds after which the invite is void.
    #[serde(rename = "expiration-time", deserialize_with = "number_or_string")]
    pub expiration_time: f64,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Returned by chatroom creation, login, and invite use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatroomInfo {
    #[serde(rename = "chatroomID")]
    pub chatroom_id: ChatroomId,
    #[serde(rename = "chatroom_name", alias = "name", default)]
    pub name: String,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

/// Returned for every uploaded file chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunkReceipt {
    #[serde(rename = "fileId")]
    pub file_id: FileId,
}
