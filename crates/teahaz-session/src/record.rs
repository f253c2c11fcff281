//! Records of chatrooms the process has logged into.

use serde::{Deserialize, Serialize};
use teahaz_protocol::ChatroomId;

// ---------------------------------------------------------------------------
// ChatroomRecord
// ---------------------------------------------------------------------------

/// One chatroom the process is authenticated against, as stored under its
/// server's URL.
///
/// Two records are the same record when all three fields match; the
/// registry never holds duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatroomRecord {
    pub chatroom_id: ChatroomId,
    pub chatroom_name: String,
    pub username: String,
}

impl ChatroomRecord {
    pub fn new(
        chatroom_id: impl Into<ChatroomId>,
        chatroom_name: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            chatroom_id: chatroom_id.into(),
            chatroom_name: chatroom_name.into(),
            username: username.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActiveChatroom
// ---------------------------------------------------------------------------

/// The identity currently in use: a record plus the server it lives on.
///
/// This is a copy, not a reference into the registry. Removing the record
/// later does not change an identity that was already handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveChatroom {
    /// Normalised server URL.
    pub server_url: String,
    pub chatroom_id: ChatroomId,
    pub chatroom_name: String,
    pub username: String,
}

impl ActiveChatroom {
    pub(crate) fn from_record(server_url: String, record: &ChatroomRecord) -> Self {
        Self {
            server_url,
            chatroom_id: record.chatroom_id.clone(),
            chatroom_name: record.chatroom_name.clone(),
            username: record.username.clone(),
        }
    }

    /// The record this identity was copied from.
    pub fn record(&self) -> ChatroomRecord {
        ChatroomRecord {
            chatroom_id: self.chatroom_id.clone(),
            chatroom_name: self.chatroom_name.clone(),
            username: self.username.clone(),
        }
    }
}
