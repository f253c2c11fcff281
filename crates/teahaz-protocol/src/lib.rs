//! Wire types, endpoint templates, and payload codecs for Teahaz.
//!
//! This crate is pure data: it never touches the network. Transports move
//! bytes, this crate gives them meaning.

mod codec;
mod endpoints;
mod error;
mod transfer;
mod types;

pub use codec::{Base64Codec, PayloadCodec};
pub use endpoints::{API_BASE, Endpoint, EndpointResolver};
pub use error::ProtocolError;
pub use transfer::{Chunk, Chunks, SectionAccumulator, SectionStatus};
pub use types::{
    Channel, ChannelId, ChatroomId, ChatroomInfo, FileChunkReceipt, FileId, Invite, InviteId,
    Message, MessageId, MessageKind, Payload, SystemEvent, User, UserColor, UserId, WireMessage,
};
