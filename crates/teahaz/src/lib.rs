//! # Teahaz
//!
//! Async client runtime for Teahaz chat servers.
//!
//! A [`Chatroom`](teahaz_chatroom::Chatroom) is one conversation on one
//! server: it sends requests through a bounded dispatcher, polls for new
//! messages in the background, and reports what happens through
//! per-kind event subscriptions. [`Teacup`] manages many chatrooms over one
//! HTTP session and remembers where it is logged in.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use teahaz::prelude::*;
//!
//! # async fn run() -> Result<(), TeahazError> {
//! let teacup = Teacup::with_reqwest()?;
//! let id = ChatroomId::from("chatroom-id");
//! if let Some(room) = teacup.login("https://tea.example", &id, "alma", "pw").await? {
//!     room.subscribe(EventKind::NewMessage, |event| {
//!         if let Some(text) = event.message().and_then(|m| m.text()) {
//!             println!("{text}");
//!         }
//!     });
//!     room.send("hello", None).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
pub mod logging;

pub use client::{Teacup, TeacupBuilder};
pub use error::TeahazError;

pub use teahaz_chatroom as chatroom;
pub use teahaz_poll as poll;
pub use teahaz_protocol as protocol;
pub use teahaz_session as session;
pub use teahaz_transport as transport;

pub mod prelude {
    pub use crate::{Teacup, TeacupBuilder, TeahazError};
    pub use teahaz_chatroom::{
        Chatroom, ChatroomConfig, DispatchConfig, Event, EventKind, MessageQuery, TransferConfig,
    };
    pub use teahaz_poll::PollConfig;
    pub use teahaz_protocol::{
        Channel, ChannelId, ChatroomId, FileId, InviteId, Message, MessageId, MessageKind, User,
    };
    pub use teahaz_session::ConnectionRegistry;
    pub use teahaz_transport::HttpSession;
    #[cfg(feature = "reqwest")]
    pub use teahaz_transport::ReqwestSession;
}
