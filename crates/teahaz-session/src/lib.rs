//! Connection bookkeeping for Teahaz clients.
//!
//! A process may be logged into several chatrooms on several servers at
//! once. The [`ConnectionRegistry`] remembers which (server, chatroom, user)
//! triples it has authenticated against, which one is active, and whether
//! the HTTP session still holds a credential for a server, so a client can
//! skip a redundant login.
//!
//! # How it fits in the stack
//!
//! ```text
//! Chatroom / Teacup (above)  ← registers every successful login here
//!     ↕
//! Session Layer (this crate)  ← remembers servers, chatrooms, users
//!     ↕
//! Transport (below)  ← answers "do we already hold a cookie for this host?"
//! ```

mod error;
mod record;
mod registry;

pub use error::RegistryError;
pub use record::{ActiveChatroom, ChatroomRecord};
pub use registry::{ConnectionRegistry, normalize_url};
