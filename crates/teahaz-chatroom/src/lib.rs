//! Chatroom orchestration for Teahaz.
//!
//! A [`Chatroom`] is one logged-in conversation on one server. It owns:
//!
//! - a [`RequestDispatcher`] that runs every HTTP call on its own Tokio
//!   task, either joined (blocking) or detached behind a [`DispatchHandle`];
//! - an [`EventBus`] with an ordered subscriber list per [`EventKind`];
//! - a poll task that turns "messages since T" into deduplicated, ordered
//!   events, started the first time a message event is subscribed;
//! - an immutable [`ConnectionContext`] that is replaced, never mutated,
//!   when login or channel selection changes it.
//!
//! # Failure routing
//!
//! A non-200 response or a transport failure is first offered to the
//! chatroom's [`EventKind::Error`] / [`EventKind::NetworkException`]
//! subscribers. If one exists the operation returns `Ok(None)`; otherwise
//! the failure comes back as an `Err`.

mod chatroom;
mod config;
mod context;
mod dispatch;
mod error;
mod events;
mod poll;
mod transfer;

pub use chatroom::{Chatroom, ChatroomBuilder, MessageQuery};
pub use config::{ChatroomConfig, ChatroomState, DispatchConfig, TransferConfig};
pub use context::ConnectionContext;
pub use dispatch::{
    DispatchHandle, DispatchMode, DispatchResult, DispatchStatus, Dispatched, RequestDispatcher,
};
pub use error::{ChatroomError, DispatchError, RequestFailure};
pub use events::{Callback, Event, EventBus, EventKind, NetworkFailure, SubscriptionId, events_for};
