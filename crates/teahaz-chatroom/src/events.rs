//! Events and the per-chatroom event bus.
//!
//! Every kind keeps an ordered list of subscribers. [`EventBus::notify`]
//! calls them one after another on the notifying task, in subscription
//! order. A kind with no subscribers swallows the event and `notify`
//! returns `false`; the caller decides whether that matters.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use teahaz_protocol::{Message, MessageKind};
use teahaz_transport::{HttpRequest, TransportError};
use tracing::{trace, warn};

use crate::RequestFailure;

// ---------------------------------------------------------------------------
// Kinds and events
// ---------------------------------------------------------------------------

/// What an event is about. Subscriptions are made per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A request came back with a non-200 status.
    Error,
    NewMessage,
    DeletedMessage,
    SystemMessage,
    SilentSystemMessage,
    /// A message this client sent was stored by the server.
    MessageSent,
    UserJoined,
    UserLeft,
    ServerInfo,
    /// A request did not complete (DNS, refused connection, timeout).
    NetworkException,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        Self::Error,
        Self::NewMessage,
        Self::DeletedMessage,
        Self::SystemMessage,
        Self::SilentSystemMessage,
        Self::MessageSent,
        Self::UserJoined,
        Self::UserLeft,
        Self::ServerInfo,
        Self::NetworkException,
    ];

    /// Whether subscribing to this kind needs the poll task. Only the two
    /// failure kinds are raised without polling.
    pub fn needs_polling(self) -> bool {
        !matches!(self, Self::Error | Self::NetworkException)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A transport failure together with the request that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkFailure {
    pub error: TransportError,
    pub request: HttpRequest,
}

/// An event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Error(RequestFailure),
    NetworkException(NetworkFailure),
    NewMessage(Message),
    DeletedMessage(Message),
    SystemMessage(Message),
    SilentSystemMessage(Message),
    MessageSent(Message),
    UserJoined(Message),
    UserLeft(Message),
    ServerInfo(Message),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Error(_) => EventKind::Error,
            Self::NetworkException(_) => EventKind::NetworkException,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::DeletedMessage(_) => EventKind::DeletedMessage,
            Self::SystemMessage(_) => EventKind::SystemMessage,
            Self::SilentSystemMessage(_) => EventKind::SilentSystemMessage,
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::UserJoined(_) => EventKind::UserJoined,
            Self::UserLeft(_) => EventKind::UserLeft,
            Self::ServerInfo(_) => EventKind::ServerInfo,
        }
    }

    /// The message this event is about, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Error(_) | Self::NetworkException(_) => None,
            Self::NewMessage(m)
            | Self::DeletedMessage(m)
            | Self::SystemMessage(m)
            | Self::SilentSystemMessage(m)
            | Self::MessageSent(m)
            | Self::UserJoined(m)
            | Self::UserLeft(m)
            | Self::ServerInfo(m) => Some(m),
        }
    }
}

/// The events a freshly received message raises, in delivery order.
///
/// `delete` raises `DeletedMessage`, `system` and `system-silent` raise
/// their own kinds, anything else (unknown types included) is a
/// `NewMessage`. A system event whose type is `user_joined`, `user_left`
/// or `server_info` also raises the matching specific kind, after the
/// system-message event.
pub fn events_for(message: &Message) -> Vec<Event> {
    let mut events = Vec::with_capacity(2);
    events.push(match message.kind() {
        MessageKind::Delete => Event::DeletedMessage(message.clone()),
        MessageKind::System => Event::SystemMessage(message.clone()),
        MessageKind::SystemSilent => Event::SilentSystemMessage(message.clone()),
        MessageKind::Text | MessageKind::File | MessageKind::Other(_) => {
            Event::NewMessage(message.clone())
        }
    });

    if let Some(system) = message.system_event() {
        match system.event_type.as_str() {
            "user_joined" => events.push(Event::UserJoined(message.clone())),
            "user_left" => events.push(Event::UserLeft(message.clone())),
            "server_info" => events.push(Event::ServerInfo(message.clone())),
            _ => {}
        }
    }
    events
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// A subscriber callback. Shared so one callback can serve many chatrooms.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Counter for subscription ids; unique across all buses in the process.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one subscription, for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Per-chatroom map from event kind to an ordered list of subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Callback)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `callback` to the subscribers of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_callback(kind, Arc::new(callback))
    }

    /// Like [`subscribe`](Self::subscribe), for an already shared callback.
    pub fn subscribe_callback(&self, kind: EventKind, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, callback));
        trace!(%kind, subscription = %id, "subscribed");
        id
    }

    /// Removes a subscription. Returns `false` if it was not found.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for list in subscribers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        self.subscriber_count(kind) > 0
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Calls every subscriber of the event's kind, in subscription order.
    ///
    /// Returns `false` when nobody is subscribed. Never fails: a panicking
    /// subscriber is logged and the remaining subscribers still run.
    ///
    /// The subscriber list is copied before the first call, so a callback
    /// may subscribe or unsubscribe without deadlocking; the change applies
    /// from the next event on.
    pub fn notify(&self, event: &Event) -> bool {
        let kind = event.kind();
        let callbacks: Vec<Callback> = match self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
        {
            Some(list) if !list.is_empty() => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            _ => return false,
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(%kind, "event subscriber panicked");
            }
        }
        true
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<EventKind, usize> =
            subscribers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use teahaz_protocol::{MessageId, Payload, SystemEvent};

    use super::*;

    fn text(id: &str) -> Message {
        Message::new(
            MessageId::from(id),
            1.0,
            MessageKind::Text,
            Payload::Text("hi".into()),
            None,
            Some("alma".into()),
        )
        .unwrap()
    }

    fn system(kind: MessageKind, event_type: &str) -> Message {
        Message::new(
            MessageId::from("sys"),
            1.0,
            kind,
            Payload::System(SystemEvent {
                event_type: event_type.into(),
                info: "bob".into(),
            }),
            None,
            None,
        )
        .unwrap()
    }

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(Event::kind).collect()
    }

    // =====================================================================
    // events_for()
    // =====================================================================

    #[test]
    fn test_events_for_text_is_new_message() {
        assert_eq!(kinds(&events_for(&text("a"))), vec![EventKind::NewMessage]);
    }

    #[test]
    fn test_events_for_unknown_kind_is_new_message() {
        let msg = Message::new(
            MessageId::from("x"),
            1.0,
            MessageKind::Other("reaction".into()),
            Payload::Raw(serde_json::Value::Null),
            None,
            None,
        )
        .unwrap();
        assert_eq!(kinds(&events_for(&msg)), vec![EventKind::NewMessage]);
    }

    #[test]
    fn test_events_for_delete() {
        let msg = Message::new(
            MessageId::from("d"),
            1.0,
            MessageKind::Delete,
            Payload::Deleted(MessageId::from("a")),
            None,
            None,
        )
        .unwrap();
        assert_eq!(kinds(&events_for(&msg)), vec![EventKind::DeletedMessage]);
    }

    #[test]
    fn test_events_for_system_join_raises_both_kinds() {
        let events = events_for(&system(MessageKind::System, "user_joined"));
        assert_eq!(kinds(&events), vec![EventKind::SystemMessage, EventKind::UserJoined]);
    }

    #[test]
    fn test_events_for_silent_system_server_info() {
        let events = events_for(&system(MessageKind::SystemSilent, "server_info"));
        assert_eq!(
            kinds(&events),
            vec![EventKind::SilentSystemMessage, EventKind::ServerInfo]
        );
    }

    #[test]
    fn test_events_for_other_system_event_is_plain() {
        let events = events_for(&system(MessageKind::System, "channel_created"));
        assert_eq!(kinds(&events), vec![EventKind::SystemMessage]);
    }

    // =====================================================================
    // EventBus
    // =====================================================================

    #[test]
    fn test_notify_without_subscribers_is_noop() {
        let bus = EventBus::new();
        assert!(!bus.notify(&Event::NewMessage(text("a"))));
    }

    #[test]
    fn test_notify_calls_subscribers_in_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 1..=3 {
            let log = Arc::clone(&log);
            bus.subscribe(EventKind::NewMessage, move |_| log.lock().unwrap().push(n));
        }

        assert!(bus.notify(&Event::NewMessage(text("a"))));

        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(bus.subscriber_count(EventKind::NewMessage), 3);
    }

    #[test]
    fn test_notify_only_reaches_matching_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe(EventKind::DeletedMessage, move |_| *h.lock().unwrap() += 1);

        assert!(!bus.notify(&Event::NewMessage(text("a"))));
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_subscription() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = Arc::clone(&log);
        let first = bus.subscribe(EventKind::NewMessage, move |_| l1.lock().unwrap().push("first"));
        let l2 = Arc::clone(&log);
        bus.subscribe(EventKind::NewMessage, move |_| l2.lock().unwrap().push("second"));

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        bus.notify(&Event::NewMessage(text("a")));

        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_others() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));
        bus.subscribe(EventKind::NewMessage, |_| panic!("subscriber bug"));
        let r = Arc::clone(&reached);
        bus.subscribe(EventKind::NewMessage, move |_| *r.lock().unwrap() = true);

        assert!(bus.notify(&Event::NewMessage(text("a"))));
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn test_subscriber_may_subscribe_during_notify() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(EventKind::NewMessage, move |_| {
            inner.subscribe(EventKind::NewMessage, |_| {});
        });

        bus.notify(&Event::NewMessage(text("a")));

        assert_eq!(bus.subscriber_count(EventKind::NewMessage), 2);
    }

    #[test]
    fn test_event_message_accessor() {
        assert!(Event::NewMessage(text("a")).message().is_some());
        assert_eq!(Event::MessageSent(text("a")).kind(), EventKind::MessageSent);
    }

    #[test]
    fn test_only_failure_kinds_skip_polling() {
        let quiet: Vec<_> = EventKind::ALL.into_iter().filter(|k| !k.needs_polling()).collect();
        assert_eq!(quiet, vec![EventKind::Error, EventKind::NetworkException]);
    }
}
