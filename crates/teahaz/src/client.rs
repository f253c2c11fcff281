//! `Teacup`: every chatroom a process is in, behind one handle.
//!
//! Each successful login, creation, or invite use registers the chatroom in
//! a [`ConnectionRegistry`] and makes it the active one. Subscriptions made
//! with [`Teacup::subscribe_all`] reach every chatroom, including ones
//! joined later.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use teahaz_chatroom::{
    Callback, Chatroom, ChatroomConfig, ConnectionContext, Event, EventBus, EventKind,
};
use teahaz_protocol::{ChatroomId, InviteId};
use teahaz_session::{ChatroomRecord, ConnectionRegistry, normalize_url};
use teahaz_transport::HttpSession;
use tracing::info;

use crate::TeahazError;

/// Builder for configuring a [`Teacup`].
///
/// # Example
///
/// ```rust,ignore
/// let teacup = Teacup::builder(Arc::new(ReqwestSession::new()?))
///     .config(ChatroomConfig::default())
///     .build();
/// let room = teacup.login("https://tea.example", &id, "alma", "pw").await?;
/// ```
pub struct TeacupBuilder<S> {
    session: Arc<S>,
    config: ChatroomConfig,
}

impl<S: HttpSession> TeacupBuilder<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            config: ChatroomConfig::default(),
        }
    }

    /// Configuration every chatroom is created with.
    pub fn config(mut self, config: ChatroomConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Teacup<S> {
        Teacup {
            session: self.session,
            config: self.config.validated(),
            registry: Mutex::new(ConnectionRegistry::new()),
            chatrooms: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

/// A client logged into any number of chatrooms on any number of servers,
/// all sharing one HTTP session.
pub struct Teacup<S> {
    session: Arc<S>,
    config: ChatroomConfig,
    registry: Mutex<ConnectionRegistry>,
    chatrooms: Mutex<Vec<Chatroom<S>>>,
    /// Subscriptions applied to every chatroom, present and future.
    subscribers: Mutex<Vec<(EventKind, Callback)>>,
}

#[cfg(feature = "reqwest")]
impl Teacup<teahaz_transport::ReqwestSession> {
    /// A client backed by a fresh `reqwest` session.
    pub fn with_reqwest() -> Result<Self, TeahazError> {
        let session = teahaz_transport::ReqwestSession::new()?;
        Ok(Self::new(Arc::new(session)))
    }
}

impl<S: HttpSession> Teacup<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self::builder(session).build()
    }

    pub fn builder(session: Arc<S>) -> TeacupBuilder<S> {
        TeacupBuilder::new(session)
    }

    // =====================================================================
    // Joining
    // =====================================================================

    /// Logs into `chatroom_id` on the server at `url`.
    ///
    /// If this client already logged in there as `username` and the session
    /// still holds the server's credential, no login request is sent; the
    /// chatroom only refreshes its channels.
    ///
    /// Returns `Ok(None)` if a failure subscriber took a failed request.
    pub async fn login(
        &self,
        url: &str,
        chatroom_id: &ChatroomId,
        username: &str,
        password: &str,
    ) -> Result<Option<Chatroom<S>>, TeahazError> {
        let url = normalize_url(url);
        let known = {
            let registry = lock(&self.registry);
            registry
                .find(&url, chatroom_id)
                .filter(|r| r.username == username)
                .cloned()
                .filter(|_| registry.is_authenticated(&url, self.session.as_ref()))
        };

        let mut builder = self.chatroom_builder(&url).chatroom_id(chatroom_id.clone());
        if let Some(record) = &known {
            builder = builder.chatroom_name(record.chatroom_name.clone());
        }
        let room = builder.build();

        let ctx = if known.is_some() {
            info!(server = %url, %chatroom_id, %username, "credential held, skipping login");
            room.resume(username).await?
        } else {
            room.login(username, password).await?
        };
        let Some(ctx) = ctx else {
            return Ok(None);
        };

        self.adopt(&url, &room, &ctx)?;
        Ok(Some(room))
    }

    /// Creates a chatroom on the server at `url` and joins it as its owner.
    pub async fn create_chatroom(
        &self,
        url: &str,
        name: &str,
        username: &str,
        password: &str,
    ) -> Result<Option<Chatroom<S>>, TeahazError> {
        let url = normalize_url(url);
        let room = self.chatroom_builder(&url).build();
        if room.create(name, username, password).await?.is_none() {
            return Ok(None);
        }

        self.adopt(&url, &room, &room.context())?;
        Ok(Some(room))
    }

    /// Joins a chatroom through an invite.
    pub async fn use_invite(
        &self,
        url: &str,
        chatroom_id: &ChatroomId,
        invite_id: &InviteId,
        username: &str,
        password: &str,
    ) -> Result<Option<Chatroom<S>>, TeahazError> {
        let url = normalize_url(url);
        let room = self.chatroom_builder(&url).build();
        if room
            .use_invite(chatroom_id, invite_id, username, password)
            .await?
            .is_none()
        {
            return Ok(None);
        }

        self.adopt(&url, &room, &room.context())?;
        Ok(Some(room))
    }

    // =====================================================================
    // Chatrooms
    // =====================================================================

    /// Finds a joined chatroom by name, or by id.
    pub fn get_chatroom(&self, name: &str) -> Option<Chatroom<S>> {
        lock(&self.chatrooms)
            .iter()
            .find(|room| {
                let ctx = room.context();
                ctx.chatroom_name() == Some(name)
                    || ctx.chatroom_id().is_some_and(|id| id.as_str() == name)
            })
            .cloned()
    }

    /// Every joined chatroom, in join order.
    pub fn chatrooms(&self) -> Vec<Chatroom<S>> {
        lock(&self.chatrooms).clone()
    }

    /// The chatroom joined most recently.
    pub fn active(&self) -> Option<Chatroom<S>> {
        let active = lock(&self.registry).active().cloned()?;
        lock(&self.chatrooms)
            .iter()
            .find(|room| {
                let ctx = room.context();
                ctx.server_url() == active.server_url
                    && ctx.chatroom_id() == Some(&active.chatroom_id)
                    && ctx.username() == Some(active.username.as_str())
            })
            .cloned()
    }

    /// A snapshot of the connection registry.
    pub fn registry(&self) -> ConnectionRegistry {
        lock(&self.registry).clone()
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    // =====================================================================
    // Events
    // =====================================================================

    /// Subscribes `callback` to `kind` on every chatroom, now and later.
    ///
    /// Message kinds start the poll task of each chatroom, so this must be
    /// called from within a Tokio runtime.
    pub fn subscribe_all<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        lock(&self.subscribers).push((kind, Arc::clone(&callback)));
        for room in lock(&self.chatrooms).iter() {
            room.subscribe_callback(kind, Arc::clone(&callback));
        }
    }

    /// Stops the poll task of every chatroom.
    pub fn stop(&self) {
        for room in lock(&self.chatrooms).iter() {
            room.stop();
        }
        info!("all chatrooms stopped");
    }

    // -- Internals --------------------------------------------------------

    /// A chatroom builder whose event bus already carries the failure
    /// subscribers, so failures during joining reach them.
    fn chatroom_builder(&self, url: &str) -> teahaz_chatroom::ChatroomBuilder<S> {
        let events = Arc::new(EventBus::new());
        for (kind, callback) in lock(&self.subscribers).iter() {
            if !kind.needs_polling() {
                events.subscribe_callback(*kind, Arc::clone(callback));
            }
        }
        Chatroom::builder(url, Arc::clone(&self.session))
            .config(self.config.clone())
            .events(events)
    }

    /// Registers a joined chatroom, makes it active, and hands it the
    /// message subscribers.
    fn adopt(&self, url: &str, room: &Chatroom<S>, ctx: &ConnectionContext) -> Result<(), TeahazError> {
        let (Some(chatroom_id), Some(username)) = (ctx.chatroom_id(), ctx.username()) else {
            return Err(teahaz_chatroom::ChatroomError::InvalidState(
                "joined chatroom has no id or user".into(),
            )
            .into());
        };
        let record = ChatroomRecord::new(
            chatroom_id.clone(),
            ctx.chatroom_name().unwrap_or_default(),
            username,
        );

        {
            let mut registry = lock(&self.registry);
            registry.register(url, record.clone());
            registry.set_active(url, &record)?;
        }

        for (kind, callback) in lock(&self.subscribers).iter() {
            if kind.needs_polling() {
                room.subscribe_callback(*kind, Arc::clone(callback));
            }
        }

        let mut chatrooms = lock(&self.chatrooms);
        chatrooms.retain(|existing| {
            let same = existing.context().server_url() == ctx.server_url()
                && existing.chatroom_id().as_ref() == Some(chatroom_id)
                && existing.context().username() == Some(username);
            if same {
                existing.stop();
            }
            !same
        });
        chatrooms.push(room.clone());

        info!(server = %url, %chatroom_id, %username, "chatroom joined");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
