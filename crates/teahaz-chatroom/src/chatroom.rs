//! The chatroom orchestrator.
//!
//! [`Chatroom`] ties the pieces together: it resolves endpoints from its
//! current [`ConnectionContext`], sends requests through its
//! [`RequestDispatcher`], decodes responses into domain types, and owns the
//! [`EventBus`] and poll task that report what other people do.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use teahaz_poll::{MessageTracker, PollMetrics};
use teahaz_protocol::{
    Base64Codec, Channel, ChannelId, ChatroomId, ChatroomInfo, Endpoint, EndpointResolver, FileId,
    Invite, InviteId, Message, MessageId, PayloadCodec, ProtocolError, User, WireMessage,
};
use teahaz_transport::{HttpRequest, HttpSession};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::poll::{self, epoch_now};
use crate::transfer::{self, UploadTarget};
use crate::{
    Callback, ChatroomConfig, ChatroomError, ChatroomState, ConnectionContext, Event, EventBus,
    EventKind, RequestDispatcher, SubscriptionId,
};

// ---------------------------------------------------------------------------
// MessageQuery
// ---------------------------------------------------------------------------

/// Which messages [`Chatroom::get_messages`] asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageQuery {
    /// Every message sent after this epoch time.
    Since(f64),
    /// The latest `n` messages.
    Count(u32),
}

/// Builds the GET request for a channel's messages. GET parameters travel
/// as headers.
pub(crate) fn messages_request(
    ctx: &ConnectionContext,
    channel_id: &ChannelId,
    query: MessageQuery,
) -> Result<HttpRequest, ChatroomError> {
    let mut request = HttpRequest::get(ctx.resolver().resolve(Endpoint::Messages)?)
        .header("channelID", channel_id.as_str());
    if let Some(username) = ctx.username() {
        request = request.header("username", username);
    }
    Ok(match query {
        MessageQuery::Since(time) => request
            .header("get-method", "since")
            .header("time", time.to_string()),
        MessageQuery::Count(count) => request
            .header("get-method", "count")
            .header("count", count.to_string()),
    })
}

/// Decodes a message list. A `null` body is an empty list.
pub(crate) fn decode_messages(
    body: Value,
    codec: &dyn PayloadCodec,
) -> Result<Vec<Message>, ProtocolError> {
    if body.is_null() {
        return Ok(Vec::new());
    }
    let wire: Vec<WireMessage> = serde_json::from_value(body)?;
    wire.into_iter()
        .map(|w| Message::from_wire(w, codec))
        .collect()
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Lifecycle {
    state: ChatroomState,
    task: Option<JoinHandle<()>>,
}

/// State shared between the chatroom handles and the poll task.
pub(crate) struct Shared<S> {
    context: RwLock<Arc<ConnectionContext>>,
    pub(crate) dispatcher: RequestDispatcher<S>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) codec: Arc<dyn PayloadCodec>,
    config: ChatroomConfig,
    pub(crate) tracker: Mutex<MessageTracker>,
    pub(crate) poll_metrics: Mutex<PollMetrics>,
    lifecycle: Mutex<Lifecycle>,
    stop_tx: watch::Sender<bool>,
}

impl<S> Shared<S> {
    pub(crate) fn context(&self) -> Arc<ConnectionContext> {
        Arc::clone(&self.context.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures a [`Chatroom`] before it is created.
pub struct ChatroomBuilder<S> {
    url: String,
    session: Arc<S>,
    config: ChatroomConfig,
    codec: Arc<dyn PayloadCodec>,
    events: Option<Arc<EventBus>>,
    chatroom_id: Option<ChatroomId>,
    chatroom_name: Option<String>,
}

impl<S: HttpSession> ChatroomBuilder<S> {
    pub fn config(mut self, config: ChatroomConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the base64 payload codec.
    pub fn codec(mut self, codec: impl PayloadCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Uses an existing event bus, e.g. one whose subscribers should hear
    /// about failures during creation.
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// The chatroom to log into. Not needed for [`Chatroom::create`].
    pub fn chatroom_id(mut self, id: impl Into<ChatroomId>) -> Self {
        self.chatroom_id = Some(id.into());
        self
    }

    pub fn chatroom_name(mut self, name: impl Into<String>) -> Self {
        self.chatroom_name = Some(name.into());
        self
    }

    pub fn build(self) -> Chatroom<S> {
        let config = self.config.validated();
        let events = self.events.unwrap_or_default();
        let dispatcher =
            RequestDispatcher::new(self.session, Arc::clone(&events), config.dispatch.clone());

        let mut context = ConnectionContext::new(self.url);
        if let Some(id) = self.chatroom_id {
            context = context.with_chatroom(id, self.chatroom_name);
        }

        let (stop_tx, _) = watch::channel(false);
        Chatroom {
            shared: Arc::new(Shared {
                context: RwLock::new(Arc::new(context)),
                dispatcher,
                events,
                codec: self.codec,
                config,
                tracker: Mutex::new(MessageTracker::new(epoch_now())),
                poll_metrics: Mutex::new(PollMetrics::default()),
                lifecycle: Mutex::new(Lifecycle {
                    state: ChatroomState::Idle,
                    task: None,
                }),
                stop_tx,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Chatroom
// ---------------------------------------------------------------------------

/// One conversation on one server, seen as one user.
///
/// Cheap to clone; clones share everything. Every network operation
/// returns `Ok(None)` when its request failed and an `Error` or
/// `NetworkException` subscriber took the failure.
pub struct Chatroom<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Chatroom<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: HttpSession> Chatroom<S> {
    /// A chatroom on the server at `url` with default settings.
    pub fn new(url: impl Into<String>, session: Arc<S>) -> Self {
        Self::builder(url, session).build()
    }

    pub fn builder(url: impl Into<String>, session: Arc<S>) -> ChatroomBuilder<S> {
        ChatroomBuilder {
            url: url.into(),
            session,
            config: ChatroomConfig::default(),
            codec: Arc::new(Base64Codec),
            events: None,
            chatroom_id: None,
            chatroom_name: None,
        }
    }

    // =====================================================================
    // Joining
    // =====================================================================

    /// Creates a chatroom on the server, owned by `username`, and adopts it.
    ///
    /// # Errors
    /// [`ChatroomError::InvalidState`] if this chatroom already has an id.
    pub async fn create(
        &self,
        name: &str,
        username: &str,
        password: &str,
    ) -> Result<Option<ChatroomInfo>, ChatroomError> {
        let ctx = self.context();
        if let Some(id) = ctx.chatroom_id() {
            return Err(ChatroomError::InvalidState(format!(
                "chatroom {id} already exists"
            )));
        }

        let request = HttpRequest::post(ctx.resolver().resolve(Endpoint::Chatroom)?).json(json!({
            "chatroom_name": name,
            "username": username,
            "password": password,
        }));
        let Some(mut created) = self.call_json::<ChatroomInfo>(request).await? else {
            return Ok(None);
        };
        if created.name.is_empty() {
            created.name = name.to_string();
        }

        self.update(|ctx| {
            ctx.with_chatroom(created.chatroom_id.clone(), Some(created.name.clone()))
                .with_username(username)
                .with_channels(created.channels.clone())
        });
        info!(chatroom_id = %created.chatroom_id, %username, "chatroom created");
        Ok(Some(created))
    }

    /// Logs into the chatroom this instance was built for, then refreshes
    /// the channel list.
    ///
    /// # Errors
    /// [`ChatroomError::InvalidState`] if no chatroom id is known.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Arc<ConnectionContext>>, ChatroomError> {
        let ctx = self.context();
        let chatroom_id = ctx.require_chatroom()?.clone();

        let request = HttpRequest::post(ctx.resolver().resolve(Endpoint::Login)?).json(json!({
            "username": username,
            "password": password,
        }));
        let Some(body) = self.shared.dispatcher.call(request).await? else {
            return Ok(None);
        };

        // Servers may answer with the chatroom's details or with a bare ack.
        let details = serde_json::from_value::<ChatroomInfo>(body).ok();
        self.update(|ctx| {
            let next = ctx.with_username(username);
            match details {
                Some(info) => next
                    .with_chatroom(chatroom_id.clone(), Some(info.name).filter(|n| !n.is_empty()))
                    .with_channels(info.channels),
                None => next,
            }
        });
        info!(%chatroom_id, %username, "logged in");

        if self.get_channels().await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.context()))
    }

    /// Adopts `username` without a login request, for a session that
    /// already holds a credential for this server. Refreshes channels.
    pub async fn resume(
        &self,
        username: &str,
    ) -> Result<Option<Arc<ConnectionContext>>, ChatroomError> {
        let chatroom_id = self.context().require_chatroom()?.clone();
        self.update(|ctx| ctx.with_username(username));
        info!(%chatroom_id, %username, "resumed existing login");

        if self.get_channels().await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.context()))
    }

    /// Joins the chatroom `chatroom_id` on this server through an invite and
    /// adopts it.
    ///
    /// # Errors
    /// [`ChatroomError::InvalidState`] if this chatroom already has an id.
    pub async fn use_invite(
        &self,
        chatroom_id: &ChatroomId,
        invite_id: &InviteId,
        username: &str,
        password: &str,
    ) -> Result<Option<ChatroomInfo>, ChatroomError> {
        let ctx = self.context();
        if let Some(id) = ctx.chatroom_id() {
            return Err(ChatroomError::InvalidState(format!(
                "already joined chatroom {id}; use a new chatroom for {chatroom_id}"
            )));
        }

        let resolver = EndpointResolver::new(ctx.server_url(), Some(chatroom_id.clone()));
        let request = HttpRequest::post(resolver.resolve(Endpoint::Invites)?).json(json!({
            "inviteID": invite_id,
            "username": username,
            "password": password,
        }));
        let Some(joined) = self.call_json::<ChatroomInfo>(request).await? else {
            return Ok(None);
        };

        self.update(|ctx| {
            ctx.with_chatroom(
                joined.chatroom_id.clone(),
                Some(joined.name.clone()).filter(|n| !n.is_empty()),
            )
            .with_username(username)
            .with_channels(joined.channels.clone())
        });
        info!(chatroom_id = %joined.chatroom_id, %username, %invite_id, "joined through invite");
        Ok(Some(joined))
    }

    /// Creates an invite valid for `uses` joins until `expiration_time`
    /// (epoch seconds).
    pub async fn create_invite(
        &self,
        uses: u32,
        expiration_time: f64,
    ) -> Result<Option<Invite>, ChatroomError> {
        let ctx = self.context();
        ctx.require_chatroom()?;
        let request = HttpRequest::get(ctx.resolver().resolve(Endpoint::Invites)?)
            .header("username", ctx.require_username()?)
            .header("uses", uses.to_string())
            .header("expiration-time", expiration_time.to_string());
        self.call_json(request).await
    }

    // =====================================================================
    // Channels
    // =====================================================================

    /// Creates a channel and adds it to the known channels. It becomes
    /// active if no channel was.
    pub async fn create_channel(&self, name: &str) -> Result<Option<Channel>, ChatroomError> {
        let ctx = self.context();
        ctx.require_chatroom()?;
        let request = HttpRequest::post(ctx.resolver().resolve(Endpoint::Channels)?).json(json!({
            "username": ctx.require_username()?,
            "channel_name": name,
        }));
        let Some(channel) = self.call_json::<Channel>(request).await? else {
            return Ok(None);
        };

        self.update(|ctx| ctx.with_channels([channel.clone()]));
        info!(channel_id = %channel.id, name = %channel.name, "channel created");
        Ok(Some(channel))
    }

    /// Fetches the channels the user can see and merges them into the known
    /// channels.
    pub async fn get_channels(&self) -> Result<Option<Vec<Channel>>, ChatroomError> {
        let ctx = self.context();
        ctx.require_chatroom()?;
        let request = HttpRequest::get(ctx.resolver().resolve(Endpoint::Channels)?)
            .header("username", ctx.require_username()?);
        let Some(channels) = self.call_json::<Vec<Channel>>(request).await? else {
            return Ok(None);
        };

        self.update(|ctx| ctx.with_channels(channels.clone()));
        Ok(Some(channels))
    }

    /// Known channels, in discovery order.
    pub fn channels(&self) -> Vec<Channel> {
        self.context().channels().to_vec()
    }

    pub fn active_channel(&self) -> Option<Channel> {
        self.context().active_channel().cloned()
    }

    /// Makes `channel` the one sends and polls go to.
    pub fn set_channel(&self, channel: Channel) {
        info!(channel_id = %channel.id, "active channel set");
        self.update(|ctx| ctx.with_active_channel(channel));
    }

    // =====================================================================
    // Messages
    // =====================================================================

    /// Fetches messages from `channel`, or from the active channel.
    ///
    /// Unlike polling, this does not touch the checkpoint or raise events.
    pub async fn get_messages(
        &self,
        query: MessageQuery,
        channel: Option<&Channel>,
    ) -> Result<Option<Vec<Message>>, ChatroomError> {
        let ctx = self.context();
        ctx.require_chatroom()?;
        let channel_id = match channel {
            Some(channel) => channel.id.clone(),
            None => ctx.require_channel()?.id.clone(),
        };

        let request = messages_request(&ctx, &channel_id, query)?;
        let Some(body) = self.shared.dispatcher.call(request).await? else {
            return Ok(None);
        };
        Ok(Some(decode_messages(body, self.shared.codec.as_ref())?))
    }

    /// Sends a text message to the active channel and returns it as stored.
    /// Raises [`EventKind::MessageSent`].
    ///
    /// # Errors
    /// [`ChatroomError::InvalidState`] without a logged-in user or an
    /// active channel.
    pub async fn send(
        &self,
        text: &str,
        reply_id: Option<&MessageId>,
    ) -> Result<Option<Message>, ChatroomError> {
        let ctx = self.context();
        ctx.require_chatroom()?;
        let request = HttpRequest::post(ctx.resolver().resolve(Endpoint::Messages)?).json(json!({
            "username": ctx.require_username()?,
            "channelID": ctx.require_channel()?.id,
            "replyID": reply_id,
            "data": self.shared.codec.encode_text(text),
        }));
        let Some(wire) = self.call_json::<WireMessage>(request).await? else {
            return Ok(None);
        };

        let message = Message::from_wire(wire, self.shared.codec.as_ref())?;
        self.shared.events.notify(&Event::MessageSent(message.clone()));
        Ok(Some(message))
    }

    /// Deletes a message. Other clients see a `delete` message.
    pub async fn delete_message(&self, id: &MessageId) -> Result<Option<()>, ChatroomError> {
        let ctx = self.context();
        ctx.require_chatroom()?;
        let request = HttpRequest::delete(ctx.resolver().resolve(Endpoint::Messages)?).json(json!({
            "username": ctx.require_username()?,
            "messageID": id,
        }));
        Ok(self.shared.dispatcher.call(request).await?.map(|_| ()))
    }

    // =====================================================================
    // Files
    // =====================================================================

    /// Uploads `data` to the active channel in chunks and returns its id.
    pub async fn send_file(
        &self,
        data: &[u8],
        reply_id: Option<&MessageId>,
    ) -> Result<Option<FileId>, ChatroomError> {
        let ctx = self.context();
        ctx.require_chatroom()?;
        let target = UploadTarget {
            url: ctx.resolver().resolve(Endpoint::Files)?,
            username: ctx.require_username()?,
            channel_id: &ctx.require_channel()?.id,
            reply_id,
        };
        let codec = self.shared.codec.as_ref();
        let chunk_size = codec.raw_chunk_size(self.shared.config.transfer.upload_cap_bytes);

        let file_id = transfer::upload(&self.shared.dispatcher, target, data, codec, chunk_size).await?;
        if let Some(id) = &file_id {
            info!(file_id = %id, bytes = data.len(), "file uploaded");
        }
        Ok(file_id)
    }

    /// Downloads a file. Fails fast: a failed section discards everything
    /// received so far.
    pub async fn get_file(&self, file_id: &FileId) -> Result<Option<Vec<u8>>, ChatroomError> {
        let ctx = self.context();
        ctx.require_chatroom()?;
        let url = ctx.resolver().resolve(Endpoint::Files)?;
        transfer::download(&self.shared.dispatcher, url, file_id, self.shared.codec.as_ref()).await
    }

    // =====================================================================
    // Users
    // =====================================================================

    pub async fn get_users(&self) -> Result<Option<Vec<User>>, ChatroomError> {
        let ctx = self.context();
        ctx.require_chatroom()?;
        let request = HttpRequest::get(ctx.resolver().resolve(Endpoint::Users)?)
            .header("username", ctx.require_username()?);
        self.call_json(request).await
    }

    // =====================================================================
    // Events and polling
    // =====================================================================

    /// Adds a subscriber for `kind`.
    ///
    /// **Starts the poll task** the first time any kind other than
    /// [`EventKind::Error`] or [`EventKind::NetworkException`] is
    /// subscribed, unless the chatroom was stopped. Must therefore be
    /// called from within a Tokio runtime.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_callback(kind, Arc::new(callback))
    }

    /// Like [`subscribe`](Self::subscribe), for an already shared callback.
    pub fn subscribe_callback(&self, kind: EventKind, callback: Callback) -> SubscriptionId {
        let id = self.shared.events.subscribe_callback(kind, callback);
        if kind.needs_polling() {
            self.start_polling();
        }
        id
    }

    /// Removes a subscription. Polling, once started, keeps running.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    fn start_polling(&self) {
        let mut lifecycle = lock(&self.shared.lifecycle);
        if lifecycle.state != ChatroomState::Idle {
            return;
        }

        let stop_rx = self.shared.stop_tx.subscribe();
        lifecycle.task = Some(poll::spawn(
            Arc::downgrade(&self.shared),
            stop_rx,
            self.shared.config.poll.clone(),
        ));
        lifecycle.state = ChatroomState::Polling;
    }

    /// Stops the poll task for good. It exits at the top of its next
    /// iteration; a request already in flight finishes and its messages
    /// are dropped. Idempotent.
    pub fn stop(&self) {
        let mut lifecycle = lock(&self.shared.lifecycle);
        if lifecycle.state.is_stopped() {
            return;
        }
        lifecycle.state = ChatroomState::Stopped;
        self.shared.stop_tx.send_replace(true);

        let ctx = self.context();
        let chatroom_id = ctx.chatroom_id().map(ChatroomId::as_str).unwrap_or("-");
        info!(%chatroom_id, "chatroom stopped");
    }

    pub fn state(&self) -> ChatroomState {
        lock(&self.shared.lifecycle).state
    }

    /// Whether the poll task is alive.
    pub fn is_running(&self) -> bool {
        let lifecycle = lock(&self.shared.lifecycle);
        lifecycle.state == ChatroomState::Polling
            && lifecycle.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Every message the poll task accepted, in send-time order.
    pub fn history(&self) -> Vec<Message> {
        lock(&self.shared.tracker).history().to_vec()
    }

    /// Epoch time the next poll fetches from.
    pub fn checkpoint(&self) -> f64 {
        lock(&self.shared.tracker).checkpoint()
    }

    pub fn poll_metrics(&self) -> PollMetrics {
        lock(&self.shared.poll_metrics).clone()
    }

    // =====================================================================
    // Accessors
    // =====================================================================

    /// The current connection context.
    pub fn context(&self) -> Arc<ConnectionContext> {
        self.shared.context()
    }

    pub fn chatroom_id(&self) -> Option<ChatroomId> {
        self.context().chatroom_id().cloned()
    }

    pub fn name(&self) -> Option<String> {
        self.context().chatroom_name().map(str::to_string)
    }

    pub fn endpoints(&self) -> EndpointResolver {
        self.context().resolver()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    pub fn dispatcher(&self) -> &RequestDispatcher<S> {
        &self.shared.dispatcher
    }

    pub fn config(&self) -> &ChatroomConfig {
        &self.shared.config
    }

    // -- Internals --------------------------------------------------------

    /// Swaps in a new context derived from the current one.
    fn update(&self, f: impl FnOnce(&ConnectionContext) -> ConnectionContext) -> Arc<ConnectionContext> {
        let mut current = self
            .shared
            .context
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(f(&current));
        *current = Arc::clone(&next);
        next
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<Option<T>, ChatroomError> {
        let Some(body) = self.shared.dispatcher.call(request).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(body).map_err(ProtocolError::from)?))
    }
}

impl<S> std::fmt::Debug for Chatroom<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chatroom")
            .field("context", &self.shared.context())
            .field("state", &lock(&self.shared.lifecycle).state)
            .finish()
    }
}
