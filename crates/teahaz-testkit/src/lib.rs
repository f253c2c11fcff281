//! An in-memory Teahaz server.
//!
//! [`FakeServer`] implements [`HttpSession`] directly, so a chatroom under
//! test talks to it without sockets. It keeps just enough state to behave
//! like the real API (chatrooms, channels, messages, files, invites, users)
//! and exposes knobs for the awkward cases: overlapping poll windows,
//! out-of-order batches, injected status codes, and an unreachable server.
//!
//! ```ignore
//! let server = Arc::new(FakeServer::new());
//! let room = Chatroom::new(FakeServer::URL, Arc::clone(&server));
//! room.create("tea", "alma", "pw").await?;
//! server.push_text(&room_id, &channel_id, "bob", "hi");
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use teahaz_protocol::{
    API_BASE, Base64Codec, Channel, ChannelId, ChatroomId, ChatroomInfo, FileId, Invite, InviteId,
    MessageId, PayloadCodec, User, UserColor, WireMessage,
};
use teahaz_transport::{HttpRequest, HttpResponse, HttpSession, Method, TransportError};

/// A failed route: status code and error text.
type Reply = Result<Value, (u16, String)>;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct Room {
    name: String,
    passwords: HashMap<String, String>,
    users: Vec<User>,
    channels: Vec<Channel>,
    messages: Vec<WireMessage>,
    files: HashMap<FileId, Vec<u8>>,
    invites: HashMap<InviteId, Invite>,
}

impl Room {
    fn new(name: String) -> Self {
        Self {
            name,
            passwords: HashMap::new(),
            users: Vec::new(),
            channels: Vec::new(),
            messages: Vec::new(),
            files: HashMap::new(),
            invites: HashMap::new(),
        }
    }

    fn add_user(&mut self, username: &str, password: &str) {
        self.passwords.insert(username.to_string(), password.to_string());
        if !self.users.iter().any(|u| u.username == username) {
            let shade = (self.users.len() as u8).wrapping_mul(40);
            self.users.push(User {
                username: username.to_string(),
                id: None,
                color: Some(UserColor {
                    r: shade,
                    g: 255 - shade,
                    b: 128,
                }),
            });
        }
    }

    fn require_member(&self, username: Option<&str>) -> Result<(), (u16, String)> {
        match username {
            Some(name) if self.passwords.contains_key(name) => Ok(()),
            _ => Err((401, "not a member of this chatroom".into())),
        }
    }

    fn info(&self, id: &ChatroomId) -> ChatroomInfo {
        ChatroomInfo {
            chatroom_id: id.clone(),
            name: self.name.clone(),
            channels: self.channels.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    rooms: HashMap<ChatroomId, Room>,
    next_id: u64,
    last_time: f64,
    /// Server bases that handed out a credential.
    credentials: Vec<String>,
    failures: VecDeque<u16>,
    /// URL fragment and status for the next request to a matching URL.
    targeted_failures: Vec<(String, u16)>,
    /// Download section answered with a status instead of data.
    failing_section: Option<(usize, u16)>,
    log: Vec<HttpRequest>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Wall-clock epoch seconds, strictly increasing across calls.
    fn next_time(&mut self) -> f64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let time = if now > self.last_time {
            now
        } else {
            self.last_time + 0.000_001
        };
        self.last_time = time;
        time
    }

    fn room(&mut self, id: &ChatroomId) -> Result<&mut Room, (u16, String)> {
        self.rooms
            .get_mut(id)
            .ok_or_else(|| (404, format!("chatroom {id} does not exist")))
    }

    fn grant_credential(&mut self, base: &str) {
        if !self.credentials.iter().any(|b| b == base) {
            self.credentials.push(base.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// FakeServer
// ---------------------------------------------------------------------------

/// An in-memory Teahaz server that is also its own HTTP session.
pub struct FakeServer {
    state: Mutex<State>,
    ignore_since: AtomicBool,
    reverse_batches: AtomicBool,
    offline: AtomicBool,
    upload_cap: usize,
    section_size: usize,
    latency: Duration,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    /// Base URL tests should point chatrooms at. Any URL works; requests
    /// are routed by path only.
    pub const URL: &'static str = "http://teahaz.test";

    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ignore_since: AtomicBool::new(false),
            reverse_batches: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            upload_cap: 1 << 20,
            section_size: 64 * 1024,
            latency: Duration::ZERO,
        }
    }

    /// Largest encoded chunk accepted; bigger uploads get 413.
    pub fn with_upload_cap(mut self, cap: usize) -> Self {
        self.upload_cap = cap;
        self
    }

    /// Raw bytes served per download section.
    pub fn with_section_size(mut self, size: usize) -> Self {
        self.section_size = size.max(1);
        self
    }

    /// Delay before every response (Tokio time, so pausable in tests).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    // -- Knobs ------------------------------------------------------------

    /// Serve every stored message on "since" queries, ignoring the time.
    pub fn set_ignore_since(&self, on: bool) {
        self.ignore_since.store(on, Ordering::SeqCst);
    }

    /// Serve message lists newest first.
    pub fn set_reverse_batches(&self, on: bool) {
        self.reverse_batches.store(on, Ordering::SeqCst);
    }

    /// Fail every request with a connection error.
    pub fn set_offline(&self, on: bool) {
        self.offline.store(on, Ordering::SeqCst);
    }

    /// Answer the next request with `status`, whatever it is.
    pub fn fail_next(&self, status: u16) {
        self.lock().failures.push_back(status);
    }

    /// Answer the next request whose URL contains `fragment` with `status`.
    pub fn fail_next_to(&self, fragment: &str, status: u16) {
        self.lock().targeted_failures.push((fragment.to_string(), status));
    }

    /// Answer every download request for `section` (1-based) with `status`.
    pub fn fail_section(&self, section: usize, status: u16) {
        self.lock().failing_section = Some((section, status));
    }

    // -- Seeding ----------------------------------------------------------

    /// Stores a text message as if another client had sent it.
    pub fn push_text(&self, chatroom: &ChatroomId, channel: &ChannelId, username: &str, text: &str) -> MessageId {
        self.push(chatroom, "text", json!(Base64Codec.encode_text(text)), Some(channel), Some(username))
    }

    /// Stores a system message of the given event type.
    pub fn push_system(&self, chatroom: &ChatroomId, event_type: &str, info: &str, silent: bool) -> MessageId {
        let kind = if silent { "system-silent" } else { "system" };
        let data = json!({ "event_type": event_type, "user_info": info });
        self.push(chatroom, kind, data, None, None)
    }

    fn push(
        &self,
        chatroom: &ChatroomId,
        kind: &str,
        data: Value,
        channel: Option<&ChannelId>,
        username: Option<&str>,
    ) -> MessageId {
        let mut state = self.lock();
        let id = MessageId(state.next_id("msg"));
        let time = state.next_time();
        if let Ok(room) = state.room(chatroom) {
            room.messages.push(WireMessage {
                id: id.clone(),
                time,
                kind: kind.to_string(),
                data,
                channel_id: channel.cloned(),
                username: username.map(str::to_string),
                reply_id: None,
            });
        }
        id
    }

    // -- Inspection -------------------------------------------------------

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().log.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().log.len()
    }

    /// Requests whose URL contains `fragment`.
    pub fn requests_to(&self, fragment: &str) -> Vec<HttpRequest> {
        self.lock()
            .log
            .iter()
            .filter(|r| r.url.contains(fragment))
            .cloned()
            .collect()
    }

    /// Messages stored for a chatroom.
    pub fn messages(&self, chatroom: &ChatroomId) -> Vec<WireMessage> {
        self.lock()
            .rooms
            .get(chatroom)
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }

    /// Stored contents of a file.
    pub fn file(&self, chatroom: &ChatroomId, file_id: &FileId) -> Option<Vec<u8>> {
        self.lock().rooms.get(chatroom)?.files.get(file_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Routing ----------------------------------------------------------

    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let mut state = self.lock();
        state.log.push(request.clone());

        if let Some(status) = state.failures.pop_front() {
            return HttpResponse::new(status, json!("injected failure").to_string());
        }
        if let Some(pos) = state
            .targeted_failures
            .iter()
            .position(|(fragment, _)| request.url.contains(fragment.as_str()))
        {
            let (_, status) = state.targeted_failures.remove(pos);
            return HttpResponse::new(status, json!("injected failure").to_string());
        }

        let Some((base, path)) = request.url.split_once(API_BASE) else {
            return HttpResponse::new(404, json!("not an api path").to_string());
        };
        let mut segments = path.trim_start_matches('/').splitn(2, '/');
        let endpoint = segments.next().unwrap_or_default();
        let chatroom = segments.next().map(ChatroomId::from);
        let body = request.body.clone().unwrap_or(Value::Null);

        let reply = match (request.method, endpoint, chatroom) {
            (Method::Post, "chatroom", None) => self.create_chatroom(&mut state, base, &body),
            (Method::Post, "login", Some(id)) => self.login(&mut state, base, &id, &body),
            (Method::Get, "channels", Some(id)) => self.list_channels(&mut state, &id, request),
            (Method::Post, "channels", Some(id)) => self.create_channel(&mut state, &id, &body),
            (Method::Get, "messages", Some(id)) => self.list_messages(&mut state, &id, request),
            (Method::Post, "messages", Some(id)) => self.send_message(&mut state, &id, &body),
            (Method::Delete, "messages", Some(id)) => self.delete_message(&mut state, &id, &body),
            (Method::Get, "files", Some(id)) => self.download(&mut state, &id, request),
            (Method::Post, "files", Some(id)) => self.upload(&mut state, &id, &body),
            (Method::Get, "invites", Some(id)) => self.create_invite(&mut state, base, &id, request),
            (Method::Post, "invites", Some(id)) => self.use_invite(&mut state, base, &id, &body),
            (Method::Get, "users", Some(id)) => self.list_users(&mut state, &id, request),
            _ => Err((404, format!("no route for {} {}", request.method, request.url))),
        };

        match reply {
            Ok(value) => HttpResponse::json(&value),
            Err((status, text)) => HttpResponse::new(status, json!(text).to_string()),
        }
    }

    fn create_chatroom(&self, state: &mut State, base: &str, body: &Value) -> Reply {
        let name = field(body, "chatroom_name")?;
        let username = field(body, "username")?;
        let password = field(body, "password")?;

        let id = ChatroomId(state.next_id("room"));
        let mut room = Room::new(name.to_string());
        room.add_user(username, password);
        let info = room.info(&id);
        state.rooms.insert(id, room);
        state.grant_credential(base);
        Ok(to_value(&info))
    }

    fn login(&self, state: &mut State, base: &str, id: &ChatroomId, body: &Value) -> Reply {
        let username = field(body, "username")?;
        let password = field(body, "password")?;
        let room = state.room(id)?;
        if room.passwords.get(username).map(String::as_str) != Some(password) {
            return Err((401, "wrong username or password".into()));
        }
        let info = room.info(id);
        state.grant_credential(base);
        Ok(to_value(&info))
    }

    fn list_channels(&self, state: &mut State, id: &ChatroomId, request: &HttpRequest) -> Reply {
        let room = state.room(id)?;
        room.require_member(request.header_value("username"))?;
        Ok(to_value(&room.channels))
    }

    fn create_channel(&self, state: &mut State, id: &ChatroomId, body: &Value) -> Reply {
        let name = field(body, "channel_name")?.to_string();
        let channel_id = ChannelId(state.next_id("chan"));
        let room = state.room(id)?;
        room.require_member(field(body, "username").ok())?;

        let channel = Channel {
            id: channel_id,
            name,
            permissions: [("r", true), ("w", true), ("x", false)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        };
        room.channels.push(channel.clone());
        Ok(to_value(&channel))
    }

    fn list_messages(&self, state: &mut State, id: &ChatroomId, request: &HttpRequest) -> Reply {
        let ignore_since = self.ignore_since.load(Ordering::SeqCst);
        let reverse = self.reverse_batches.load(Ordering::SeqCst);
        let room = state.room(id)?;
        room.require_member(request.header_value("username"))?;
        let channel = request.header_value("channelID").map(ChannelId::from);

        let visible = room
            .messages
            .iter()
            .filter(|m| m.channel_id.is_none() || m.channel_id == channel);

        let mut batch: Vec<&WireMessage> = match request.header_value("get-method") {
            Some("since") => {
                let since = number_header(request, "time")?;
                visible.filter(|m| ignore_since || m.time >= since).collect()
            }
            Some("count") => {
                let count = number_header(request, "count")? as usize;
                let all: Vec<_> = visible.collect();
                let skip = all.len().saturating_sub(count);
                all.into_iter().skip(skip).collect()
            }
            _ => return Err((400, "missing or unknown get-method".into())),
        };
        if reverse {
            batch.reverse();
        }
        Ok(to_value(&batch))
    }

    fn send_message(&self, state: &mut State, id: &ChatroomId, body: &Value) -> Reply {
        let username = field(body, "username")?.to_string();
        let channel = ChannelId::from(field(body, "channelID")?);
        let data = field(body, "data")?.to_string();
        let reply_id = body.get("replyID").and_then(Value::as_str).map(MessageId::from);

        let message_id = MessageId(state.next_id("msg"));
        let time = state.next_time();
        let room = state.room(id)?;
        room.require_member(Some(&username))?;
        if !room.channels.iter().any(|c| c.id == channel) {
            return Err((404, format!("channel {channel} does not exist")));
        }

        let message = WireMessage {
            id: message_id,
            time,
            kind: "text".into(),
            data: json!(data),
            channel_id: Some(channel),
            username: Some(username),
            reply_id,
        };
        room.messages.push(message.clone());
        Ok(to_value(&message))
    }

    fn delete_message(&self, state: &mut State, id: &ChatroomId, body: &Value) -> Reply {
        let username = field(body, "username")?.to_string();
        let target = MessageId::from(field(body, "messageID")?);

        let message_id = MessageId(state.next_id("msg"));
        let time = state.next_time();
        let room = state.room(id)?;
        room.require_member(Some(&username))?;
        let Some(original) = room.messages.iter().find(|m| m.id == target) else {
            return Err((404, format!("message {target} does not exist")));
        };
        if original.username.as_deref() != Some(username.as_str()) {
            return Err((403, "cannot delete another user's message".into()));
        }

        let channel_id = original.channel_id.clone();
        room.messages.push(WireMessage {
            id: message_id,
            time,
            kind: "delete".into(),
            data: json!(target),
            channel_id,
            username: Some(username),
            reply_id: None,
        });
        Ok(json!("OK"))
    }

    fn upload(&self, state: &mut State, id: &ChatroomId, body: &Value) -> Reply {
        let encoded = field(body, "data")?;
        if encoded.len() > self.upload_cap {
            return Err((413, "chunk too large".into()));
        }
        let bytes = Base64Codec
            .decode(encoded)
            .map_err(|e| (400, e.to_string()))?;

        let file_id = match body.get("fileId").and_then(Value::as_str) {
            Some(existing) => FileId::from(existing),
            None => FileId(state.next_id("file")),
        };
        let room = state.room(id)?;
        room.require_member(field(body, "username").ok())?;
        room.files.entry(file_id.clone()).or_default().extend(bytes);
        Ok(json!({ "fileId": file_id }))
    }

    fn download(&self, state: &mut State, id: &ChatroomId, request: &HttpRequest) -> Reply {
        let file_id = request
            .header_value("fileId")
            .map(FileId::from)
            .ok_or_else(|| (400, "missing fileId".to_string()))?;
        let section = number_header(request, "section")? as usize;
        if section == 0 {
            return Err((400, "sections start at 1".into()));
        }
        if let Some((_, status)) = state.failing_section.filter(|(failing, _)| *failing == section) {
            return Err((status, format!("section {section} unavailable")));
        }

        let room = state.room(id)?;
        let data = room
            .files
            .get(&file_id)
            .ok_or_else(|| (404, format!("file {file_id} does not exist")))?;
        let start = (section - 1).saturating_mul(self.section_size).min(data.len());
        let end = start.saturating_add(self.section_size).min(data.len());
        Ok(json!(Base64Codec.encode(&data[start..end])))
    }

    fn create_invite(&self, state: &mut State, base: &str, id: &ChatroomId, request: &HttpRequest) -> Reply {
        let uses = number_header(request, "uses")? as u32;
        let expiration_time = number_header(request, "expiration-time")?;
        let invite_id = InviteId(state.next_id("invite"));
        let room = state.room(id)?;
        room.require_member(request.header_value("username"))?;

        let invite = Invite {
            url: format!("teahaz:{base}/{id}/{invite_id}"),
            id: invite_id.clone(),
            chatroom_id: id.clone(),
            uses,
            expiration_time,
        };
        room.invites.insert(invite_id, invite.clone());
        Ok(to_value(&invite))
    }

    fn use_invite(&self, state: &mut State, base: &str, id: &ChatroomId, body: &Value) -> Reply {
        let invite_id = InviteId::from(field(body, "inviteID")?);
        let username = field(body, "username")?;
        let password = field(body, "password")?;
        let now = state.next_time();

        let room = state.room(id)?;
        let Some(invite) = room.invites.get_mut(&invite_id) else {
            return Err((404, format!("invite {invite_id} does not exist")));
        };
        if invite.uses == 0 || invite.expiration_time < now {
            return Err((403, "invite is no longer valid".into()));
        }
        invite.uses -= 1;
        room.add_user(username, password);
        let info = room.info(id);
        state.grant_credential(base);
        Ok(to_value(&info))
    }

    fn list_users(&self, state: &mut State, id: &ChatroomId, request: &HttpRequest) -> Reply {
        let room = state.room(id)?;
        room.require_member(request.header_value("username"))?;
        Ok(to_value(&room.users))
    }
}

impl HttpSession for FakeServer {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            self.lock().log.push(request.clone());
            return Err(TransportError::Connect(format!("{} is unreachable", request.url)));
        }

        let response = self.handle(&request);
        tracing::trace!(method = %request.method, url = %request.url, status = response.status, "fake exchange");
        Ok(response)
    }

    fn has_credential(&self, url: &str) -> bool {
        let url = url.trim_end_matches('/');
        self.lock().credentials.iter().any(|base| url.starts_with(base.as_str()))
    }
}

fn field<'a>(body: &'a Value, key: &str) -> Result<&'a str, (u16, String)> {
    body.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| (400, format!("missing field {key}")))
}

fn number_header(request: &HttpRequest, name: &str) -> Result<f64, (u16, String)> {
    request
        .header_value(name)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| (400, format!("missing or invalid header {name}")))
}

fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
