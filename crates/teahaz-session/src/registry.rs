//! The connection registry: which chatrooms on which servers we are in.
//!
//! # Concurrency note
//!
//! `ConnectionRegistry` is a plain value with no interior locking. The
//! owner (usually a `Teacup`) wraps it in a lock when it is shared between
//! tasks.

use std::collections::HashMap;

use teahaz_protocol::ChatroomId;
use teahaz_transport::HttpSession;

use crate::{ActiveChatroom, ChatroomRecord, RegistryError};

/// Tracks every (server, chatroom, user) triple the process has logged
/// into, plus the one currently active.
///
/// ## Lifecycle
///
/// ```text
/// login ok ──→ register(url, record) ──→ set_active(url, record)
///                     │
///                     ▼
///       is_authenticated(url) lets the next login be skipped
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    /// Records per normalised server URL, in registration order.
    servers: HashMap<String, Vec<ChatroomRecord>>,

    active: Option<ActiveChatroom>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `record` under the server at `url`, creating the server's list
    /// if this is its first chatroom.
    ///
    /// Registering a record that is already present changes nothing.
    /// Returns `true` if the record was new.
    pub fn register(&mut self, url: &str, record: ChatroomRecord) -> bool {
        let url = normalize_url(url);
        let records = self.servers.entry(url.clone()).or_default();
        if records.contains(&record) {
            return false;
        }

        tracing::debug!(
            server = %url,
            chatroom_id = %record.chatroom_id,
            username = %record.username,
            "chatroom registered"
        );
        records.push(record);
        true
    }

    /// Makes `record` the active identity.
    ///
    /// The record does not have to be registered, but its server does.
    ///
    /// # Errors
    /// [`RegistryError::UnknownServer`] if nothing was registered for `url`.
    pub fn set_active(
        &mut self,
        url: &str,
        record: &ChatroomRecord,
    ) -> Result<&ActiveChatroom, RegistryError> {
        let url = normalize_url(url);
        if !self.servers.contains_key(&url) {
            return Err(RegistryError::UnknownServer(url));
        }

        tracing::debug!(server = %url, chatroom_id = %record.chatroom_id, "active chatroom set");
        Ok(self.active.insert(ActiveChatroom::from_record(url, record)))
    }

    /// Whether `session` already holds a credential for the host of `url`.
    ///
    /// A `true` here means a login request can be skipped.
    pub fn is_authenticated<S: HttpSession>(&self, url: &str, session: &S) -> bool {
        session.has_credential(&normalize_url(url))
    }

    /// Looks up a known chatroom on a server.
    pub fn find(&self, url: &str, chatroom_id: &ChatroomId) -> Option<&ChatroomRecord> {
        self.records(url)
            .iter()
            .find(|r| &r.chatroom_id == chatroom_id)
    }

    /// The records known for a server, in registration order.
    pub fn records(&self, url: &str) -> &[ChatroomRecord] {
        self.servers
            .get(&normalize_url(url))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every registered server URL (normalised), sorted.
    pub fn servers(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self.servers.keys().map(String::as_str).collect();
        urls.sort_unstable();
        urls
    }

    pub fn active(&self) -> Option<&ActiveChatroom> {
        self.active.as_ref()
    }

    /// Forgets every record of `chatroom_id` on the server at `url`.
    ///
    /// A server whose last record goes is forgotten too. The active
    /// identity is a copy and stays as it is. Returns how many records were
    /// removed.
    pub fn remove(&mut self, url: &str, chatroom_id: &ChatroomId) -> usize {
        let url = normalize_url(url);
        let Some(records) = self.servers.get_mut(&url) else {
            return 0;
        };

        let before = records.len();
        records.retain(|r| &r.chatroom_id != chatroom_id);
        let removed = before - records.len();

        if records.is_empty() {
            self.servers.remove(&url);
        }
        removed
    }

    /// Total number of records across all servers.
    pub fn len(&self) -> usize {
        self.servers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Reduces a server URL to its canonical key.
///
/// Surrounding whitespace and trailing slashes go. For a URL with a scheme,
/// only the first three `/`-separated segments are kept, so
/// `https://host/api/v0/login/x` becomes `https://host`.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains("://") {
        url.split('/').take(3).collect::<Vec<_>>().join("/")
    } else {
        url.to_string()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::future::Future;

    use teahaz_transport::{HttpRequest, HttpResponse, TransportError};

    use super::*;

    // -- Helpers ----------------------------------------------------------

    /// A session that claims to hold a cookie for exactly one URL.
    struct CookieFor(&'static str);

    impl HttpSession for CookieFor {
        fn execute(
            &self,
            _request: HttpRequest,
        ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
            async { Err(TransportError::Request("offline".into())) }
        }

        fn has_credential(&self, url: &str) -> bool {
            url == self.0
        }
    }

    fn record(id: &str, user: &str) -> ChatroomRecord {
        ChatroomRecord::new(id, format!("room {id}"), user)
    }

    // =====================================================================
    // normalize_url()
    // =====================================================================

    #[test]
    fn test_normalize_url_strips_trailing_slash() {
        assert_eq!(normalize_url("https://teahaz.co.uk/"), "https://teahaz.co.uk");
        assert_eq!(normalize_url("https://teahaz.co.uk///"), "https://teahaz.co.uk");
    }

    #[test]
    fn test_normalize_url_keeps_only_scheme_and_host() {
        assert_eq!(
            normalize_url("http://localhost:13337/api/v0/login/room-1"),
            "http://localhost:13337"
        );
    }

    #[test]
    fn test_normalize_url_without_scheme_is_only_trimmed() {
        assert_eq!(normalize_url("  localhost:13337/ "), "localhost:13337");
    }

    // =====================================================================
    // register()
    // =====================================================================

    #[test]
    fn test_register_creates_server_list() {
        let mut reg = ConnectionRegistry::new();
        assert!(reg.is_empty());

        assert!(reg.register("https://a.example/", record("r1", "alma")));

        assert_eq!(reg.servers(), vec!["https://a.example"]);
        assert_eq!(reg.records("https://a.example"), &[record("r1", "alma")]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_same_record_twice_is_noop() {
        let mut reg = ConnectionRegistry::new();
        reg.register("https://a.example", record("r1", "alma"));

        assert!(!reg.register("https://a.example/api/v0", record("r1", "alma")));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_multiple_chatrooms_and_servers() {
        let mut reg = ConnectionRegistry::new();
        reg.register("https://a.example", record("r1", "alma"));
        reg.register("https://a.example", record("r2", "alma"));
        reg.register("https://b.example", record("r1", "bob"));

        assert_eq!(reg.len(), 3);
        assert_eq!(reg.servers(), vec!["https://a.example", "https://b.example"]);
        assert_eq!(reg.records("https://a.example").len(), 2);
        assert_eq!(
            reg.find("https://b.example", &ChatroomId::from("r1")).map(|r| r.username.as_str()),
            Some("bob")
        );
    }

    #[test]
    fn test_records_unknown_server_is_empty() {
        let reg = ConnectionRegistry::new();
        assert!(reg.records("https://nowhere").is_empty());
    }

    // =====================================================================
    // set_active()
    // =====================================================================

    #[test]
    fn test_set_active_unknown_server_returns_error() {
        let mut reg = ConnectionRegistry::new();

        let result = reg.set_active("https://a.example", &record("r1", "alma"));

        assert!(matches!(
            result,
            Err(RegistryError::UnknownServer(url)) if url == "https://a.example"
        ));
        assert!(reg.active().is_none());
    }

    #[test]
    fn test_set_active_copies_record_fields() {
        let mut reg = ConnectionRegistry::new();
        reg.register("https://a.example", record("r1", "alma"));

        let active = reg
            .set_active("https://a.example/", &record("r1", "alma"))
            .expect("server is registered")
            .clone();

        assert_eq!(active.server_url, "https://a.example");
        assert_eq!(active.chatroom_id.as_str(), "r1");
        assert_eq!(active.username, "alma");
        assert_eq!(active.record(), record("r1", "alma"));
        assert_eq!(reg.active(), Some(&active));
    }

    // =====================================================================
    // is_authenticated()
    // =====================================================================

    #[test]
    fn test_is_authenticated_asks_session_with_normalised_url() {
        let reg = ConnectionRegistry::new();
        let session = CookieFor("https://a.example");

        assert!(reg.is_authenticated("https://a.example/api/v0/", &session));
        assert!(!reg.is_authenticated("https://b.example", &session));
    }

    // =====================================================================
    // remove()
    // =====================================================================

    #[test]
    fn test_remove_last_record_forgets_server() {
        let mut reg = ConnectionRegistry::new();
        reg.register("https://a.example", record("r1", "alma"));
        reg.register("https://a.example", record("r2", "alma"));

        assert_eq!(reg.remove("https://a.example", &ChatroomId::from("r1")), 1);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.remove("https://a.example", &ChatroomId::from("r2")), 1);
        assert!(reg.is_empty());
        assert_eq!(reg.remove("https://a.example", &ChatroomId::from("r2")), 0);
    }

    #[test]
    fn test_remove_keeps_active_identity() {
        let mut reg = ConnectionRegistry::new();
        reg.register("https://a.example", record("r1", "alma"));
        reg.set_active("https://a.example", &record("r1", "alma")).unwrap();

        reg.remove("https://a.example", &ChatroomId::from("r1"));

        assert_eq!(reg.active().map(|a| a.chatroom_id.as_str()), Some("r1"));
    }

    #[test]
    fn test_record_serializes_to_json() {
        let json = serde_json::to_value(record("r1", "alma")).unwrap();
        assert_eq!(json["chatroom_id"], "r1");
        assert_eq!(json["username"], "alma");
    }
}
