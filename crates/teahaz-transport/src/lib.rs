//! HTTP transport abstraction for Teahaz.
//!
//! The chat protocol is plain request/response HTTP. This crate defines the
//! small surface the rest of the workspace needs from an HTTP client:
//!
//! - [`HttpRequest`] / [`HttpResponse`]: owned request and response values.
//! - [`HttpSession`]: the black-box "session" capability. It sends requests,
//!   keeps credentials (cookies) between them, and can say whether it already
//!   holds a credential for a server.
//! - [`Method`]: the three verbs the protocol uses.
//!
//! # Feature Flags
//!
//! - `reqwest` (default): [`ReqwestSession`], backed by `reqwest` with a
//!   cookie jar.

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "reqwest")]
mod reqwest_session;

pub use error::TransportError;
#[cfg(feature = "reqwest")]
pub use reqwest_session::ReqwestSession;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

/// The HTTP methods the chat protocol uses.
///
/// Anything else is a programming error: parsing `"PUT"` or `"PATCH"` fails
/// with [`TransportError::UnsupportedMethod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    /// The canonical upper-case name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "DELETE" => Ok(Self::Delete),
            _ => Err(TransportError::UnsupportedMethod(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// An owned HTTP request.
///
/// GET parameters travel as headers in this protocol, POST and DELETE
/// parameters as a JSON body. The request is kept around after it is sent so
/// failures can report exactly what was asked.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Per-request deadline. `None` lets the session decide.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Creates a request with no headers, body, or timeout.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Appends a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the deadline, keeping an existing one if it is shorter.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(match self.timeout {
            Some(current) => current.min(timeout),
            None => timeout,
        });
        self
    }

    /// Looks up a header value by name (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A completed HTTP exchange: status code and raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A 200 response carrying `value` serialized as JSON.
    pub fn json(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }

    /// The protocol treats exactly 200 as success; every other status,
    /// including other 2xx codes, is a failure.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns `true` when the body is empty or only whitespace.
    pub fn is_empty(&self) -> bool {
        self.body.iter().all(u8::is_ascii_whitespace)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A black-box HTTP session: connection pooling, TLS, and cookie storage
/// all live behind this trait.
///
/// One session is shared (behind an `Arc`) by every request a chatroom
/// makes, from any task, so implementations must be `Send + Sync`.
pub trait HttpSession: Send + Sync + 'static {
    /// Sends a request and waits for the full response.
    ///
    /// A non-200 status is `Ok`; only failures to complete the exchange
    /// (DNS, refused connection, timeout) are `Err`.
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl std::future::Future<Output = Result<HttpResponse, TransportError>> + Send;

    /// Returns `true` if the session already holds a credential (such as a
    /// cookie) scoped to the host of `url`.
    fn has_credential(&self, url: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str_accepts_protocol_verbs() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert_eq!("Delete".parse::<Method>().unwrap(), Method::Delete);
    }

    #[test]
    fn test_method_from_str_rejects_other_verbs() {
        let err = "PUT".parse::<Method>().unwrap_err();
        assert_eq!(err, TransportError::UnsupportedMethod("PUT".into()));
        assert!("PATCH".parse::<Method>().is_err());
    }

    #[test]
    fn test_method_display_matches_as_str() {
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_request_builder_collects_headers_and_body() {
        let req = HttpRequest::get("http://x/api/v0/messages/1")
            .header("channelID", "c-1")
            .header("get-method", "since")
            .json(serde_json::json!({"a": 1}));

        assert_eq!(req.method, Method::Get);
        assert_eq!(req.header_value("channelid"), Some("c-1"));
        assert_eq!(req.header_value("GET-METHOD"), Some("since"));
        assert_eq!(req.header_value("missing"), None);
        assert!(req.body.is_some());
    }

    #[test]
    fn test_request_timeout_keeps_shorter_deadline() {
        let req = HttpRequest::get("http://x")
            .timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30));
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_response_success_is_exactly_200() {
        assert!(HttpResponse::new(200, "{}").is_success());
        assert!(!HttpResponse::new(201, "{}").is_success());
        assert!(!HttpResponse::new(403, "nope").is_success());
    }

    #[test]
    fn test_response_is_empty_ignores_whitespace() {
        assert!(HttpResponse::new(200, "").is_empty());
        assert!(HttpResponse::new(200, " \n").is_empty());
        assert!(!HttpResponse::new(200, "null").is_empty());
    }
}
