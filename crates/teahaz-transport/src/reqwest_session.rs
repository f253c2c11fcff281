//! [`HttpSession`] implementation using `reqwest`.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Url};

use crate::{HttpRequest, HttpResponse, HttpSession, Method, TransportError};

/// A `reqwest`-backed session with a shared cookie jar.
///
/// Login responses set a session cookie; the jar replays it on every later
/// request to the same host, which is what [`HttpSession::has_credential`]
/// inspects.
#[derive(Clone)]
pub struct ReqwestSession {
    client: Client,
    jar: Arc<Jar>,
}

impl ReqwestSession {
    /// Builds a client with a fresh cookie jar.
    pub fn new() -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client, jar })
    }

    /// Wraps an existing client. `jar` must be the cookie provider that
    /// `client` was built with, otherwise credential checks see nothing.
    pub fn with_client(client: Client, jar: Arc<Jar>) -> Self {
        Self { client, jar }
    }
}

impl HttpSession for ReqwestSession {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_error)?;

        tracing::trace!(
            method = %request.method,
            url = %request.url,
            status,
            bytes = body.len(),
            "http exchange complete"
        );

        Ok(HttpResponse::new(status, body.to_vec()))
    }

    fn has_credential(&self, url: &str) -> bool {
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        self.jar.cookies(&url).is_some()
    }
}

/// Sorts a `reqwest` error into the transport taxonomy.
fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidUrl(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}
