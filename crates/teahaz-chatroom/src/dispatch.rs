//! The request dispatcher.
//!
//! Every HTTP call runs on its own Tokio task. The caller either joins it
//! ([`DispatchMode::Blocking`]) or gets a [`DispatchHandle`] back at once
//! ([`DispatchMode::Detached`]) and collects the result later with
//! [`RequestDispatcher::poll`]. A semaphore bounds how many requests are on
//! the wire at the same time.
//!
//! Results are classified before anyone sees them:
//!
//! | Outcome            | `Error`/`NetworkException` subscribed | not subscribed              |
//! |--------------------|---------------------------------------|-----------------------------|
//! | 200                | `Ok(Some(json))`                      | `Ok(Some(json))`            |
//! | other status       | event raised, `Ok(None)`              | `Err(DispatchError::Request)` |
//! | transport failure  | event raised, `Ok(None)`              | `Err(DispatchError::Transport)` |
//!
//! Nothing is retried.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use serde_json::Value;
use teahaz_transport::{HttpRequest, HttpResponse, HttpSession};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{DispatchConfig, DispatchError, Event, EventBus, EventKind, NetworkFailure, RequestFailure};

/// Counter for dispatch handles; unique across all dispatchers in the
/// process, so two calls in the same instant never collide.
static NEXT_DISPATCH_HANDLE: AtomicU64 = AtomicU64::new(1);

/// `Ok(Some(json))` on success, `Ok(None)` when a subscriber took the
/// failure, `Err` when nobody did.
pub type DispatchResult = Result<Option<Value>, DispatchError>;

/// Identifies a detached dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchHandle(u64);

impl fmt::Display for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Wait for the response.
    Blocking,
    /// Return a handle immediately.
    Detached,
}

/// What [`RequestDispatcher::dispatch`] hands back.
#[derive(Debug)]
pub enum Dispatched {
    Complete(DispatchResult),
    Pending(DispatchHandle),
}

/// What [`RequestDispatcher::poll`] reports for a handle.
#[derive(Debug)]
pub enum DispatchStatus {
    /// The request is still running.
    NotReady,
    /// The result. Handed out exactly once.
    Ready(DispatchResult),
    /// Unknown handle, or its result was already taken.
    NotFound,
}

enum Slot {
    Pending,
    Done(DispatchResult),
}

type ResultTable = Arc<Mutex<HashMap<DispatchHandle, Slot>>>;

/// Runs HTTP calls for one chatroom.
///
/// Cheap to clone; clones share the session, the event bus, the in-flight
/// limit, and the result table.
pub struct RequestDispatcher<S> {
    session: Arc<S>,
    events: Arc<EventBus>,
    config: DispatchConfig,
    permits: Arc<Semaphore>,
    results: ResultTable,
}

impl<S> Clone for RequestDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            events: Arc::clone(&self.events),
            config: self.config.clone(),
            permits: Arc::clone(&self.permits),
            results: Arc::clone(&self.results),
        }
    }
}

impl<S: HttpSession> RequestDispatcher<S> {
    /// `events` decides escalation: failures go to its `Error` and
    /// `NetworkException` subscribers when there are any.
    pub fn new(session: Arc<S>, events: Arc<EventBus>, config: DispatchConfig) -> Self {
        let config = config.validated();
        Self {
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            session,
            events,
            config,
            results: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `request` in the given mode.
    pub async fn dispatch(&self, request: HttpRequest, mode: DispatchMode) -> Dispatched {
        match mode {
            DispatchMode::Blocking => Dispatched::Complete(self.call(request).await),
            DispatchMode::Detached => Dispatched::Pending(self.spawn(request)),
        }
    }

    /// Runs `request` on its own task and waits for the result. Leaves
    /// nothing in the result table.
    pub async fn call(&self, request: HttpRequest) -> DispatchResult {
        let task = tokio::spawn(self.execute(request));
        task.await
            .map_err(|e| DispatchError::TaskFailed(e.to_string()))?
    }

    /// Starts `request` on its own task and returns at once. The result is
    /// collected with [`poll`](Self::poll).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(&self, request: HttpRequest) -> DispatchHandle {
        let handle = DispatchHandle(NEXT_DISPATCH_HANDLE.fetch_add(1, Ordering::Relaxed));
        lock(&self.results).insert(handle, Slot::Pending);

        let results = Arc::clone(&self.results);
        let work = self.execute(request);
        tokio::spawn(async move {
            let result = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(DispatchError::TaskFailed("request task panicked".into())));
            lock(&results).insert(handle, Slot::Done(result));
        });

        debug!(%handle, "request detached");
        handle
    }

    /// Checks on a detached request. A finished result is removed from the
    /// table as it is returned.
    pub fn poll(&self, handle: DispatchHandle) -> DispatchStatus {
        let mut results = lock(&self.results);
        match results.remove(&handle) {
            None => DispatchStatus::NotFound,
            Some(Slot::Pending) => {
                results.insert(handle, Slot::Pending);
                DispatchStatus::NotReady
            }
            Some(Slot::Done(result)) => DispatchStatus::Ready(result),
        }
    }

    /// Number of requests currently holding a slot on the wire.
    pub fn in_flight(&self) -> usize {
        self.config.max_in_flight - self.permits.available_permits()
    }

    /// Detached results not collected yet (pending or done).
    pub fn outstanding(&self) -> usize {
        lock(&self.results).len()
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The future run on each request task. Owns everything it needs so it
    /// can be spawned.
    fn execute(&self, request: HttpRequest) -> impl Future<Output = DispatchResult> + Send + use<S> {
        let session = Arc::clone(&self.session);
        let events = Arc::clone(&self.events);
        let permits = Arc::clone(&self.permits);
        let request = request
            .header("User-Agent", self.config.user_agent.clone())
            .timeout(self.config.timeout);

        async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Err(DispatchError::TaskFailed("dispatcher closed".into()));
            };

            debug!(method = %request.method, url = %request.url, "request started");
            match session.execute(request.clone()).await {
                Ok(response) => classify_response(response, request, &events),
                Err(error) => {
                    if events.has_subscribers(EventKind::NetworkException) {
                        warn!(url = %request.url, %error, "network failure passed to subscribers");
                        events.notify(&Event::NetworkException(NetworkFailure { error, request }));
                        Ok(None)
                    } else {
                        Err(DispatchError::Transport(error))
                    }
                }
            }
        }
    }
}

fn classify_response(response: HttpResponse, request: HttpRequest, events: &EventBus) -> DispatchResult {
    debug!(
        method = %request.method,
        url = %request.url,
        status = response.status,
        "request finished"
    );

    if response.is_success() {
        if response.is_empty() {
            return Ok(Some(Value::Null));
        }
        return Ok(Some(serde_json::from_slice(&response.body)?));
    }

    let failure = RequestFailure {
        method: request.method,
        url: request.url.clone(),
        status: response.status,
        body: response.text(),
        request,
    };
    if events.has_subscribers(EventKind::Error) {
        warn!(%failure, "request failure passed to subscribers");
        events.notify(&Event::Error(failure));
        Ok(None)
    } else {
        Err(DispatchError::Request(failure))
    }
}

fn lock(table: &Mutex<HashMap<DispatchHandle, Slot>>) -> std::sync::MutexGuard<'_, HashMap<DispatchHandle, Slot>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}
