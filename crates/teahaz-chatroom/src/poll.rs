//! The background poll task.
//!
//! Holds only a weak reference to the chatroom, so dropping every
//! [`Chatroom`](crate::Chatroom) handle ends the task as surely as
//! [`stop`](crate::Chatroom::stop) does.

use std::sync::Weak;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use teahaz_poll::{PollConfig, PollScheduler};
use teahaz_protocol::{Message, PayloadCodec, WireMessage};
use teahaz_transport::HttpSession;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::chatroom::{MessageQuery, Shared, lock, messages_request};
use crate::events_for;

/// Current wall-clock time as epoch seconds, the server's time base.
pub(crate) fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Spawns the poll task. Must be called from within a Tokio runtime.
pub(crate) fn spawn<S: HttpSession>(
    shared: Weak<Shared<S>>,
    stop: watch::Receiver<bool>,
    config: PollConfig,
) -> JoinHandle<()> {
    tokio::spawn(run(shared, stop, config))
}

async fn run<S: HttpSession>(
    shared: Weak<Shared<S>>,
    mut stop: watch::Receiver<bool>,
    config: PollConfig,
) {
    let mut scheduler = PollScheduler::new(config);
    info!(interval_ms = scheduler.interval().as_millis() as u64, "poll loop started");

    loop {
        tokio::select! {
            biased;

            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }

            _ = scheduler.wait_for_poll() => {
                let Some(shared) = shared.upgrade() else { break };
                if shared.is_stopped() {
                    break;
                }
                poll_once(&shared, &mut scheduler).await;
                scheduler.schedule_next();
                *lock(&shared.poll_metrics) = scheduler.metrics().clone();
            }
        }
    }

    info!(polls = scheduler.poll_count(), "poll loop stopped");
}

/// One iteration: fetch everything since the checkpoint, keep what is new,
/// raise events for it in send-time order. The pause before the next
/// iteration starts when this returns.
async fn poll_once<S: HttpSession>(shared: &Shared<S>, scheduler: &mut PollScheduler) {
    let ctx = shared.context();
    let Some(channel) = ctx.active_channel().filter(|_| ctx.chatroom_id().is_some()) else {
        trace!("no active channel, poll skipped");
        scheduler.record_skip();
        return;
    };

    let since = lock(&shared.tracker).advance(epoch_now());
    let request = match messages_request(&ctx, &channel.id, MessageQuery::Since(since)) {
        Ok(request) => request,
        Err(error) => {
            warn!(%error, "could not build poll request");
            scheduler.record_failure();
            return;
        }
    };

    let body = match shared.dispatcher.call(request).await {
        Ok(Some(body)) => body,
        Ok(None) => {
            scheduler.record_failure();
            return;
        }
        Err(error) => {
            warn!(%error, channel_id = %channel.id, "poll failed, treating as empty batch");
            scheduler.record_failure();
            return;
        }
    };

    if shared.is_stopped() {
        debug!("chatroom stopped during poll, batch dropped");
        return;
    }

    let batch = decode_batch(body, shared.codec.as_ref());
    let accepted = lock(&shared.tracker).accept(batch);
    scheduler.record_batch(accepted.messages.len(), accepted.duplicates);
    if !accepted.messages.is_empty() {
        debug!(
            new = accepted.messages.len(),
            duplicates = accepted.duplicates,
            "poll accepted messages"
        );
    }

    for message in &accepted.messages {
        for event in events_for(message) {
            shared.events.notify(&event);
        }
    }
}

/// Decodes a poll response. Messages that fail to decode are skipped; a
/// body that is not a list counts as empty.
fn decode_batch(body: Value, codec: &dyn PayloadCodec) -> Vec<Message> {
    let items = match body {
        Value::Array(items) => items,
        Value::Null => return Vec::new(),
        other => {
            warn!(body = %other, "poll response is not a message list, ignored");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| {
            let decoded = serde_json::from_value::<WireMessage>(item)
                .map_err(teahaz_protocol::ProtocolError::from)
                .and_then(|wire| Message::from_wire(wire, codec));
            match decoded {
                Ok(message) => Some(message),
                Err(error) => {
                    warn!(%error, "undecodable message skipped");
                    None
                }
            }
        })
        .collect()
}
