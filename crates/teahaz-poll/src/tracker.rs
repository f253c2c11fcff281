//! Checkpoint, dedup, and history for one chatroom's incoming messages.

use std::collections::HashSet;

use teahaz_protocol::{Message, MessageId};

/// The result of feeding one fetched batch to a [`MessageTracker`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accepted {
    /// New messages, oldest first.
    pub messages: Vec<Message>,
    /// How many messages of the batch had been seen before.
    pub duplicates: usize,
}

/// Remembers what a chatroom has already seen.
///
/// The checkpoint moves forward *before* each fetch (see [`advance`]), so a
/// message arriving while a request is in flight is caught by the next one.
/// The cost is that a message can come back twice; the seen-id set drops
/// the second copy.
///
/// [`advance`]: MessageTracker::advance
#[derive(Debug, Clone, Default)]
pub struct MessageTracker {
    checkpoint: f64,
    seen: HashSet<MessageId>,
    /// Every accepted message, in send-time order.
    history: Vec<Message>,
}

impl MessageTracker {
    /// A tracker whose first fetch asks for messages after `checkpoint`
    /// (epoch seconds).
    pub fn new(checkpoint: f64) -> Self {
        Self {
            checkpoint,
            ..Default::default()
        }
    }

    /// Moves the checkpoint to `now` and returns the previous one, which
    /// is the `since` of the fetch about to be made.
    pub fn advance(&mut self, now: f64) -> f64 {
        std::mem::replace(&mut self.checkpoint, now)
    }

    /// Drops already-seen messages from `batch`, orders the rest by send
    /// time, and appends them to the history.
    ///
    /// A message repeated within the batch counts once. Ties in send time
    /// keep the server's order.
    pub fn accept(&mut self, batch: Vec<Message>) -> Accepted {
        let total = batch.len();
        let mut messages: Vec<Message> = batch
            .into_iter()
            .filter(|m| self.seen.insert(m.id.clone()))
            .collect();
        messages.sort_by(|a, b| a.send_time.total_cmp(&b.send_time));

        self.history.extend(messages.iter().cloned());
        if self
            .history
            .windows(2)
            .any(|w| w[0].send_time > w[1].send_time)
        {
            self.history
                .sort_by(|a, b| a.send_time.total_cmp(&b.send_time));
        }

        Accepted {
            duplicates: total - messages.len(),
            messages,
        }
    }

    pub fn is_seen(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn checkpoint(&self) -> f64 {
        self.checkpoint
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }
}
