//! Team messaging.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Recipient wildcard for broadcasts.
pub const BROADCAST: &str = "all";

/// One message between team members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMessage {
    /// Sender member name.
    pub from: String,
    /// Recipient member name, or `"all"` for a broadcast.
    pub to: String,
    /// Message content.
    pub content: String,
    /// Send time, unix milliseconds.
    pub timestamp_ms: u64,
}

impl TeamMessage {
    /// Whether this message was a broadcast.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }
}

/// Ordered, append-only message log for one team.
#[derive(Debug, Default)]
pub struct Mailbox {
    messages: Mutex<Vec<TeamMessage>>,
}

impl Mailbox {
    /// Create an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Sender/recipient validation happens at the
    /// team layer, which knows the member roster.
    pub fn push(&self, from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) {
        let message = TeamMessage {
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        };
        self.messages
            .lock()
            .expect("mailbox lock poisoned")
            .push(message);
    }

    /// All messages in send order.
    #[must_use]
    pub fn all(&self) -> Vec<TeamMessage> {
        self.messages.lock().expect("mailbox lock poisoned").clone()
    }

    /// Messages addressed to a member, including broadcasts.
    #[must_use]
    pub fn for_member(&self, name: &str) -> Vec<TeamMessage> {
        self.messages
            .lock()
            .expect("mailbox lock poisoned")
            .iter()
            .filter(|m| m.to == name || m.is_broadcast())
            .cloned()
            .collect()
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().expect("mailbox lock poisoned").len()
    }

    /// Whether the mailbox is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_keep_send_order() {
        let mailbox = Mailbox::new();
        mailbox.push("a", "b", "first");
        mailbox.push("b", "a", "second");

        let all = mailbox.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "first");
        assert_eq!(all[1].content, "second");
        assert!(all[0].timestamp_ms <= all[1].timestamp_ms);
    }

    #[test]
    fn broadcasts_reach_every_member() {
        let mailbox = Mailbox::new();
        mailbox.push("lead", BROADCAST, "standup");
        mailbox.push("a", "b", "private");

        let for_c = mailbox.for_member("c");
        assert_eq!(for_c.len(), 1);
        assert!(for_c[0].is_broadcast());

        let for_b = mailbox.for_member("b");
        assert_eq!(for_b.len(), 2);
    }
}
