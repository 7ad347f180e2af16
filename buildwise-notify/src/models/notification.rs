//! Message notification model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

use super::{ConversationKey, NotificationId, Role};

/// Last creation stamp handed out in this process, in microseconds.
static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Current time, strictly later than any stamp previously returned.
fn unique_now() -> DateTime<Utc> {
    let now = Utc::now();
    let micros = now.timestamp_micros();
    let prev = LAST_STAMP
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(micros.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    DateTime::<Utc>::from_timestamp_micros(micros.max(prev + 1)).unwrap_or(now)
}

/// A message sent in a trade conversation.
///
/// Everything except the read flag is fixed at creation; the flag can only
/// go from unread to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotification {
    id: NotificationId,
    conversation_key: ConversationKey,
    sender: Role,
    message: String,
    timestamp: DateTime<Utc>,
    read: bool,
}

impl MessageNotification {
    /// Create an unread notification stamped with the current time.
    pub fn new(key: ConversationKey, sender: Role, message: impl Into<String>) -> Self {
        Self::new_at(key, sender, message, unique_now())
    }

    /// Create an unread notification with an explicit creation time.
    pub fn new_at(
        key: ConversationKey,
        sender: Role,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::compose(&key, timestamp.timestamp_micros()),
            conversation_key: key,
            sender,
            message: message.into(),
            timestamp,
            read: false,
        }
    }

    /// Notification ID.
    pub fn id(&self) -> &NotificationId {
        &self.id
    }

    /// Conversation this notification belongs to.
    pub fn conversation_key(&self) -> &ConversationKey {
        &self.conversation_key
    }

    /// Role that sent the message.
    pub fn sender(&self) -> Role {
        self.sender
    }

    /// Message text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the recipient has read it.
    pub fn is_read(&self) -> bool {
        self.read
    }

    /// Unread from the point of view of `recipient`.
    ///
    /// A party never has its own messages unread.
    pub fn is_unread_for(&self, recipient: Role) -> bool {
        self.sender != recipient && !self.read
    }

    /// Created at or before `cutoff`.
    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.timestamp <= cutoff
    }

    /// Flag as read. Returns `true` if the flag changed.
    pub(crate) fn mark_read(&mut self) -> bool {
        let changed = !self.read;
        self.read = true;
        changed
    }
}
