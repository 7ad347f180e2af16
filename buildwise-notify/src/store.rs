//! Durable per-conversation notification lists.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    models::{ConversationKey, MessageNotification, Role},
    storage::{KeyValueStorage, KeyValueStorageExt},
};

/// Default prefix of every notification storage key.
pub const DEFAULT_KEY_PREFIX: &str = "buildwise_message_notification_";

/// Default retention window of the start-up sweep.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Outcome of a sweep over all conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Conversation keys inspected.
    pub scanned: usize,
    /// Keys rewritten with fewer entries.
    pub rewritten: usize,
    /// Keys removed because nothing was left.
    pub removed: usize,
    /// Notifications evicted in total.
    pub evicted: usize,
    /// Keys left untouched because their value did not parse.
    pub skipped: usize,
}

/// Notification lists keyed by conversation.
///
/// Each conversation is stored as one JSON array under
/// `<prefix><conversation key>`, oldest first. Every mutation reads the whole
/// list, changes it and writes the whole list back; writers in other
/// processes are not coordinated with.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    storage: Arc<dyn KeyValueStorage>,
    prefix: Arc<str>,
}

impl NotificationStore {
    /// Create a store over `storage` using `prefix` for keys.
    pub fn new(storage: Arc<dyn KeyValueStorage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: Arc::from(prefix.into()),
        }
    }

    /// Underlying storage.
    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }

    /// Key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Storage key of a conversation.
    pub fn storage_key(&self, key: &ConversationKey) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Conversation a storage key belongs to, if it carries the prefix.
    pub fn conversation_for(&self, storage_key: &str) -> Option<ConversationKey> {
        storage_key
            .strip_prefix(&*self.prefix)
            .map(ConversationKey::from)
    }

    /// Load the persisted list.
    ///
    /// `None` when nothing is stored or the stored value cannot be read or
    /// parsed.
    pub fn load(&self, key: &ConversationKey) -> Option<Vec<MessageNotification>> {
        self.storage.get_json(&self.storage_key(key))
    }

    /// All notifications of a conversation, oldest first.
    pub fn list(&self, key: &ConversationKey) -> Vec<MessageNotification> {
        self.load(key).unwrap_or_default()
    }

    /// Append a notification and return the full list as written.
    ///
    /// A corrupt existing value is replaced. The notification must belong to
    /// `key`.
    pub fn append(
        &self,
        key: &ConversationKey,
        notification: MessageNotification,
    ) -> Result<Vec<MessageNotification>> {
        if notification.conversation_key() != key {
            return Err(Error::invalid(format!(
                "notification of conversation {} cannot be stored under {}",
                notification.conversation_key(),
                key
            )));
        }

        let mut list = self.list(key);
        list.push(notification);
        self.storage.set_json(&self.storage_key(key), &list)?;
        Ok(list)
    }

    /// Unread notifications sent to `recipient` by the other party.
    pub fn list_unread_for(
        &self,
        key: &ConversationKey,
        recipient: Role,
    ) -> Vec<MessageNotification> {
        self.list(key)
            .into_iter()
            .filter(|n| n.is_unread_for(recipient))
            .collect()
    }

    /// Number of unread notifications for `recipient`.
    pub fn unread_count_for(&self, key: &ConversationKey, recipient: Role) -> usize {
        self.list(key)
            .iter()
            .filter(|n| n.is_unread_for(recipient))
            .count()
    }

    /// Mark everything the other party sent as read.
    ///
    /// Rewrites the whole list when one is stored and returns how many
    /// notifications changed.
    pub fn mark_all_read_for(&self, key: &ConversationKey, recipient: Role) -> Result<usize> {
        let Some(mut list) = self.load(key) else {
            return Ok(0);
        };

        let sender = recipient.other();
        let changed = list
            .iter_mut()
            .filter(|n| n.sender() == sender)
            .map(|n| n.mark_read())
            .filter(|&changed| changed)
            .count();

        self.storage.set_json(&self.storage_key(key), &list)?;
        log::debug!(
            "marked {} notification(s) read for {} in conversation {}",
            changed,
            recipient,
            key
        );
        Ok(changed)
    }

    /// Delete a conversation's list.
    pub fn clear(&self, key: &ConversationKey) -> Result<()> {
        self.storage.remove(&self.storage_key(key))?;
        log::debug!("cleared notifications of conversation {}", key);
        Ok(())
    }

    /// Every conversation with a persisted list.
    pub fn conversations(&self) -> Result<Vec<ConversationKey>> {
        Ok(self
            .storage
            .scan_prefix(&self.prefix)?
            .iter()
            .filter_map(|k| self.conversation_for(k))
            .collect())
    }

    /// Evict notifications older than `retention_days`.
    ///
    /// A window reaching past the earliest representable time evicts nothing
    /// but entries stamped at that time.
    pub fn sweep_older_than(&self, retention_days: u32) -> Result<SweepReport> {
        let cutoff = ChronoDuration::try_days(i64::from(retention_days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.sweep_before(cutoff)
    }

    /// Evict notifications created at or before `cutoff`.
    pub fn sweep_before(&self, cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for storage_key in self.storage.scan_prefix(&self.prefix)? {
            report.scanned += 1;

            let Some(list) = self
                .storage
                .get_json::<Vec<MessageNotification>>(&storage_key)
            else {
                report.skipped += 1;
                continue;
            };

            let before = list.len();
            let kept: Vec<_> = list
                .into_iter()
                .filter(|n| !n.is_older_than(cutoff))
                .collect();

            if kept.is_empty() {
                self.storage.remove(&storage_key)?;
                report.removed += 1;
            } else if kept.len() != before {
                self.storage.set_json(&storage_key, &kept)?;
                report.rewritten += 1;
            }
            report.evicted += before - kept.len();
        }

        log::info!(
            "swept notifications older than {}: {} evicted, {} key(s) removed",
            cutoff.to_rfc3339(),
            report.evicted,
            report.removed
        );
        Ok(report)
    }
}
