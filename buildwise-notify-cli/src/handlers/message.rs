//! Conversation handlers.

use anyhow::{bail, Result};
use buildwise_notify::{
    ConversationKey, MessageNotification, NotificationService, Role, UnreadState,
};
use chrono::{DateTime, Utc};
use colored::Colorize;
use rust_i18n::t;
use serde::Serialize;

use crate::output::{format_relative_time, PlainPrint, TableRow};

/// Message info.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationInfo {
    pub id: String,
    pub conversation: String,
    pub sender: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl From<&MessageNotification> for NotificationInfo {
    fn from(n: &MessageNotification) -> Self {
        Self {
            id: n.id().to_string(),
            conversation: n.conversation_key().to_string(),
            sender: n.sender().to_string(),
            message: n.message().to_owned(),
            timestamp: n.timestamp(),
            read: n.is_read(),
        }
    }
}

impl TableRow for NotificationInfo {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "From", "Message", "Time", "Read"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.sender.clone(),
            self.message.clone(),
            format_relative_time(self.timestamp),
            if self.read {
                "✓".to_string()
            } else {
                "●".to_string()
            },
        ]
    }
}

impl PlainPrint for NotificationInfo {
    fn plain_print(&self) {
        let unread_marker = if self.read {
            String::new()
        } else {
            "● ".red().to_string()
        };
        println!(
            "{}[{}] {}",
            unread_marker,
            self.sender.cyan(),
            format_relative_time(self.timestamp).dimmed()
        );
        for line in self.message.lines() {
            if !line.trim().is_empty() {
                println!("   {}", line);
            }
        }
    }
}

/// Conversation overview row.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationInfo {
    pub conversation: String,
    pub messages: usize,
    pub unread_for_owner: usize,
    pub unread_for_contractor: usize,
    pub last_time: Option<DateTime<Utc>>,
}

impl TableRow for ConversationInfo {
    fn headers() -> Vec<&'static str> {
        vec!["Conversation", "Messages", "Unread (owner)", "Unread (contractor)", "Last"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.conversation.clone(),
            self.messages.to_string(),
            self.unread_for_owner.to_string(),
            self.unread_for_contractor.to_string(),
            self.last_time
                .map(format_relative_time)
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

impl PlainPrint for ConversationInfo {
    fn plain_print(&self) {
        let last = self
            .last_time
            .map(format_relative_time)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "[{}] {} {}",
            self.conversation.cyan(),
            t!("message_count", count = self.messages),
            last.dimmed()
        );
        let unread = |count: usize, role: Role| {
            if count > 0 {
                println!(
                    "   {}",
                    t!("unread_for", count = count, role = role).yellow()
                );
            }
        };
        unread(self.unread_for_owner, Role::ProjectOwner);
        unread(self.unread_for_contractor, Role::Contractor);
    }
}

/// Message list result.
#[derive(Debug, Clone, Serialize)]
pub struct MessageListResult {
    pub conversation: String,
    pub messages: Vec<NotificationInfo>,
}

/// Send result.
#[derive(Debug, Clone, Serialize)]
pub struct SendResult {
    pub id: String,
    pub conversation: String,
    pub sender: String,
}

/// Mark read result.
#[derive(Debug, Clone, Serialize)]
pub struct MarkReadResult {
    pub conversation: String,
    pub recipient: String,
    pub marked: usize,
}

/// Clear result.
#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub conversation: String,
    pub success: bool,
}

/// Sweep result.
#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub retention_days: u32,
    pub scanned: usize,
    pub evicted: usize,
    pub rewritten: usize,
    pub removed: usize,
    pub skipped: usize,
}

/// Watch state info.
#[derive(Debug, Clone, Serialize)]
pub struct WatchStateInfo {
    pub conversation: String,
    pub recipient: String,
    pub unread_count: usize,
    pub blinking: bool,
    pub phase: String,
}

impl WatchStateInfo {
    /// Build from a watch snapshot.
    pub fn new(key: &ConversationKey, recipient: Role, state: UnreadState) -> Self {
        Self {
            conversation: key.to_string(),
            recipient: recipient.to_string(),
            unread_count: state.unread_count,
            blinking: state.blinking,
            phase: format!("{:?}", state.phase()),
        }
    }
}

impl PlainPrint for WatchStateInfo {
    fn plain_print(&self) {
        let count = t!("unread_count", count = self.unread_count);
        let count = if self.unread_count > 0 {
            count.yellow().to_string()
        } else {
            count.dimmed().to_string()
        };
        if self.blinking {
            println!("{} {}", count, t!("blink_marker").red().bold());
        } else {
            println!("{}", count);
        }
    }
}

/// Send a message.
pub fn send_message(
    service: &NotificationService,
    key: &ConversationKey,
    sender: Role,
    text: &str,
) -> Result<SendResult> {
    if text.trim().is_empty() {
        bail!("{}", t!("empty_message"));
    }
    let sent = service.send(key, sender, text)?;
    Ok(SendResult {
        id: sent.id().to_string(),
        conversation: key.to_string(),
        sender: sender.to_string(),
    })
}

/// List all messages of a conversation.
pub fn list_messages(service: &NotificationService, key: &ConversationKey) -> MessageListResult {
    MessageListResult {
        conversation: key.to_string(),
        messages: service
            .store()
            .list(key)
            .iter()
            .map(NotificationInfo::from)
            .collect(),
    }
}

/// List unread messages for a role.
pub fn list_unread(
    service: &NotificationService,
    key: &ConversationKey,
    recipient: Role,
) -> MessageListResult {
    MessageListResult {
        conversation: key.to_string(),
        messages: service
            .store()
            .list_unread_for(key, recipient)
            .iter()
            .map(NotificationInfo::from)
            .collect(),
    }
}

/// Mark everything from the other party read.
pub fn mark_read(
    service: &NotificationService,
    key: &ConversationKey,
    recipient: Role,
) -> Result<MarkReadResult> {
    let marked = service.store().mark_all_read_for(key, recipient)?;
    Ok(MarkReadResult {
        conversation: key.to_string(),
        recipient: recipient.to_string(),
        marked,
    })
}

/// Delete a conversation.
pub fn clear(service: &NotificationService, key: &ConversationKey) -> Result<ClearResult> {
    service.store().clear(key)?;
    Ok(ClearResult {
        conversation: key.to_string(),
        success: true,
    })
}

/// Overview of every stored conversation.
pub fn list_conversations(service: &NotificationService) -> Result<Vec<ConversationInfo>> {
    let store = service.store();
    Ok(store
        .conversations()?
        .iter()
        .map(|key| {
            let messages = store.list(key);
            ConversationInfo {
                conversation: key.to_string(),
                messages: messages.len(),
                unread_for_owner: messages
                    .iter()
                    .filter(|n| n.is_unread_for(Role::ProjectOwner))
                    .count(),
                unread_for_contractor: messages
                    .iter()
                    .filter(|n| n.is_unread_for(Role::Contractor))
                    .count(),
                last_time: messages.last().map(|n| n.timestamp()),
            }
        })
        .collect())
}

/// Evict messages older than `days`.
pub fn sweep(service: &NotificationService, days: u32) -> Result<SweepResult> {
    let report = service.store().sweep_older_than(days)?;
    Ok(SweepResult {
        retention_days: days,
        scanned: report.scanned,
        evicted: report.evicted,
        rewritten: report.rewritten,
        removed: report.removed,
        skipped: report.skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildwise_notify::storage::KeyValueStorage;

    fn service() -> NotificationService {
        NotificationService::builder().build().unwrap()
    }

    #[test]
    fn test_send_and_list() {
        let service = service();
        let key = ConversationKey::from("42");

        let sent = send_message(&service, &key, Role::ProjectOwner, "Hello").unwrap();
        assert!(sent.id.starts_with("42_"));
        assert_eq!(sent.sender, "bautraeger");

        let list = list_messages(&service, &key);
        assert_eq!(list.messages.len(), 1);
        assert_eq!(list.messages[0].message, "Hello");
        assert!(!list.messages[0].read);
    }

    #[test]
    fn test_empty_message_rejected() {
        let service = service();
        let key = ConversationKey::from("42");

        assert!(send_message(&service, &key, Role::ProjectOwner, " \n ").is_err());
        assert!(list_messages(&service, &key).messages.is_empty());
    }

    #[test]
    fn test_unread_and_mark_read() {
        let service = service();
        let key = ConversationKey::from("42");
        send_message(&service, &key, Role::ProjectOwner, "a").unwrap();
        send_message(&service, &key, Role::ProjectOwner, "b").unwrap();

        assert_eq!(list_unread(&service, &key, Role::Contractor).messages.len(), 2);
        assert!(list_unread(&service, &key, Role::ProjectOwner).messages.is_empty());

        let result = mark_read(&service, &key, Role::Contractor).unwrap();
        assert_eq!(result.marked, 2);
        assert!(list_unread(&service, &key, Role::Contractor).messages.is_empty());
    }

    #[test]
    fn test_conversation_overview() {
        let service = service();
        send_message(&service, &"1".into(), Role::ProjectOwner, "a").unwrap();
        send_message(&service, &"1".into(), Role::Contractor, "b").unwrap();
        send_message(&service, &"1".into(), Role::Contractor, "c").unwrap();
        send_message(&service, &"2".into(), Role::ProjectOwner, "d").unwrap();

        let rows = list_conversations(&service).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].conversation, "1");
        assert_eq!(rows[0].messages, 3);
        assert_eq!(rows[0].unread_for_owner, 2);
        assert_eq!(rows[0].unread_for_contractor, 1);
        assert_eq!(rows[1].unread_for_contractor, 1);
    }

    #[test]
    fn test_clear_and_sweep() {
        let service = service();
        let key = ConversationKey::from("9");
        send_message(&service, &key, Role::Contractor, "x").unwrap();

        let swept = sweep(&service, 7).unwrap();
        assert_eq!(swept.evicted, 0);
        assert_eq!(swept.scanned, 1);

        clear(&service, &key).unwrap();
        assert!(service
            .store()
            .storage()
            .get(&service.store().storage_key(&key))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_watch_state_info() {
        let info = WatchStateInfo::new(
            &"3".into(),
            Role::Contractor,
            UnreadState {
                unread_count: 2,
                blinking: true,
            },
        );
        assert_eq!(info.phase, "Blinking");
        assert_eq!(info.recipient, "dienstleister");
    }
}
