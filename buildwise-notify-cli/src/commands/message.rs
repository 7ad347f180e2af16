//! Message commands.

use anyhow::Result;
use buildwise_notify::{ConversationKey, NotificationService, Role};
use clap::Subcommand;
use colored::Colorize;
use rust_i18n::t;

use crate::handlers::message as handlers;
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Subcommand)]
pub enum MessageAction {
    /// Send a message in a conversation
    Send {
        /// Conversation (trade) ID
        conversation: String,
        /// Role to send as: bautraeger/owner or dienstleister/contractor
        #[arg(short = 'a', long = "as", value_name = "ROLE")]
        role: Role,
        /// Message text
        text: String,
    },

    /// List all messages of a conversation
    #[command(alias = "ls")]
    List {
        /// Conversation (trade) ID
        conversation: String,
    },

    /// List messages unread by a role
    Unread {
        /// Conversation (trade) ID
        conversation: String,
        /// Role reading the conversation
        #[arg(short = 'a', long = "as", value_name = "ROLE")]
        role: Role,
    },

    /// Mark all messages from the other party as read
    Read {
        /// Conversation (trade) ID
        conversation: String,
        /// Role reading the conversation
        #[arg(short = 'a', long = "as", value_name = "ROLE")]
        role: Role,
    },

    /// Delete every message of a conversation
    Clear {
        /// Conversation (trade) ID
        conversation: String,
    },

    /// Show all stored conversations
    Conversations,
}

pub fn handle(
    action: MessageAction,
    service: &NotificationService,
    format: OutputFormat,
) -> Result<()> {
    match action {
        MessageAction::Send {
            conversation,
            role,
            text,
        } => send_message(service, &conversation.into(), role, &text, format),
        MessageAction::List { conversation } => {
            list_messages(service, &conversation.into(), format)
        }
        MessageAction::Unread { conversation, role } => {
            list_unread(service, &conversation.into(), role, format)
        }
        MessageAction::Read { conversation, role } => {
            mark_read(service, &conversation.into(), role, format)
        }
        MessageAction::Clear { conversation } => clear(service, &conversation.into(), format),
        MessageAction::Conversations => list_conversations(service, format),
    }
}

fn send_message(
    service: &NotificationService,
    key: &ConversationKey,
    role: Role,
    text: &str,
    format: OutputFormat,
) -> Result<()> {
    let result = handlers::send_message(service, key, role, text)?;

    if matches!(format, OutputFormat::Json) {
        print_json(&result);
    } else {
        println!(
            "{} {}",
            "✓".green(),
            t!("message_sent", key = key, role = role)
        );
    }
    Ok(())
}

fn list_messages(
    service: &NotificationService,
    key: &ConversationKey,
    format: OutputFormat,
) -> Result<()> {
    let result = handlers::list_messages(service, key);

    if matches!(format, OutputFormat::Plain) {
        println!(
            "{}\n",
            t!(
                "conversation_header",
                key = key.to_string().cyan(),
                count = result.messages.len()
            )
        );
    }

    print_table(result.messages, format);
    Ok(())
}

fn list_unread(
    service: &NotificationService,
    key: &ConversationKey,
    role: Role,
    format: OutputFormat,
) -> Result<()> {
    let result = handlers::list_unread(service, key, role);

    if matches!(format, OutputFormat::Plain) {
        println!(
            "{}\n",
            t!("unread_header", count = result.messages.len(), role = role, key = key)
                .yellow()
        );
    }

    print_table(result.messages, format);
    Ok(())
}

fn mark_read(
    service: &NotificationService,
    key: &ConversationKey,
    role: Role,
    format: OutputFormat,
) -> Result<()> {
    let result = handlers::mark_read(service, key, role)?;

    if matches!(format, OutputFormat::Json) {
        print_json(&result);
    } else {
        println!(
            "{} {}",
            "✓".green(),
            t!("marked_read", count = result.marked, role = role, key = key)
        );
    }
    Ok(())
}

fn clear(service: &NotificationService, key: &ConversationKey, format: OutputFormat) -> Result<()> {
    let result = handlers::clear(service, key)?;

    if matches!(format, OutputFormat::Json) {
        print_json(&result);
    } else {
        println!("{} {}", "✓".green(), t!("cleared", key = key));
    }
    Ok(())
}

fn list_conversations(service: &NotificationService, format: OutputFormat) -> Result<()> {
    let rows = handlers::list_conversations(service)?;
    print_table(rows, format);
    Ok(())
}

pub fn sweep(service: &NotificationService, days: u32, format: OutputFormat) -> Result<()> {
    let result = handlers::sweep(service, days)?;

    if matches!(format, OutputFormat::Json) {
        print_json(&result);
    } else {
        println!(
            "{} {}",
            "✓".green(),
            t!(
                "swept",
                days = days,
                evicted = result.evicted,
                removed = result.removed
            )
        );
        if result.skipped > 0 {
            println!("{}", t!("sweep_skipped", count = result.skipped).yellow());
        }
    }
    Ok(())
}
