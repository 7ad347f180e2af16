//! Live conversation watch.

use anyhow::Result;
use buildwise_notify::{ConversationKey, NotificationService, Role};
use clap::Args;
use rust_i18n::t;

use crate::handlers::message::{NotificationInfo, WatchStateInfo};
use crate::output::{print_json, OutputFormat, PlainPrint};

#[derive(Args)]
pub struct WatchArgs {
    /// Conversation (trade) ID
    conversation: String,

    /// Role of the local user
    #[arg(short = 'a', long = "as", value_name = "ROLE")]
    role: Role,

    /// Mark everything read when the watch stops
    #[arg(long)]
    mark_read: bool,
}

pub async fn handle(
    args: WatchArgs,
    service: &NotificationService,
    format: OutputFormat,
) -> Result<()> {
    let key = ConversationKey::from(args.conversation);
    let role = args.role;
    let json = matches!(format, OutputFormat::Json);

    let watch = service.watch_with_callback(key.clone(), role, move |notification| {
        let info = NotificationInfo::from(notification);
        if json {
            print_json(&info);
        } else {
            println!("{}", t!("new_message", sender = &info.sender));
            info.plain_print();
        }
    })?;
    let _watcher = service.spawn_storage_watcher()?;
    tracing::debug!(conversation = %key, role = %role, "watch started");

    if !json {
        println!("{}", t!("watching", key = &key, role = role));
    }
    print_state(&WatchStateInfo::new(&key, role, watch.state()), json);

    let mut changes = watch.changes();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *changes.borrow_and_update();
                print_state(&WatchStateInfo::new(&key, role, state), json);
            }
        }
    }

    if args.mark_read {
        watch.mark_as_read()?;
    }
    if !json {
        println!("{}", t!("watch_stopped"));
    }
    Ok(())
}

fn print_state(state: &WatchStateInfo, json: bool) {
    if json {
        print_json(state);
    } else {
        state.plain_print();
    }
}
