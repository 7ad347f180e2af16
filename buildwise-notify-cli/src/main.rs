//! bwn: command-line front end for trade conversation notifications.

mod commands;
mod config;
mod handlers;
mod output;

use anyhow::Result;
use buildwise_notify::DEFAULT_RETENTION_DAYS;
use clap::{Parser, Subcommand};
use commands::{message, watch};
use rust_i18n::t;
use std::path::PathBuf;

rust_i18n::i18n!("src/locales", fallback = "en");

/// Trade conversation notifications
#[derive(Parser)]
#[command(name = "bwn")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "plain")]
    format: output::OutputFormat,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Language for output (en, de)
    #[arg(short, long, global = true, default_value = "en")]
    lang: String,

    /// Storage directory shared by all bwn processes
    #[arg(long, global = true, env = "BWN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Message operations
    #[command(alias = "m")]
    Message {
        #[command(subcommand)]
        action: message::MessageAction,
    },

    /// Watch a conversation for new messages
    #[command(alias = "w")]
    Watch(watch::WatchArgs),

    /// Remove messages older than the retention window
    Sweep {
        /// Retention in days (defaults to the configured retention)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Show current configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    rust_i18n::set_locale(&cli.lang);

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Message { action } => {
            let service = config::build_service(cli.data_dir.as_deref(), true)?;
            message::handle(action, &service, cli.format)
        }
        Commands::Watch(args) => {
            let service = config::build_service(cli.data_dir.as_deref(), true)?;
            watch::handle(args, &service, cli.format).await
        }
        Commands::Sweep { days } => {
            let cfg = config::load_config()?;
            let configured = cfg.notifications.retention_days;
            let days = days
                .or((configured > 0).then_some(configured))
                .unwrap_or(DEFAULT_RETENTION_DAYS);
            // The explicit window replaces the start-up sweep.
            let service = config::build_service(cli.data_dir.as_deref(), false)?;
            message::sweep(&service, days, cli.format)
        }
        Commands::Config { init } => handle_config(init, cli.data_dir),
    }
}

fn handle_config(init: bool, data_dir: Option<PathBuf>) -> Result<()> {
    let path = config::config_path()?;
    if init {
        if path.exists() {
            println!("{}", t!("config_exists", path = path.display()));
        } else {
            config::save_config(&config::Config::default())?;
            println!("{}", t!("config_written", path = path.display()));
        }
    }

    let cfg = config::load_config()?;
    let settings = &cfg.notifications;
    println!("{}", t!("config_file", path = path.display()));
    println!(
        "{}",
        t!(
            "data_dir",
            path = config::data_dir(&cfg, data_dir.as_deref())?.display()
        )
    );
    println!("{}", t!("key_prefix", prefix = &settings.key_prefix));
    if settings.retention_days > 0 {
        println!("{}", t!("retention", days = settings.retention_days));
    } else {
        println!("{}", t!("retention_disabled"));
    }
    println!("{}", t!("blink", secs = settings.blink_seconds));
    println!("{}", t!("poll_interval", ms = settings.poll_interval_ms));
    Ok(())
}
