//! CLI commands.

pub mod message;
pub mod watch;
