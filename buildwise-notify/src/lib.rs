//! Message notifications for trade conversations between project owners and
//! contractors.
//!
//! Messages are persisted per conversation in a [`storage::KeyValueStorage`],
//! broadcast through a [`NotificationBus`], and tracked per party by a
//! [`ConversationWatch`] that exposes the unread count and a short-lived
//! blink flag.

pub mod bus;
pub mod error;
pub mod models;
pub mod service;
pub mod storage;
pub mod store;
pub mod watch;

// Re-export main types
pub use bus::{NotificationBus, Subscription, WatcherHandle, NEW_MESSAGE_EVENT};
pub use error::{Error, Result};
pub use service::{NotificationConfig, NotificationService, NotificationServiceBuilder};
pub use store::{NotificationStore, SweepReport, DEFAULT_KEY_PREFIX, DEFAULT_RETENTION_DAYS};
pub use watch::{ConversationWatch, UnreadState, WatchBuilder, WatchPhase};

// Re-export commonly used models
pub use models::{ConversationKey, MessageNotification, NotificationId, Role};
