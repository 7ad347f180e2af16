//! Data models for trade conversations.

mod ids;
mod notification;
mod role;

pub use ids::{ConversationKey, NotificationId};
pub use notification::MessageNotification;
pub use role::Role;
