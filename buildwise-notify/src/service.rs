//! Service facade and configuration.

use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    bus::{NotificationBus, WatcherHandle},
    error::Result,
    models::{ConversationKey, MessageNotification, Role},
    storage::{FileStorage, KeyValueStorage, MemoryStorage},
    store::{NotificationStore, DEFAULT_KEY_PREFIX, DEFAULT_RETENTION_DAYS},
    watch::{ConversationWatch, WatchBuilder, DEFAULT_BLINK_DURATION},
};

/// Default storage poll interval of the cross-process watcher.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Notification service configuration.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Prefix of every storage key.
    pub key_prefix: String,
    /// Retention of the start-up sweep; `None` skips the sweep.
    pub retention_days: Option<u32>,
    /// Blink delay of new watches.
    pub blink_duration: Duration,
    /// Poll interval of the storage watcher.
    pub poll_interval: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            retention_days: Some(DEFAULT_RETENTION_DAYS),
            blink_duration: DEFAULT_BLINK_DURATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

enum StorageChoice {
    Memory,
    Directory(PathBuf),
    Custom(Arc<dyn KeyValueStorage>),
}

/// Builder for creating NotificationService.
pub struct NotificationServiceBuilder {
    storage: StorageChoice,
    config: NotificationConfig,
}

impl std::fmt::Debug for NotificationServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = match &self.storage {
            StorageChoice::Memory => "memory".to_owned(),
            StorageChoice::Directory(path) => path.display().to_string(),
            StorageChoice::Custom(_) => "custom".to_owned(),
        };
        f.debug_struct("NotificationServiceBuilder")
            .field("storage", &storage)
            .field("config", &self.config)
            .finish()
    }
}

impl Default for NotificationServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationServiceBuilder {
    /// Create a new builder backed by memory storage.
    pub fn new() -> Self {
        Self {
            storage: StorageChoice::Memory,
            config: NotificationConfig::default(),
        }
    }

    /// Use a custom storage backend.
    pub fn storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = StorageChoice::Custom(storage);
        self
    }

    /// Use a storage directory shared with other processes.
    pub fn directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage = StorageChoice::Directory(path.into());
        self
    }

    /// Set the storage key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Set the start-up sweep retention, or disable it with `None`.
    pub fn retention_days(mut self, days: Option<u32>) -> Self {
        self.config.retention_days = days;
        self
    }

    /// Set the blink delay of new watches.
    pub fn blink_duration(mut self, duration: Duration) -> Self {
        self.config.blink_duration = duration;
        self
    }

    /// Set the storage watcher poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: NotificationConfig) -> Self {
        self.config = config;
        self
    }

    /// Build NotificationService, sweeping old notifications first.
    ///
    /// A failed sweep is logged and does not prevent the service from
    /// starting.
    pub fn build(self) -> Result<NotificationService> {
        let storage: Arc<dyn KeyValueStorage> = match self.storage {
            StorageChoice::Memory => Arc::new(MemoryStorage::new()),
            StorageChoice::Directory(path) => Arc::new(FileStorage::open(path)?),
            StorageChoice::Custom(storage) => storage,
        };

        let store = NotificationStore::new(storage, self.config.key_prefix.clone());
        if let Some(days) = self.config.retention_days {
            if let Err(e) = store.sweep_older_than(days) {
                log::warn!("start-up sweep failed: {}", e);
            }
        }

        Ok(NotificationService {
            inner: Arc::new(ServiceInner {
                bus: NotificationBus::new(store),
                config: self.config,
            }),
        })
    }
}

struct ServiceInner {
    bus: NotificationBus,
    config: NotificationConfig,
}

/// Entry point: owns the store and bus and hands out watches.
#[derive(Clone)]
pub struct NotificationService {
    inner: Arc<ServiceInner>,
}

impl NotificationService {
    /// Create a new service builder.
    pub fn builder() -> NotificationServiceBuilder {
        NotificationServiceBuilder::new()
    }

    /// Get the store.
    pub fn store(&self) -> &NotificationStore {
        self.inner.bus.store()
    }

    /// Get the bus.
    pub fn bus(&self) -> &NotificationBus {
        &self.inner.bus
    }

    /// Effective configuration.
    pub fn config(&self) -> &NotificationConfig {
        &self.inner.config
    }

    /// Send a message in a conversation.
    pub fn send(
        &self,
        key: &ConversationKey,
        sender: Role,
        message: impl Into<String>,
    ) -> Result<MessageNotification> {
        self.inner.bus.send(key, sender, message)
    }

    /// Configure a watch using the service's blink delay.
    pub fn watch_builder(&self, key: ConversationKey, recipient: Role) -> WatchBuilder {
        ConversationWatch::builder(&self.inner.bus, key, recipient)
            .blink_duration(self.inner.config.blink_duration)
    }

    /// Watch a conversation as `recipient`.
    pub fn watch(&self, key: ConversationKey, recipient: Role) -> Result<ConversationWatch> {
        self.watch_builder(key, recipient).start()
    }

    /// Watch a conversation and call `callback` for every new message.
    pub fn watch_with_callback<F>(
        &self,
        key: ConversationKey,
        recipient: Role,
        callback: F,
    ) -> Result<ConversationWatch>
    where
        F: Fn(&MessageNotification) + Send + Sync + 'static,
    {
        self.watch_builder(key, recipient)
            .on_new_message(callback)
            .start()
    }

    /// Start polling the storage for other processes' messages.
    pub fn spawn_storage_watcher(&self) -> Result<WatcherHandle> {
        self.inner
            .bus
            .spawn_watcher(self.inner.config.poll_interval)
    }
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService")
            .field("bus", &self.inner.bus)
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KeyValueStorage;
    use chrono::{Duration as ChronoDuration, Utc};

    #[test]
    fn test_default_config() {
        let config = NotificationConfig::default();
        assert_eq!(config.key_prefix, "buildwise_message_notification_");
        assert_eq!(config.retention_days, Some(7));
        assert_eq!(config.blink_duration, Duration::from_secs(5));
    }

    #[test]
    fn test_build_sweeps_old_notifications() {
        let storage = Arc::new(MemoryStorage::new());
        let store = NotificationStore::new(storage.clone(), DEFAULT_KEY_PREFIX);
        let old = MessageNotification::new_at(
            "1".into(),
            Role::Contractor,
            "alt",
            Utc::now() - ChronoDuration::days(10),
        );
        store.append(&"1".into(), old).unwrap();

        let service = NotificationService::builder()
            .storage(storage.clone())
            .build()
            .unwrap();
        assert!(service.store().list(&"1".into()).is_empty());
        assert!(storage.get("buildwise_message_notification_1").unwrap().is_none());
    }

    #[test]
    fn test_sweep_can_be_disabled() {
        let storage = Arc::new(MemoryStorage::new());
        let store = NotificationStore::new(storage.clone(), DEFAULT_KEY_PREFIX);
        let old = MessageNotification::new_at(
            "1".into(),
            Role::Contractor,
            "alt",
            Utc::now() - ChronoDuration::days(10),
        );
        store.append(&"1".into(), old).unwrap();

        let service = NotificationService::builder()
            .storage(storage)
            .retention_days(None)
            .build()
            .unwrap();
        assert_eq!(service.store().list(&"1".into()).len(), 1);
    }

    #[test]
    fn test_custom_prefix() {
        let service = NotificationService::builder()
            .key_prefix("tab_")
            .build()
            .unwrap();
        service.send(&"9".into(), Role::ProjectOwner, "x").unwrap();
        assert_eq!(service.store().storage_key(&"9".into()), "tab_9");
        assert!(service.store().storage().get("tab_9").unwrap().is_some());
    }

    #[test]
    fn test_directory_storage_shared_between_services() {
        let dir = tempfile::tempdir().unwrap();
        let first = NotificationService::builder()
            .directory(dir.path())
            .build()
            .unwrap();
        let second = NotificationService::builder()
            .directory(dir.path())
            .build()
            .unwrap();

        let sent = first.send(&"42".into(), Role::ProjectOwner, "Hallo").unwrap();
        assert_eq!(second.store().list(&"42".into()), vec![sent]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_uses_configured_blink() {
        let service = NotificationService::builder()
            .blink_duration(Duration::from_secs(1))
            .build()
            .unwrap();
        let watch = service.watch("1".into(), Role::ProjectOwner).unwrap();

        service.send(&"1".into(), Role::Contractor, "x").unwrap();
        assert!(watch.is_blinking());
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!watch.is_blinking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cross_service_watch() {
        let dir = tempfile::tempdir().unwrap();
        let owner_side = NotificationService::builder()
            .directory(dir.path())
            .poll_interval(Duration::from_millis(50))
            .build()
            .unwrap();
        let contractor_side = NotificationService::builder()
            .directory(dir.path())
            .build()
            .unwrap();

        let _watcher = owner_side.spawn_storage_watcher().unwrap();
        let watch = owner_side.watch("42".into(), Role::ProjectOwner).unwrap();

        contractor_side
            .send(&"42".into(), Role::Contractor, "Angebot anbei")
            .unwrap();
        assert_eq!(watch.unread_count(), 0);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(watch.unread_count(), 1);
        assert!(watch.is_blinking());
    }
}
