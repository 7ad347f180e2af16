//! Broadcast of newly sent notifications.
//!
//! A send reaches listeners over two channels: an in-process event carrying
//! the new notification, and a storage-change signal carrying the full list
//! written for the conversation. The storage channel is also how writes made
//! by other processes sharing the same storage arrive, through the polling
//! watcher started with [`NotificationBus::spawn_watcher`].

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinHandle, time::MissedTickBehavior};

use crate::{
    error::{Error, Result},
    models::{ConversationKey, MessageNotification, NotificationId, Role},
    storage::KeyValueStorage,
    store::NotificationStore,
};

/// Name of the in-process new-message event.
pub const NEW_MESSAGE_EVENT: &str = "buildwise_new_message";

/// Lock a mutex, recovering the data if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Listener = Arc<dyn Fn(&MessageNotification) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Local,
    Storage,
}

struct Registration {
    id: u64,
    channel: Channel,
    listener: Listener,
}

struct BusInner {
    store: NotificationStore,
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
    /// Last notification ID known per storage key, either written here or
    /// already reported by the watcher.
    seen: Mutex<HashMap<String, NotificationId>>,
}

/// Process-local notification broadcaster.
///
/// Cheap to clone; clones share listeners.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    /// Create a bus persisting through `store`.
    pub fn new(store: NotificationStore) -> Self {
        Self {
            inner: Arc::new(BusInner {
                store,
                registrations: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                seen: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Store used for persistence.
    pub fn store(&self) -> &NotificationStore {
        &self.inner.store
    }

    /// Persist a new message and broadcast it.
    ///
    /// `message` is expected to be non-empty; it is not checked here.
    /// Listeners run on the calling thread before this returns, the
    /// in-process event first, then the storage-change signal.
    pub fn send(
        &self,
        key: &ConversationKey,
        sender: Role,
        message: impl Into<String>,
    ) -> Result<MessageNotification> {
        let store = &self.inner.store;
        let notification = MessageNotification::new(key.clone(), sender, message);
        let storage_key = store.storage_key(key);

        let list = {
            let mut seen = lock(&self.inner.seen);
            let list = store.append(key, notification.clone())?;
            seen.insert(storage_key.clone(), notification.id().clone());
            list
        };
        log::debug!(
            "sent {} from {} in conversation {}",
            notification.id(),
            sender,
            key
        );

        self.dispatch(Channel::Local, &notification);
        let new_value = serde_json::to_string(&list)?;
        self.handle_storage_change(&storage_key, Some(&new_value));

        Ok(notification)
    }

    /// Register `callback` for every new notification of every conversation.
    ///
    /// The callback is registered on both channels, so a send in this process
    /// invokes it twice. Filtering by conversation or sender is up to the
    /// caller.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MessageNotification) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        let local = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let storage = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registrations = lock(&self.inner.registrations);
        registrations.push(Registration {
            id: local,
            channel: Channel::Local,
            listener: listener.clone(),
        });
        registrations.push(Registration {
            id: storage,
            channel: Channel::Storage,
            listener,
        });

        Subscription {
            bus: Arc::downgrade(&self.inner),
            ids: [local, storage],
            active: AtomicBool::new(true),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.registrations)
            .iter()
            .filter(|r| r.channel == Channel::Local)
            .count()
    }

    /// Deliver a storage-change signal.
    ///
    /// Keys outside the notification prefix and removals are ignored; the
    /// newest element of the list in `new_value` goes to every listener.
    pub fn handle_storage_change(&self, key: &str, new_value: Option<&str>) {
        if !key.starts_with(self.inner.store.prefix()) {
            return;
        }
        let Some(raw) = new_value else {
            return;
        };

        let list: Vec<MessageNotification> = match serde_json::from_str(raw) {
            Ok(list) => list,
            Err(e) => {
                log::warn!("ignoring unparsable storage change for {}: {}", key, e);
                return;
            }
        };
        if let Some(latest) = list.last() {
            self.dispatch(Channel::Storage, latest);
        }
    }

    /// Scan the storage once and signal every conversation whose newest
    /// notification changed since the last scan or local send.
    ///
    /// Returns the number of signals delivered.
    pub fn poll_storage(&self) -> Result<usize> {
        let changes = self.scan_changes()?;
        for (key, raw) in &changes {
            self.handle_storage_change(key, Some(raw));
        }
        Ok(changes.len())
    }

    /// Poll the storage every `interval` on the current Tokio runtime.
    ///
    /// Whatever is stored when this is called counts as already seen. The
    /// task ends when the handle is stopped or dropped, or when every clone
    /// of the bus is gone.
    pub fn spawn_watcher(&self, interval: Duration) -> Result<WatcherHandle> {
        if interval.is_zero() {
            return Err(Error::invalid("watcher interval must be positive"));
        }
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;

        self.scan_changes()?;

        let bus = Arc::downgrade(&self.inner);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = bus.upgrade() else {
                    break;
                };
                if let Err(e) = (NotificationBus { inner }).poll_storage() {
                    log::warn!("storage poll failed: {}", e);
                }
            }
        });

        Ok(WatcherHandle { task })
    }

    fn scan_changes(&self) -> Result<Vec<(String, String)>> {
        let store = &self.inner.store;
        let mut seen = lock(&self.inner.seen);

        let keys = store.storage().scan_prefix(store.prefix())?;
        let present: HashSet<&String> = keys.iter().collect();
        seen.retain(|k, _| present.contains(k));

        let mut changes = Vec::new();
        for key in &keys {
            let Some(raw) = store.storage().get(key)? else {
                continue;
            };
            let Ok(list) = serde_json::from_str::<Vec<MessageNotification>>(&raw) else {
                continue;
            };
            let Some(latest) = list.last() else {
                seen.remove(key);
                continue;
            };
            if seen.get(key) != Some(latest.id()) {
                seen.insert(key.clone(), latest.id().clone());
                changes.push((key.clone(), raw));
            }
        }
        Ok(changes)
    }

    fn dispatch(&self, channel: Channel, notification: &MessageNotification) {
        let listeners: Vec<Listener> = lock(&self.inner.registrations)
            .iter()
            .filter(|r| r.channel == channel)
            .map(|r| r.listener.clone())
            .collect();

        for listener in listeners {
            listener(notification);
        }
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("prefix", &self.inner.store.prefix())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Registration returned by [`NotificationBus::subscribe`].
///
/// Dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<BusInner>,
    ids: [u64; 2],
    active: AtomicBool,
}

impl Subscription {
    /// Remove the callback from both channels. Safe to call repeatedly and
    /// after the bus is gone.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            lock(&bus.registrations).retain(|r| !self.ids.contains(&r.id));
        }
    }

    /// Whether the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.bus.strong_count() > 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("ids", &self.ids)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Handle of a running storage watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop polling.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Whether the polling task is still alive.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use crate::store::DEFAULT_KEY_PREFIX;
    use pretty_assertions::assert_eq;

    fn memory_bus() -> NotificationBus {
        NotificationBus::new(NotificationStore::new(
            Arc::new(MemoryStorage::new()),
            DEFAULT_KEY_PREFIX,
        ))
    }

    fn file_bus(dir: &std::path::Path) -> NotificationBus {
        let storage = FileStorage::open(dir).unwrap();
        NotificationBus::new(NotificationStore::new(Arc::new(storage), DEFAULT_KEY_PREFIX))
    }

    fn recorder() -> (
        Arc<Mutex<Vec<MessageNotification>>>,
        impl Fn(&MessageNotification) + Send + Sync + 'static,
    ) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        (received, move |n: &MessageNotification| {
            sink.lock().unwrap().push(n.clone())
        })
    }

    #[test]
    fn test_send_persists_and_reaches_both_channels() {
        let bus = memory_bus();
        let (received, callback) = recorder();
        let _sub = bus.subscribe(callback);

        let key = ConversationKey::from("42");
        let sent = bus.send(&key, Role::ProjectOwner, "Hello").unwrap();

        assert_eq!(bus.store().list(&key), vec![sent.clone()]);
        assert_eq!(*received.lock().unwrap(), vec![sent.clone(), sent]);
    }

    #[test]
    fn test_no_prefiltering_by_conversation() {
        let bus = memory_bus();
        let (received, callback) = recorder();
        let _sub = bus.subscribe(callback);

        bus.send(&"1".into(), Role::ProjectOwner, "a").unwrap();
        bus.send(&"2".into(), Role::Contractor, "b").unwrap();

        let keys: Vec<String> = received
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.conversation_key().to_string())
            .collect();
        assert_eq!(keys, vec!["1", "1", "2", "2"]);
    }

    #[test]
    fn test_late_subscriber_gets_no_replay() {
        let bus = memory_bus();
        bus.send(&"1".into(), Role::ProjectOwner, "early").unwrap();

        let (received, callback) = recorder();
        let _sub = bus.subscribe(callback);
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(bus.store().list(&"1".into()).len(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = memory_bus();
        let (received, callback) = recorder();
        let sub = bus.subscribe(callback);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(sub.is_active());

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(bus.subscriber_count(), 0);

        bus.send(&"1".into(), Role::ProjectOwner, "x").unwrap();
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes_and_outliving_bus_is_safe() {
        let bus = memory_bus();
        {
            let _sub = bus.subscribe(|_| {});
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);

        let sub = bus.subscribe(|_| {});
        drop(bus);
        assert!(!sub.is_active());
        sub.unsubscribe();
    }

    #[test]
    fn test_callback_may_use_bus() {
        let bus = memory_bus();
        let inner = bus.clone();
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        let _sub = bus.subscribe(move |_| {
            sink.lock().unwrap().push(inner.subscriber_count());
        });

        bus.send(&"1".into(), Role::Contractor, "x").unwrap();
        assert_eq!(*counts.lock().unwrap(), vec![1, 1]);
    }

    #[test]
    fn test_storage_change_filtering() {
        let bus = memory_bus();
        let (received, callback) = recorder();
        let _sub = bus.subscribe(callback);

        let list = vec![
            MessageNotification::new("9".into(), Role::ProjectOwner, "first"),
            MessageNotification::new("9".into(), Role::Contractor, "second"),
        ];
        let raw = serde_json::to_string(&list).unwrap();

        bus.handle_storage_change("other_prefix_9", Some(&raw));
        bus.handle_storage_change("buildwise_message_notification_9", None);
        bus.handle_storage_change("buildwise_message_notification_9", Some("{broken"));
        bus.handle_storage_change("buildwise_message_notification_9", Some("[]"));
        assert!(received.lock().unwrap().is_empty());

        bus.handle_storage_change("buildwise_message_notification_9", Some(&raw));
        assert_eq!(*received.lock().unwrap(), vec![list[1].clone()]);
    }

    #[test]
    fn test_poll_reports_foreign_writes_only() {
        let dir = tempfile::tempdir().unwrap();
        let here = file_bus(dir.path());
        let there = file_bus(dir.path());
        let key = ConversationKey::from("42");

        let (received, callback) = recorder();
        let _sub = here.subscribe(callback);

        // Own sends are already known.
        here.send(&key, Role::ProjectOwner, "mine").unwrap();
        received.lock().unwrap().clear();
        assert_eq!(here.poll_storage().unwrap(), 0);

        let theirs = there.send(&key, Role::Contractor, "theirs").unwrap();
        assert_eq!(here.poll_storage().unwrap(), 1);
        assert_eq!(*received.lock().unwrap(), vec![theirs]);

        // Read-flag rewrites do not look like new messages.
        there
            .store()
            .mark_all_read_for(&key, Role::Contractor)
            .unwrap();
        assert_eq!(here.poll_storage().unwrap(), 0);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_poll_after_clear_and_resend() {
        let dir = tempfile::tempdir().unwrap();
        let here = file_bus(dir.path());
        let there = file_bus(dir.path());
        let key = ConversationKey::from("5");

        there.send(&key, Role::Contractor, "one").unwrap();
        assert_eq!(here.poll_storage().unwrap(), 1);

        there.store().clear(&key).unwrap();
        assert_eq!(here.poll_storage().unwrap(), 0);

        there.send(&key, Role::Contractor, "two").unwrap();
        assert_eq!(here.poll_storage().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_watcher_delivers() {
        let dir = tempfile::tempdir().unwrap();
        let here = file_bus(dir.path());
        let there = file_bus(dir.path());
        let key = ConversationKey::from("42");

        there.send(&key, Role::Contractor, "before").unwrap();

        let (received, callback) = recorder();
        let _sub = here.subscribe(callback);
        let watcher = here.spawn_watcher(Duration::from_millis(100)).unwrap();
        assert!(watcher.is_running());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(received.lock().unwrap().is_empty());

        let sent = there.send(&key, Role::Contractor, "after").unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*received.lock().unwrap(), vec![sent]);

        watcher.stop();
        let late = there.send(&key, Role::Contractor, "stopped").unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!received.lock().unwrap().contains(&late));
    }

    #[test]
    fn test_watcher_needs_runtime() {
        let bus = memory_bus();
        assert!(matches!(
            bus.spawn_watcher(Duration::from_millis(10)),
            Err(Error::Runtime(_))
        ));
        assert!(matches!(
            bus.spawn_watcher(Duration::ZERO),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_storage_key_matches_store() {
        let bus = memory_bus();
        bus.send(&"3".into(), Role::ProjectOwner, "x").unwrap();
        let raw = bus
            .store()
            .storage()
            .get("buildwise_message_notification_3")
            .unwrap();
        assert!(raw.is_some());
    }
}
