//! Unread and attention state of one conversation, as seen by one party.
//!
//! A [`ConversationWatch`] is bound to a conversation key and the role of the
//! local user. It starts from the unread count in the store, then listens on
//! the bus: every message from the other party in this conversation
//! recomputes the count and starts a blink that switches itself off after a
//! fixed delay. Another message during the delay restarts it.

use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use tokio::{runtime::Handle, sync::watch, task::JoinHandle};

use crate::{
    bus::{lock, NotificationBus, Subscription},
    error::{Error, Result},
    models::{ConversationKey, MessageNotification, Role},
    store::NotificationStore,
};

/// How long a new message keeps the blink flag set.
pub const DEFAULT_BLINK_DURATION: Duration = Duration::from_secs(5);

type MessageCallback = Arc<dyn Fn(&MessageNotification) + Send + Sync>;

/// Coarse state of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    /// Nothing unread.
    Read,
    /// Unread messages, no recent arrival.
    Unread,
    /// A message arrived within the blink delay.
    Blinking,
}

/// Snapshot of a watch's derived state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnreadState {
    /// Messages from the other party not yet read.
    pub unread_count: usize,
    /// Attention flag after a new arrival.
    pub blinking: bool,
}

impl UnreadState {
    /// Whether anything is unread.
    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }

    /// Phase of the state machine.
    pub fn phase(&self) -> WatchPhase {
        if self.blinking {
            WatchPhase::Blinking
        } else if self.has_unread() {
            WatchPhase::Unread
        } else {
            WatchPhase::Read
        }
    }
}

struct BlinkState {
    current: UnreadState,
    /// Bumped whenever the pending timer is replaced or cancelled, so a timer
    /// that already woke up cannot clear a newer blink.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl BlinkState {
    fn cancel_timer(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Shared {
    key: ConversationKey,
    recipient: Role,
    store: NotificationStore,
    blink_duration: Duration,
    runtime: Handle,
    on_new_message: Option<MessageCallback>,
    state: Mutex<BlinkState>,
    changes: watch::Sender<UnreadState>,
}

impl Shared {
    fn on_notification(self: &Arc<Self>, notification: &MessageNotification) {
        if notification.conversation_key() != &self.key || notification.sender() == self.recipient
        {
            return;
        }

        let unread_count = self.store.unread_count_for(&self.key, self.recipient);
        {
            let mut state = lock(&self.state);
            state.current = UnreadState {
                unread_count,
                blinking: true,
            };
            self.restart_timer(&mut state);
            self.changes.send_replace(state.current);
        }
        log::debug!(
            "new message for {} in conversation {} ({} unread)",
            self.recipient,
            self.key,
            unread_count
        );

        if let Some(callback) = &self.on_new_message {
            callback(notification);
        }
    }

    fn restart_timer(self: &Arc<Self>, state: &mut BlinkState) {
        state.cancel_timer();

        let generation = state.generation;
        let delay = self.blink_duration;
        let shared: Weak<Shared> = Arc::downgrade(self);
        state.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.stop_blink(generation);
            }
        }));
    }

    fn stop_blink(&self, generation: u64) {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return;
        }
        state.timer = None;
        if state.current.blinking {
            state.current.blinking = false;
            self.changes.send_replace(state.current);
        }
    }
}

/// Builder for [`ConversationWatch`].
pub struct WatchBuilder {
    bus: NotificationBus,
    key: ConversationKey,
    recipient: Role,
    blink_duration: Duration,
    on_new_message: Option<MessageCallback>,
}

impl WatchBuilder {
    /// Set the blink delay.
    pub fn blink_duration(mut self, duration: Duration) -> Self {
        self.blink_duration = duration;
        self
    }

    /// Call `callback` with every message that reaches this watch.
    pub fn on_new_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MessageNotification) + Send + Sync + 'static,
    {
        self.on_new_message = Some(Arc::new(callback));
        self
    }

    /// Compute the initial state and start listening.
    ///
    /// Must be called within a Tokio runtime, which runs the blink timers.
    pub fn start(self) -> Result<ConversationWatch> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        let store = self.bus.store().clone();

        let initial = UnreadState {
            unread_count: store.unread_count_for(&self.key, self.recipient),
            blinking: false,
        };
        let (changes, _) = watch::channel(initial);

        let shared = Arc::new(Shared {
            key: self.key,
            recipient: self.recipient,
            store,
            blink_duration: self.blink_duration,
            runtime,
            on_new_message: self.on_new_message,
            state: Mutex::new(BlinkState {
                current: initial,
                generation: 0,
                timer: None,
            }),
            changes,
        });

        let weak = Arc::downgrade(&shared);
        let subscription = self.bus.subscribe(move |notification| {
            if let Some(shared) = weak.upgrade() {
                shared.on_notification(notification);
            }
        });

        Ok(ConversationWatch {
            shared,
            bus: self.bus,
            subscription,
        })
    }
}

/// Live unread state of one conversation for one role.
///
/// Dropping the watch unsubscribes from the bus and cancels a pending blink
/// timer.
pub struct ConversationWatch {
    shared: Arc<Shared>,
    bus: NotificationBus,
    subscription: Subscription,
}

impl ConversationWatch {
    /// Start configuring a watch of `key` for `recipient`.
    pub fn builder(bus: &NotificationBus, key: ConversationKey, recipient: Role) -> WatchBuilder {
        WatchBuilder {
            bus: bus.clone(),
            key,
            recipient,
            blink_duration: DEFAULT_BLINK_DURATION,
            on_new_message: None,
        }
    }

    /// Watch with default settings.
    pub fn new(bus: &NotificationBus, key: ConversationKey, recipient: Role) -> Result<Self> {
        Self::builder(bus, key, recipient).start()
    }

    /// Watched conversation.
    pub fn key(&self) -> &ConversationKey {
        &self.shared.key
    }

    /// Role of the local user.
    pub fn recipient(&self) -> Role {
        self.shared.recipient
    }

    /// Current state.
    pub fn state(&self) -> UnreadState {
        lock(&self.shared.state).current
    }

    /// Unread messages from the other party.
    pub fn unread_count(&self) -> usize {
        self.state().unread_count
    }

    /// Whether anything is unread.
    pub fn has_unread(&self) -> bool {
        self.state().has_unread()
    }

    /// Whether the blink flag is set.
    pub fn is_blinking(&self) -> bool {
        self.state().blinking
    }

    /// Receiver observing every state change.
    pub fn changes(&self) -> watch::Receiver<UnreadState> {
        self.shared.changes.subscribe()
    }

    /// Mark everything from the other party read and stop blinking.
    pub fn mark_as_read(&self) -> Result<()> {
        self.shared
            .store
            .mark_all_read_for(&self.shared.key, self.shared.recipient)?;

        let mut state = lock(&self.shared.state);
        state.cancel_timer();
        state.current = UnreadState::default();
        self.shared.changes.send_replace(state.current);
        Ok(())
    }

    /// Send `text` as the local user.
    ///
    /// Empty or whitespace-only text is rejected. The watch's own state does
    /// not change.
    pub fn send_message(&self, text: &str) -> Result<MessageNotification> {
        if text.trim().is_empty() {
            return Err(Error::invalid("message must not be empty"));
        }
        self.bus
            .send(&self.shared.key, self.shared.recipient, text)
    }
}

impl Drop for ConversationWatch {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
        lock(&self.shared.state).cancel_timer();
    }
}

impl fmt::Debug for ConversationWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationWatch")
            .field("key", &self.shared.key)
            .field("recipient", &self.shared.recipient)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::store::DEFAULT_KEY_PREFIX;
    use pretty_assertions::assert_eq;

    const OWNER: Role = Role::ProjectOwner;
    const CONTRACTOR: Role = Role::Contractor;

    fn bus() -> NotificationBus {
        NotificationBus::new(NotificationStore::new(
            Arc::new(MemoryStorage::new()),
            DEFAULT_KEY_PREFIX,
        ))
    }

    fn key(k: &str) -> ConversationKey {
        ConversationKey::from(k)
    }

    fn state(unread_count: usize, blinking: bool) -> UnreadState {
        UnreadState {
            unread_count,
            blinking,
        }
    }

    async fn after(millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_from_store() {
        let bus = bus();
        bus.send(&key("42"), CONTRACTOR, "a").unwrap();
        bus.send(&key("42"), CONTRACTOR, "b").unwrap();
        bus.send(&key("42"), OWNER, "c").unwrap();

        let owner = ConversationWatch::new(&bus, key("42"), OWNER).unwrap();
        assert_eq!(owner.state(), state(2, false));
        assert_eq!(owner.state().phase(), WatchPhase::Unread);

        let contractor = ConversationWatch::new(&bus, key("42"), CONTRACTOR).unwrap();
        assert_eq!(contractor.state(), state(1, false));

        let idle = ConversationWatch::new(&bus, key("43"), OWNER).unwrap();
        assert_eq!(idle.state().phase(), WatchPhase::Read);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_scenario() {
        let bus = bus();
        let a = ConversationWatch::new(&bus, key("42"), OWNER).unwrap();
        let b = ConversationWatch::new(&bus, key("42"), CONTRACTOR).unwrap();

        a.send_message("Hello").unwrap();
        assert_eq!(b.state(), state(1, true));
        assert_eq!(b.state().phase(), WatchPhase::Blinking);

        b.mark_as_read().unwrap();
        assert_eq!(b.state(), state(0, false));
        assert!(bus.store().list_unread_for(&key("42"), CONTRACTOR).is_empty());
        assert!(bus.store().list_unread_for(&key("42"), OWNER).is_empty());
        assert_eq!(a.state(), state(0, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_messages_never_unread() {
        let bus = bus();
        let owner = ConversationWatch::new(&bus, key("1"), OWNER).unwrap();

        owner.send_message("Wann beginnen Sie?").unwrap();
        owner.send_message("Bitte um Rückmeldung").unwrap();

        assert_eq!(owner.state(), state(0, false));
        assert_eq!(bus.store().unread_count_for(&key("1"), CONTRACTOR), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_conversations_ignored() {
        let bus = bus();
        let owner = ConversationWatch::new(&bus, key("1"), OWNER).unwrap();

        bus.send(&key("2"), CONTRACTOR, "elsewhere").unwrap();
        assert_eq!(owner.state(), state(0, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_expires_after_delay() {
        let bus = bus();
        let owner = ConversationWatch::new(&bus, key("1"), OWNER).unwrap();

        bus.send(&key("1"), CONTRACTOR, "x").unwrap();
        assert!(owner.is_blinking());

        after(4_900).await;
        assert!(owner.is_blinking());

        after(200).await;
        assert_eq!(owner.state(), state(1, false));
        assert_eq!(owner.state().phase(), WatchPhase::Unread);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrigger_resets_blink_delay() {
        let bus = bus();
        let owner = ConversationWatch::new(&bus, key("1"), OWNER).unwrap();

        bus.send(&key("1"), CONTRACTOR, "first").unwrap();
        after(2_500).await;
        bus.send(&key("1"), CONTRACTOR, "second").unwrap();

        // 1.2 times the delay after the first message.
        after(3_500).await;
        assert_eq!(owner.state(), state(2, true));

        after(2_000).await;
        assert_eq!(owner.state(), state(2, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_as_read_cancels_pending_timer() {
        let bus = bus();
        let owner = ConversationWatch::new(&bus, key("1"), OWNER).unwrap();

        bus.send(&key("1"), CONTRACTOR, "first").unwrap();
        after(1_000).await;
        owner.mark_as_read().unwrap();
        assert_eq!(owner.state(), state(0, false));

        after(3_000).await;
        bus.send(&key("1"), CONTRACTOR, "second").unwrap();

        // The first timer would have fired at 5s.
        after(2_000).await;
        assert_eq!(owner.state(), state(1, true));

        after(4_000).await;
        assert_eq!(owner.state(), state(1, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_blink_duration() {
        let bus = bus();
        let owner = ConversationWatch::builder(&bus, key("1"), OWNER)
            .blink_duration(Duration::from_millis(300))
            .start()
            .unwrap();

        bus.send(&key("1"), CONTRACTOR, "x").unwrap();
        after(250).await;
        assert!(owner.is_blinking());
        after(100).await;
        assert!(!owner.is_blinking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_receiver_observes_transitions() {
        let bus = bus();
        let owner = ConversationWatch::new(&bus, key("1"), OWNER).unwrap();
        let mut changes = owner.changes();
        assert_eq!(*changes.borrow_and_update(), state(0, false));

        bus.send(&key("1"), CONTRACTOR, "x").unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), state(1, true));

        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), state(1, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_new_message_callback() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _owner = ConversationWatch::builder(&bus, key("1"), OWNER)
            .on_new_message(move |n| sink.lock().unwrap().push(n.id().clone()))
            .start()
            .unwrap();

        bus.send(&key("1"), OWNER, "own").unwrap();
        let sent = bus.send(&key("1"), CONTRACTOR, "theirs").unwrap();

        // Once per channel.
        assert_eq!(*seen.lock().unwrap(), vec![sent.id().clone(), sent.id().clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_tears_down() {
        let bus = bus();
        let owner = ConversationWatch::new(&bus, key("1"), OWNER).unwrap();
        let mut changes = owner.changes();
        bus.send(&key("1"), CONTRACTOR, "x").unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        drop(owner);
        assert_eq!(bus.subscriber_count(), 0);
        let _ = changes.borrow_and_update();

        after(6_000).await;
        assert!(changes.changed().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_message_rejected() {
        let bus = bus();
        let owner = ConversationWatch::new(&bus, key("1"), OWNER).unwrap();

        assert!(matches!(
            owner.send_message("   "),
            Err(Error::InvalidArgument(_))
        ));
        assert!(bus.store().list(&key("1")).is_empty());
    }

    #[test]
    fn test_requires_runtime() {
        let bus = bus();
        assert!(matches!(
            ConversationWatch::new(&bus, key("1"), OWNER),
            Err(Error::Runtime(_))
        ));
    }
}
