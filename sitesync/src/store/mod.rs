//! Client-visible state folded from the event stream and REST snapshots.
//!
//! [`SyncState`] is a plain reducer: [`SyncState::apply`] takes one inbound
//! event and updates the projections. [`SyncStore`] puts it behind a single
//! lock, stamps events with its [`Clock`], and publishes a revision number
//! after every mutation so observers never see a half-applied event.

pub mod feed;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sitesync_proto::event::{
    Alert, BadgeUpdate, ChatMessage, InboundEvent, Notification, TypingUpdate, UserId,
};
use sitesync_proto::presence::PresenceUpdate;
use tokio::sync::{broadcast, watch};

use crate::clock::{Clock, SystemClock};
use feed::Feed;

/// Room used for a `chat_history` that carries no messages.
pub const FALLBACK_ROOM: &str = "general";

/// Default bound of the badge feed.
pub const DEFAULT_BADGE_CAPACITY: usize = 50;

/// Default bound of the notification feed.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 100;

/// Feed bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub badges: usize,
    pub notifications: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            badges: DEFAULT_BADGE_CAPACITY,
            notifications: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

/// Which projection an update touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Messages { room: String },
    Typing { room: String },
    Notifications,
    Badges,
    Presence { employe_id: UserId },
}

/// The projections.
#[derive(Debug, Clone)]
pub struct SyncState {
    messages: HashMap<String, Vec<ChatMessage>>,
    /// Room → current typist; `None` once they stopped.
    typing: HashMap<String, Option<String>>,
    notifications: Feed<Notification>,
    badges: Feed<BadgeUpdate>,
    presence: HashMap<UserId, PresenceUpdate>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl SyncState {
    #[must_use]
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            messages: HashMap::new(),
            typing: HashMap::new(),
            notifications: Feed::new(limits.notifications),
            badges: Feed::new(limits.badges),
            presence: HashMap::new(),
        }
    }

    /// Fold one inbound event. Returns what changed, if anything.
    ///
    /// `now` is only used to name notifications synthesized from alerts.
    pub fn apply(&mut self, event: InboundEvent, now: DateTime<Utc>) -> Option<Change> {
        match event {
            InboundEvent::NewMessage(message) => {
                let room = message.room.clone();
                self.messages.entry(room.clone()).or_default().push(message);
                Some(Change::Messages { room })
            }
            InboundEvent::ChatHistory(history) => {
                let room = history
                    .first()
                    .map(|m| m.room.as_str())
                    .filter(|room| !room.is_empty())
                    .unwrap_or(FALLBACK_ROOM)
                    .to_string();
                self.messages.insert(room.clone(), history);
                Some(Change::Messages { room })
            }
            InboundEvent::UserTyping(TypingUpdate { user, typing, room }) => {
                self.typing.insert(room.clone(), typing.then_some(user));
                Some(Change::Typing { room })
            }
            InboundEvent::Notification(notification) => {
                self.notifications.push_front(notification);
                Some(Change::Notifications)
            }
            InboundEvent::PendingNotifications(batch) => {
                self.notifications.prepend_batch(batch);
                Some(Change::Notifications)
            }
            InboundEvent::BadgeUpdate(badge) => {
                self.badges.push_front(badge);
                Some(Change::Badges)
            }
            InboundEvent::AlertBroadcast(alert) => {
                self.notifications.push_front(alert_notification(alert, now));
                Some(Change::Notifications)
            }
            InboundEvent::PresenceUpdate(update) => {
                let Some(employe_id) = update.employe_id.clone() else {
                    tracing::debug!("presence update without employe_id, skipping");
                    return None;
                };
                self.presence.insert(employe_id.clone(), update);
                Some(Change::Presence { employe_id })
            }
            InboundEvent::Housekeeping(_) => None,
        }
    }

    /// Merge today's badges fetched over REST.
    pub fn load_badges(&mut self, snapshot: Vec<BadgeUpdate>) {
        self.badges
            .merge_snapshot(snapshot, |live, older| match (live.key(), older.key()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            });
    }

    /// Merge the notification backlog fetched over REST.
    pub fn load_notifications(&mut self, snapshot: Vec<Notification>) {
        self.notifications.merge_snapshot(snapshot, |live, older| {
            !live.id.is_empty() && live.id == older.id
        });
    }

    /// Dismiss every notification with `id`. Returns whether any was removed.
    pub fn remove_notification(&mut self, id: &str) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|n| n.id != id);
        self.notifications.len() != before
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }

    /// Messages of `room`, in arrival order.
    #[must_use]
    pub fn messages(&self, room: &str) -> &[ChatMessage] {
        self.messages.get(room).map_or(&[], Vec::as_slice)
    }

    /// Rooms that have a message list.
    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    /// Who is typing in `room`, if anyone.
    #[must_use]
    pub fn typist(&self, room: &str) -> Option<&str> {
        self.typing.get(room).and_then(Option::as_deref)
    }

    #[must_use]
    pub const fn notifications(&self) -> &Feed<Notification> {
        &self.notifications
    }

    #[must_use]
    pub const fn badges(&self) -> &Feed<BadgeUpdate> {
        &self.badges
    }

    #[must_use]
    pub fn presence(&self, employe_id: &UserId) -> Option<&PresenceUpdate> {
        self.presence.get(employe_id)
    }

    pub fn presence_entries(&self) -> impl Iterator<Item = &PresenceUpdate> {
        self.presence.values()
    }
}

fn alert_notification(alert: Alert, now: DateTime<Utc>) -> Notification {
    Notification {
        id: format!("alert_{}", now.timestamp_millis()),
        title: alert.title,
        message: alert.message,
        kind: alert.kind,
        time: alert.time,
        data: None,
    }
}

struct StoreInner {
    state: RwLock<SyncState>,
    revision: watch::Sender<u64>,
    changes: broadcast::Sender<Change>,
    clock: Arc<dyn Clock>,
}

/// Shared handle to the projections.
///
/// Cloning is cheap; all clones see the same state.
#[derive(Clone)]
pub struct SyncStore {
    inner: Arc<StoreInner>,
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl SyncStore {
    #[must_use]
    pub fn new(limits: StoreLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(limits: StoreLimits, clock: Arc<dyn Clock>) -> Self {
        let (revision, _) = watch::channel(0);
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(SyncState::new(limits)),
                revision,
                changes,
                clock,
            }),
        }
    }

    /// Fold one inbound event.
    pub fn apply(&self, event: InboundEvent) -> Option<Change> {
        let name = event.name().to_string();
        let now = self.inner.clock.now();
        let change = self.inner.state.write().apply(event, now);
        match &change {
            Some(change) => {
                tracing::debug!(event = %name, ?change, "event applied");
                self.publish(Some(change.clone()));
            }
            None => tracing::trace!(event = %name, "event had no effect"),
        }
        change
    }

    /// Merge today's badges fetched over REST.
    pub fn load_badges(&self, snapshot: Vec<BadgeUpdate>) {
        let count = snapshot.len();
        self.inner.state.write().load_badges(snapshot);
        tracing::debug!(count, "badge snapshot merged");
        self.publish(Some(Change::Badges));
    }

    /// Merge the notification backlog fetched over REST.
    pub fn load_notifications(&self, snapshot: Vec<Notification>) {
        let count = snapshot.len();
        self.inner.state.write().load_notifications(snapshot);
        tracing::debug!(count, "notification snapshot merged");
        self.publish(Some(Change::Notifications));
    }

    /// Dismiss a notification. Returns whether one was removed.
    pub fn remove_notification(&self, id: &str) -> bool {
        let removed = self.inner.state.write().remove_notification(id);
        if removed {
            self.publish(Some(Change::Notifications));
        }
        removed
    }

    pub fn clear_notifications(&self) {
        self.inner.state.write().clear_notifications();
        self.publish(Some(Change::Notifications));
    }

    fn publish(&self, change: Option<Change>) {
        self.inner.revision.send_modify(|revision| *revision += 1);
        if let Some(change) = change {
            // No subscribers is fine.
            let _ = self.inner.changes.send(change);
        }
    }

    /// Run `f` against a consistent view of the state.
    pub fn read<R>(&self, f: impl FnOnce(&SyncState) -> R) -> R {
        f(&self.inner.state.read())
    }

    /// Current revision; bumped after every mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Watch the revision counter.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Receive every change as it is applied.
    #[must_use]
    pub fn changes(&self) -> broadcast::Receiver<Change> {
        self.inner.changes.subscribe()
    }

    #[must_use]
    pub fn messages(&self, room: &str) -> Vec<ChatMessage> {
        self.read(|state| state.messages(room).to_vec())
    }

    #[must_use]
    pub fn typist(&self, room: &str) -> Option<String> {
        self.read(|state| state.typist(room).map(str::to_string))
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.read(|state| state.notifications().to_vec())
    }

    #[must_use]
    pub fn badges(&self) -> Vec<BadgeUpdate> {
        self.read(|state| state.badges().to_vec())
    }

    #[must_use]
    pub fn presence(&self, employe_id: &UserId) -> Option<PresenceUpdate> {
        self.read(|state| state.presence(employe_id).cloned())
    }
}
