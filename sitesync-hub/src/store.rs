//! In-memory chat history and notification backlog.
//!
//! [`ChatHistory`] keeps a bounded FIFO of messages per room so late joiners
//! get recent context. [`NotificationQueue`] keeps the last notifications so
//! subscribers can catch up on what they missed.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tokio::sync::RwLock;

/// Default number of messages retained per room.
pub const DEFAULT_ROOM_CAPACITY: usize = 100;

/// Default number of notifications retained for replay.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 100;

/// Per-room message history with FIFO eviction.
pub struct ChatHistory {
    rooms: RwLock<HashMap<String, VecDeque<Value>>>,
    capacity: usize,
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ROOM_CAPACITY)
    }
}

impl ChatHistory {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Appends a message to `room`, returning the room's new length.
    ///
    /// The oldest message is evicted once the room exceeds its capacity.
    pub async fn append(&self, room: &str, message: Value) -> usize {
        let mut rooms = self.rooms.write().await;
        let history = rooms.entry(room.to_string()).or_default();
        history.push_back(message);
        while history.len() > self.capacity {
            history.pop_front();
        }
        history.len()
    }

    /// The last `limit` messages of `room`, oldest first.
    ///
    /// `None` when nothing was ever said in the room.
    pub async fn recent(&self, room: &str, limit: usize) -> Option<Vec<Value>> {
        let rooms = self.rooms.read().await;
        let history = rooms.get(room)?;
        let skip = history.len().saturating_sub(limit);
        Some(history.iter().skip(skip).cloned().collect())
    }

    /// Names of every room with history, sorted.
    pub async fn rooms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn total(&self) -> usize {
        self.rooms.read().await.values().map(VecDeque::len).sum()
    }
}

/// Bounded backlog of emitted notifications.
pub struct NotificationQueue {
    items: RwLock<VecDeque<Value>>,
    capacity: usize,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl NotificationQueue {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    /// Queues a notification, evicting the oldest past capacity.
    pub async fn push(&self, notification: Value) -> usize {
        let mut items = self.items.write().await;
        items.push_back(notification);
        while items.len() > self.capacity {
            items.pop_front();
        }
        items.len()
    }

    /// Notifications addressed to `user_id` plus every broadcast, oldest first.
    pub async fn pending_for(&self, user_id: &Value) -> Vec<Value> {
        self.items
            .read()
            .await
            .iter()
            .filter(|n| {
                n.get("user_id").unwrap_or(&Value::Null) == user_id
                    || n.get("broadcast").and_then(Value::as_bool) == Some(true)
            })
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}
