//! Channel subscription protocol.
//!
//! On every successful connect the client re-announces itself and its
//! channels, in this order:
//!
//! 1. `register_user { username, user_id }`
//! 2. `subscribe_notifications { user_id }`
//! 3. `subscribe_badges {}`
//! 4. `join_chat { chantier_id, username }` for each desired room, in the
//!    order the rooms were first joined.
//!
//! The desired-room set outlives connections: rooms joined while offline
//! are remembered and joined on the next connect.

use sitesync_proto::event::OutboundEvent;

use crate::identity::Identity;

/// Outcome of a room membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomChange {
    /// The join/leave event was sent on the live connection.
    Emitted,
    /// Offline: only the desired-room set changed.
    Recorded,
}

/// Rooms the user wants to be in, in first-join order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredRooms {
    rooms: Vec<String>,
}

impl DesiredRooms {
    /// Remember `room`. Returns `false` if it was already desired.
    pub fn insert(&mut self, room: &str) -> bool {
        if self.contains(room) {
            return false;
        }
        self.rooms.push(room.to_string());
        true
    }

    /// Forget `room`. Returns `false` if it was not desired.
    pub fn remove(&mut self, room: &str) -> bool {
        let before = self.rooms.len();
        self.rooms.retain(|r| r != room);
        self.rooms.len() != before
    }

    #[must_use]
    pub fn contains(&self, room: &str) -> bool {
        self.rooms.iter().any(|r| r == room)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// Events announcing `identity` and re-joining `rooms`.
#[must_use]
pub fn replay(identity: &Identity, rooms: &DesiredRooms) -> Vec<OutboundEvent> {
    let mut events = Vec::with_capacity(3 + rooms.len());
    events.push(OutboundEvent::RegisterUser {
        username: identity.name.clone(),
        user_id: identity.id.clone(),
    });
    events.push(OutboundEvent::SubscribeNotifications {
        user_id: identity.id.clone(),
    });
    events.push(OutboundEvent::SubscribeBadges);
    events.extend(rooms.iter().map(|room| join_event(identity, room)));
    events
}

#[must_use]
pub fn join_event(identity: &Identity, room: &str) -> OutboundEvent {
    OutboundEvent::JoinChat {
        chantier_id: room.to_string(),
        username: identity.name.clone(),
    }
}

#[must_use]
pub fn leave_event(identity: &Identity, room: &str) -> OutboundEvent {
    OutboundEvent::LeaveChat {
        chantier_id: room.to_string(),
        username: identity.name.clone(),
    }
}
