//! User actions that emit events on the live connection.
//!
//! Every action is fire-and-forget: once queued, the event is written in
//! order ahead of nothing but earlier events. Without a live connection an
//! action fails with [`ActionError::Offline`] and nothing is queued; room
//! membership is the one exception, see [`SyncClient::join_room`].

use serde_json::{Map, Value};
use sitesync_proto::event::OutboundEvent;
use sitesync_proto::presence::{GeoPoint, PresenceReport, PresenceStatus};

use super::SyncClient;
use crate::clock::iso_millis;
use crate::identity::Identity;
use crate::subscription::{self, RoomChange};
use crate::transport::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("not connected to the realtime server")]
    Offline,
    #[error("message text is empty")]
    EmptyMessage,
}

impl<C: Connector> SyncClient<C> {
    /// Add `room` to the desired set and join it if connected.
    ///
    /// Offline, the room is joined on the next connect.
    pub fn join_room(&self, room: &str) -> RoomChange {
        let mut link = self.inner.link.lock();
        link.rooms.insert(room);
        let emitted = match (&link.outbound, &link.identity) {
            (Some(tx), Some(identity)) => tx.send(subscription::join_event(identity, room)).is_ok(),
            _ => false,
        };
        let change = if emitted {
            RoomChange::Emitted
        } else {
            RoomChange::Recorded
        };
        tracing::debug!(room, ?change, "join room");
        change
    }

    /// Remove `room` from the desired set and leave it if connected.
    pub fn leave_room(&self, room: &str) -> RoomChange {
        let mut link = self.inner.link.lock();
        link.rooms.remove(room);
        let emitted = match (&link.outbound, &link.identity) {
            (Some(tx), Some(identity)) => {
                tx.send(subscription::leave_event(identity, room)).is_ok()
            }
            _ => false,
        };
        let change = if emitted {
            RoomChange::Emitted
        } else {
            RoomChange::Recorded
        };
        tracing::debug!(room, ?change, "leave room");
        change
    }

    /// Post `text` to `room`.
    ///
    /// # Errors
    ///
    /// [`ActionError::EmptyMessage`] for blank text, checked first;
    /// [`ActionError::Offline`] without a live connection.
    pub fn send_message(&self, room: &str, text: &str) -> Result<(), ActionError> {
        if text.trim().is_empty() {
            return Err(ActionError::EmptyMessage);
        }
        self.emit(|identity| OutboundEvent::SendMessage {
            chantier_id: room.to_string(),
            message: text.to_string(),
            username: identity.name.clone(),
            user_id: identity.id.clone(),
        })
    }

    /// Report whether the user is typing in `room`.
    ///
    /// # Errors
    ///
    /// [`ActionError::Offline`] without a live connection.
    pub fn send_typing(&self, room: &str, typing: bool) -> Result<(), ActionError> {
        self.emit(|identity| OutboundEvent::Typing {
            chantier_id: room.to_string(),
            username: identity.name.clone(),
            typing,
        })
    }

    /// Announce a badge scan.
    ///
    /// `employe` is set to the session user's name and `time` to now,
    /// overriding same-named entries in `fields`.
    ///
    /// # Errors
    ///
    /// [`ActionError::Offline`] without a live connection.
    pub fn send_badge(&self, fields: Map<String, Value>) -> Result<(), ActionError> {
        let time = iso_millis(self.inner.clock.now());
        self.emit(move |identity| OutboundEvent::NewBadge {
            fields,
            employe: identity.name.clone(),
            time,
        })
    }

    /// Publish the user's presence.
    ///
    /// # Errors
    ///
    /// [`ActionError::Offline`] without a live connection.
    pub fn update_presence(
        &self,
        status: PresenceStatus,
        location: Option<GeoPoint>,
    ) -> Result<(), ActionError> {
        self.emit(|identity| {
            OutboundEvent::UpdatePresence(PresenceReport {
                employe_id: identity.id.clone(),
                employe_name: identity.name.clone(),
                status,
                location,
            })
        })
    }

    fn emit(&self, build: impl FnOnce(&Identity) -> OutboundEvent) -> Result<(), ActionError> {
        let link = self.inner.link.lock();
        let (Some(tx), Some(identity)) = (&link.outbound, &link.identity) else {
            return Err(ActionError::Offline);
        };
        let event = build(identity);
        let name = event.name();
        tx.send(event).map_err(|_| ActionError::Offline)?;
        tracing::debug!(event = name, "event queued");
        Ok(())
    }
}
