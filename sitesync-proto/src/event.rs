//! Typed payloads for the named events exchanged on the realtime channel.
//!
//! Inbound payloads are decoded leniently: missing fields fall back to empty
//! values and unknown fields are ignored (or kept, for badges), because the
//! server relays whatever the emitting client sent.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::codec::SocketPacket;
use crate::presence::{PresenceReport, PresenceUpdate};

/// Bookkeeping events the server emits that carry no client state.
pub const HOUSEKEEPING_EVENTS: &[&str] = &[
    "connected",
    "user_joined",
    "user_left",
    "user_joined_room",
    "user_left_room",
];

/// Errors raised while turning a named event into a typed payload.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The event name is not part of the protocol.
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    /// The payload did not match the event's shape.
    #[error("invalid payload for {event}: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A user or employee identifier.
///
/// The backend hands out integer ids while the realtime server echoes back
/// whatever the client registered with, so both JSON forms are accepted and
/// re-emitted unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Accepts a string, a number, or null for identifier fields.
fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn default_notification_kind() -> String {
    "info".to_string()
}

fn default_alert_kind() -> String {
    "warning".to_string()
}

/// A chat message as echoed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(rename = "message", alias = "text", default)]
    pub text: String,
    #[serde(default)]
    pub time: String,
}

/// Inbound `user_typing` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUpdate {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub typing: bool,
    #[serde(default)]
    pub room: String,
}

/// An entry of the notification feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default = "default_notification_kind")]
    pub kind: String,
    #[serde(default)]
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A badge scan relayed in real time.
///
/// Fields the server adds beyond the known ones are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeUpdate {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub employe: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Site name as sent by clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chantier_name: Option<String>,
    /// Site name as relayed by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chantier: Option<String>,
    #[serde(default)]
    pub chantier_id: Option<Value>,
    #[serde(default)]
    pub location: Option<Value>,
    #[serde(default)]
    pub time: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BadgeUpdate {
    /// Identifier usable for de-duplication, if the record carries one.
    #[must_use]
    pub fn key(&self) -> Option<&Value> {
        self.id.as_ref().filter(|id| !id.is_null())
    }

    /// Site name under either spelling, `chantier_name` first.
    #[must_use]
    pub fn site(&self) -> Option<&str> {
        self.chantier_name.as_deref().or(self.chantier.as_deref())
    }
}

/// Inbound `alert_broadcast` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default = "default_alert_kind")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub time: String,
}

/// An event received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewMessage(ChatMessage),
    ChatHistory(Vec<ChatMessage>),
    UserTyping(TypingUpdate),
    Notification(Notification),
    PendingNotifications(Vec<Notification>),
    BadgeUpdate(BadgeUpdate),
    AlertBroadcast(Alert),
    PresenceUpdate(PresenceUpdate),
    /// A recognized server event without client-side effect.
    Housekeeping(String),
}

impl InboundEvent {
    /// Decodes a named event payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownEvent`] for names outside the protocol and
    /// [`ProtocolError::Payload`] when the payload has the wrong shape.
    pub fn decode(name: &str, data: Value) -> Result<Self, ProtocolError> {
        fn parse<T: serde::de::DeserializeOwned>(
            name: &str,
            data: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(data).map_err(|source| ProtocolError::Payload {
                event: name.to_string(),
                source,
            })
        }

        match name {
            "new_message" => parse(name, data).map(Self::NewMessage),
            "chat_history" => parse(name, data).map(Self::ChatHistory),
            "user_typing" => parse(name, data).map(Self::UserTyping),
            "notification" => parse(name, data).map(Self::Notification),
            "pending_notifications" => parse(name, data).map(Self::PendingNotifications),
            "badge_update" => parse(name, data).map(Self::BadgeUpdate),
            "alert_broadcast" => parse(name, data).map(Self::AlertBroadcast),
            "presence_update" => parse(name, data).map(Self::PresenceUpdate),
            other if HOUSEKEEPING_EVENTS.contains(&other) => {
                Ok(Self::Housekeeping(other.to_string()))
            }
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::ChatHistory(_) => "chat_history",
            Self::UserTyping(_) => "user_typing",
            Self::Notification(_) => "notification",
            Self::PendingNotifications(_) => "pending_notifications",
            Self::BadgeUpdate(_) => "badge_update",
            Self::AlertBroadcast(_) => "alert_broadcast",
            Self::PresenceUpdate(_) => "presence_update",
            Self::Housekeeping(name) => name,
        }
    }
}

/// An event emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    RegisterUser {
        username: String,
        user_id: UserId,
    },
    SubscribeNotifications {
        user_id: UserId,
    },
    SubscribeBadges,
    JoinChat {
        chantier_id: String,
        username: String,
    },
    LeaveChat {
        chantier_id: String,
        username: String,
    },
    SendMessage {
        chantier_id: String,
        message: String,
        username: String,
        user_id: UserId,
    },
    Typing {
        chantier_id: String,
        username: String,
        typing: bool,
    },
    /// Caller-supplied badge fields; `employe` and `time` override any
    /// same-named entries in `fields`.
    NewBadge {
        fields: Map<String, Value>,
        employe: String,
        time: String,
    },
    UpdatePresence(PresenceReport),
}

impl OutboundEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RegisterUser { .. } => "register_user",
            Self::SubscribeNotifications { .. } => "subscribe_notifications",
            Self::SubscribeBadges => "subscribe_badges",
            Self::JoinChat { .. } => "join_chat",
            Self::LeaveChat { .. } => "leave_chat",
            Self::SendMessage { .. } => "send_message",
            Self::Typing { .. } => "typing",
            Self::NewBadge { .. } => "new_badge",
            Self::UpdatePresence(_) => "update_presence",
        }
    }

    /// JSON payload of this event.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::RegisterUser { username, user_id } => {
                json!({ "username": username, "user_id": user_id })
            }
            Self::SubscribeNotifications { user_id } => json!({ "user_id": user_id }),
            Self::SubscribeBadges => json!({}),
            Self::JoinChat {
                chantier_id,
                username,
            }
            | Self::LeaveChat {
                chantier_id,
                username,
            } => json!({ "chantier_id": chantier_id, "username": username }),
            Self::SendMessage {
                chantier_id,
                message,
                username,
                user_id,
            } => json!({
                "chantier_id": chantier_id,
                "message": message,
                "username": username,
                "user_id": user_id,
            }),
            Self::Typing {
                chantier_id,
                username,
                typing,
            } => json!({
                "chantier_id": chantier_id,
                "username": username,
                "typing": typing,
            }),
            Self::NewBadge {
                fields,
                employe,
                time,
            } => {
                let mut payload = fields.clone();
                payload.insert("employe".into(), Value::String(employe.clone()));
                payload.insert("time".into(), Value::String(time.clone()));
                Value::Object(payload)
            }
            Self::UpdatePresence(report) => json!(report),
        }
    }

    /// Wraps this event in a Socket.IO event packet.
    #[must_use]
    pub fn to_packet(&self) -> SocketPacket {
        SocketPacket::event(self.name(), self.payload())
    }
}
