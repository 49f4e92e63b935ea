//! Field presence: where employees are and whether they are on site.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::UserId;

/// Presence status of an employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Actively using the app.
    Online,
    /// App in background or idle.
    Away,
    /// Signed out or unreachable.
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Away => write!(f, "away"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Returned when a status string is not one of `online`, `away`, `offline`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown presence status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for PresenceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "away" => Ok(Self::Away),
            "offline" => Ok(Self::Offline),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// A WGS84 coordinate as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Outbound `update_presence` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceReport {
    pub employe_id: UserId,
    pub employe_name: String,
    pub status: PresenceStatus,
    pub location: Option<GeoPoint>,
}

/// Inbound `presence_update` broadcast.
///
/// The status is kept as the raw string the server relayed so that values
/// this client does not know about still land in the presence map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    #[serde(default)]
    pub employe_id: Option<UserId>,
    #[serde(default)]
    pub employe_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub location: Option<serde_json::Value>,
    #[serde(default)]
    pub last_seen: Option<String>,
}

impl PresenceUpdate {
    /// The status, if it is one this client understands.
    #[must_use]
    pub fn status(&self) -> Option<PresenceStatus> {
        self.status.parse().ok()
    }
}
