//! Request and response bodies of the CRM REST API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::Identity;

/// Body of a successful `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Identity,
}

/// Employee record returned by the matricule lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub matricule: String,
    #[serde(default)]
    pub nom_complet: Option<String>,
    #[serde(default)]
    pub poste: Option<String>,
    #[serde(default)]
    pub departement: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Employee {
    /// Name to show for this employee, falling back to the matricule.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.nom_complet
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.matricule)
    }
}

/// A badging anomaly flagged by the back office.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(default)]
    pub employe: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Kind of badge scan, serialized with the labels the back office expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BadgeKind {
    #[serde(rename = "Entrée")]
    Entree,
    #[serde(rename = "Sortie")]
    Sortie,
    #[serde(rename = "Pause")]
    Pause,
    #[serde(rename = "Reprise")]
    Reprise,
}

impl BadgeKind {
    pub const ALL: [Self; 4] = [Self::Entree, Self::Sortie, Self::Pause, Self::Reprise];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Entree => "Entrée",
            Self::Sortie => "Sortie",
            Self::Pause => "Pause",
            Self::Reprise => "Reprise",
        }
    }
}

impl fmt::Display for BadgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown badge kind: {0}")]
pub struct UnknownBadgeKind(pub String);

impl FromStr for BadgeKind {
    type Err = UnknownBadgeKind;

    /// Accepts the labels and their unaccented lowercase forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "entrée" | "entree" => Ok(Self::Entree),
            "sortie" => Ok(Self::Sortie),
            "pause" => Ok(Self::Pause),
            "reprise" => Ok(Self::Reprise),
            _ => Err(UnknownBadgeKind(s.to_string())),
        }
    }
}

/// Body of `POST /api/badges/submit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadgeSubmission {
    pub matricule: String,
    pub type_badge: BadgeKind,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timestamp: String,
}

/// Body of `POST /api/notifications/register`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRegistration {
    pub token: String,
    pub user_id: Value,
    pub platform: String,
}
