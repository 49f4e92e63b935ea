//! The signed-in user the realtime session is bound to.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use sitesync_proto::event::UserId;

/// Authenticated user profile, as returned by login and cached under `@user`.
///
/// Only `id` and `name` are used by the sync core; every other profile
/// field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }
}
