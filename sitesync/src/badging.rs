//! Badge scan workflow: validate the matricule, record the scan over REST,
//! then announce it on the realtime channel when connected.

use serde_json::{Map, Value, json};
use sitesync_proto::presence::GeoPoint;

use crate::client::{ActionError, SyncClient};
use crate::rest::{ApiClient, ApiError, BadgeKind, Employee};
use crate::transport::Connector;

/// Site name used when the scan is not tied to a site.
pub const DEFAULT_SITE: &str = "Bureau";

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeRequest {
    pub matricule: String,
    pub kind: BadgeKind,
    pub location: Option<GeoPoint>,
    pub chantier_name: String,
}

impl BadgeRequest {
    pub fn new(matricule: impl Into<String>, kind: BadgeKind) -> Self {
        Self {
            matricule: matricule.into(),
            kind,
            location: None,
            chantier_name: DEFAULT_SITE.to_string(),
        }
    }

    #[must_use]
    pub const fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeReceipt {
    pub employee: Employee,
    /// Acknowledgment body of the submission.
    pub ack: Value,
    /// Whether the scan was also announced in real time.
    pub announced: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BadgeError {
    #[error("matricule is empty")]
    EmptyMatricule,

    #[error("no employee with matricule {0}")]
    UnknownMatricule(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Run the full scan workflow.
///
/// The realtime announcement is best effort; being offline does not fail
/// the scan, which is already recorded by then.
///
/// # Errors
///
/// [`BadgeError::UnknownMatricule`] when the lookup answers 404, otherwise
/// the [`ApiError`] of the lookup or the submission.
pub async fn record_badge<C: Connector>(
    api: &ApiClient,
    client: &SyncClient<C>,
    request: &BadgeRequest,
) -> Result<BadgeReceipt, BadgeError> {
    let matricule = request.matricule.trim();
    if matricule.is_empty() {
        return Err(BadgeError::EmptyMatricule);
    }

    let employee = match api.employee_by_matricule(matricule).await {
        Ok(employee) => employee,
        Err(ApiError::Rejected { status: 404, .. }) => {
            return Err(BadgeError::UnknownMatricule(matricule.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let ack = api
        .submit_badge(matricule, request.kind, request.location, client.now())
        .await?;

    let announced = match client.send_badge(announcement(matricule, &employee, request)) {
        Ok(()) => true,
        Err(ActionError::Offline) => {
            tracing::debug!(matricule, "offline, badge not announced");
            false
        }
        Err(e) => {
            tracing::warn!(matricule, err = %e, "badge announcement failed");
            false
        }
    };

    Ok(BadgeReceipt {
        employee,
        ack,
        announced,
    })
}

fn announcement(
    matricule: &str,
    employee: &Employee,
    request: &BadgeRequest,
) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("matricule".into(), json!(matricule));
    fields.insert("employe".into(), json!(employee.display_name()));
    fields.insert("type".into(), json!(request.kind));
    fields.insert("chantier_name".into(), json!(request.chantier_name));
    fields.insert("location".into(), json!(request.location));
    fields
}
