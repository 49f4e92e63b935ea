//! Client for the CRM REST API.
//!
//! Every request carries the bearer token when one is set. A `401` clears
//! the token and surfaces as [`ApiError::Unauthorized`]; callers holding
//! persisted credentials should drop them too.

pub mod types;

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sitesync_proto::event::{BadgeUpdate, Notification};
use sitesync_proto::presence::GeoPoint;
use url::Url;

use crate::clock::iso_millis;
use crate::identity::UserId;
pub use types::{
    Anomaly, BadgeKind, BadgeSubmission, Employee, LoginResponse, PushRegistration,
    UnknownBadgeKind,
};

/// Default timeout of a REST request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid api url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The token is missing, expired or revoked.
    #[error("not authorized")]
    Unauthorized,

    /// The server answered with a non-success status.
    #[error("server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// REST client with a fixed request timeout.
#[derive(Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// # Errors
    ///
    /// [`ApiError::InvalidUrl`] if `base` is not an absolute http(s) URL,
    /// [`ApiError::Http`] if the HTTP client cannot be built.
    pub fn new(base: &str, request_timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base).map_err(|e| ApiError::InvalidUrl(format!("{base}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            base,
            token: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// `POST /auth/login`. On success the returned token is used for
    /// subsequent requests.
    ///
    /// # Errors
    ///
    /// [`ApiError::Unauthorized`] for bad credentials, otherwise see
    /// [`ApiError`].
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = self
            .request(
                Method::POST,
                &["auth", "login"],
                Some(&json!({ "email": email, "password": password })),
            )
            .await?;
        let login: LoginResponse = serde_json::from_value(body)?;
        self.set_token(Some(login.token.clone()));
        tracing::info!(user_id = %login.user.id, "logged in");
        Ok(login)
    }

    /// `GET /api/badges/today`.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn today_badges(&self) -> Result<Vec<BadgeUpdate>, ApiError> {
        self.list(&["api", "badges", "today"], "badges").await
    }

    /// `GET /api/badges/anomalies`.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn anomalies(&self) -> Result<Vec<Anomaly>, ApiError> {
        self.list(&["api", "badges", "anomalies"], "anomalies").await
    }

    /// `GET /api/notifications`.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.list(&["api", "notifications"], "notifications").await
    }

    /// `GET /api/employes/matricule/{matricule}`.
    ///
    /// # Errors
    ///
    /// [`ApiError::Rejected`] with status 404 for an unknown matricule.
    pub async fn employee_by_matricule(&self, matricule: &str) -> Result<Employee, ApiError> {
        let body = self
            .request::<()>(Method::GET, &["api", "employes", "matricule", matricule], None)
            .await?;
        let body = match body {
            Value::Object(mut map)
                if map.contains_key("employe") && !map.contains_key("matricule") =>
            {
                map.remove("employe").unwrap_or(Value::Null)
            }
            other => other,
        };
        Ok(serde_json::from_value(body)?)
    }

    /// `POST /api/badges/submit`. Returns the server's acknowledgment body.
    ///
    /// # Errors
    ///
    /// [`ApiError::Rejected`] when the back office refuses the scan.
    pub async fn submit_badge(
        &self,
        matricule: &str,
        kind: BadgeKind,
        location: Option<GeoPoint>,
        timestamp: DateTime<Utc>,
    ) -> Result<Value, ApiError> {
        let body = BadgeSubmission {
            matricule: matricule.to_string(),
            type_badge: kind,
            latitude: location.map(|point| point.latitude),
            longitude: location.map(|point| point.longitude),
            timestamp: iso_millis(timestamp),
        };
        let ack = self
            .request(Method::POST, &["api", "badges", "submit"], Some(&body))
            .await?;
        tracing::info!(matricule, kind = %kind, "badge submitted");
        Ok(ack)
    }

    /// `POST /api/notifications/register`.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn register_push_token(
        &self,
        token: &str,
        user_id: &UserId,
        platform: &str,
    ) -> Result<(), ApiError> {
        let body = PushRegistration {
            token: token.to_string(),
            user_id: json!(user_id),
            platform: platform.to_string(),
        };
        self.request(Method::POST, &["api", "notifications", "register"], Some(&body))
            .await?;
        Ok(())
    }

    async fn list<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        key: &str,
    ) -> Result<Vec<T>, ApiError> {
        let body = self.request::<()>(Method::GET, segments, None).await?;
        Ok(serde_json::from_value(unwrap_list(body, key))?)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<Value, ApiError> {
        let url = self.url(segments)?;
        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(token) = self.token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::debug!(%method, path = url.path(), status = status.as_u16(), "api response");

        if status == StatusCode::UNAUTHORIZED {
            self.set_token(None);
            tracing::warn!(path = url.path(), "token rejected, cleared");
            return Err(ApiError::Unauthorized);
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: error_message(&text, status),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Accept a bare array, or an object wrapping it under `key` or `data`.
fn unwrap_list(body: Value, key: &str) -> Value {
    match body {
        Value::Null => Value::Array(Vec::new()),
        Value::Object(mut map) => match map.remove(key).or_else(|| map.remove("data")) {
            Some(items) => items,
            None => Value::Object(map),
        },
        other => other,
    }
}

fn error_message(body: &str, status: StatusCode) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["message", "error", "detail"]
            .iter()
            .find_map(|field| value.get(field).and_then(Value::as_str).map(str::to_string))
    });
    from_json
        .or_else(|| Some(body.trim().to_string()).filter(|text| !text.is_empty()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string())
}
