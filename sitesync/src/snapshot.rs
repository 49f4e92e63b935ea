//! REST snapshot loading into the store.
//!
//! Failures are logged and swallowed; the affected projection keeps its
//! previous contents.

use crate::rest::{ApiClient, ApiError};
use crate::store::SyncStore;

/// Which snapshots loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub badges: bool,
    pub notifications: bool,
    /// A request came back `401`; stored credentials are stale.
    pub unauthorized: bool,
}

/// Fetch today's badges and merge them into the badge feed.
///
/// # Errors
///
/// The [`ApiError`] of the fetch; the store is left untouched.
pub async fn load_badges(api: &ApiClient, store: &SyncStore) -> Result<(), ApiError> {
    let badges = api.today_badges().await?;
    store.load_badges(badges);
    Ok(())
}

/// Fetch the notification backlog and merge it into the feed.
///
/// # Errors
///
/// See [`load_badges`].
pub async fn load_notifications(api: &ApiClient, store: &SyncStore) -> Result<(), ApiError> {
    let notifications = api.notifications().await?;
    store.load_notifications(notifications);
    Ok(())
}

/// Load both snapshots concurrently.
pub async fn refresh(api: &ApiClient, store: &SyncStore) -> SnapshotReport {
    let (badges, notifications) =
        tokio::join!(load_badges(api, store), load_notifications(api, store));
    let mut unauthorized = false;
    let badges = settle("badges", badges, &mut unauthorized);
    let notifications = settle("notifications", notifications, &mut unauthorized);
    SnapshotReport {
        badges,
        notifications,
        unauthorized,
    }
}

fn settle(snapshot: &str, result: Result<(), ApiError>, unauthorized: &mut bool) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            *unauthorized |= e.is_unauthorized();
            tracing::warn!(snapshot, err = %e, "snapshot load failed, keeping previous state");
            false
        }
    }
}
