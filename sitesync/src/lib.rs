//! `SiteSync`: realtime synchronization core for the construction CRM client.
//!
//! One [`client::SyncClient`] per signed-in user owns the live connection,
//! replays channel subscriptions on every connect, and folds the event
//! stream into a [`store::SyncStore`]. REST snapshots are merged into the
//! same store by [`snapshot`].

pub mod badging;
pub mod client;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod identity;
pub mod rest;
pub mod snapshot;
pub mod store;
pub mod subscription;
pub mod transport;
