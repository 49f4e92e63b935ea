//! Development hub for the `SiteSync` realtime channel.
//!
//! An axum server speaking Engine.IO v4 (WebSocket and HTTP long-polling)
//! with Socket.IO v5 events on the default namespace. It routes chat rooms,
//! badge scans, notifications, alerts and presence the same way the
//! production realtime server does, keeping everything in memory.

pub mod api;
pub mod config;
pub mod events;
pub mod hub;
pub mod store;
