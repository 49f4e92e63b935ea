//! Shared protocol definitions for the `SiteSync` realtime channel.
//!
//! The channel speaks Engine.IO v4 framing carrying Socket.IO v5 packets on
//! the default namespace. [`codec`] handles both packet layers; [`event`]
//! holds the typed payloads of every inbound and outbound event.

pub mod codec;
pub mod event;
pub mod presence;
