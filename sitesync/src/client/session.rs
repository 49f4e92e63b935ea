//! Supervisor task: one realtime session at a time, retried with backoff.

use std::sync::Arc;

use serde_json::Value;
use sitesync_proto::codec::SocketPacket;
use sitesync_proto::event::{InboundEvent, ProtocolError};
use tokio::sync::watch;

use super::Inner;
use super::backoff::Backoff;
use crate::identity::Identity;
use crate::transport::{Connector, Endpoint, Transport, TransportError};

/// How a single session ended.
#[derive(Debug)]
enum SessionEnd {
    /// `disconnect` was requested.
    Stopped,
    /// An established session dropped.
    Lost,
    /// The link never reached the connected state.
    Failed(TransportError),
}

pub(super) async fn supervise<C: Connector>(
    inner: Arc<Inner<C>>,
    identity: Identity,
    mut stop: watch::Receiver<bool>,
) {
    let endpoint = match Endpoint::new(&inner.options.server_url, &identity) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::error!(err = %e, "cannot start realtime session");
            return;
        }
    };
    let mut backoff = Backoff::new(inner.options.reconnect);

    loop {
        match run_session(&inner, &endpoint, &identity, &mut stop).await {
            SessionEnd::Stopped => break,
            SessionEnd::Lost => backoff.reset(),
            SessionEnd::Failed(e) => {
                tracing::warn!(
                    err = %e,
                    server = endpoint.base(),
                    attempt = backoff.attempts() + 1,
                    "realtime connect failed"
                );
            }
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(
                attempts = backoff.attempts(),
                "reconnect attempts exhausted, staying offline"
            );
            break;
        };
        tracing::debug!(?delay, "reconnecting");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = stop.changed() => break,
        }
    }
    inner.deactivate();
}

async fn run_session<C: Connector>(
    inner: &Inner<C>,
    endpoint: &Endpoint,
    identity: &Identity,
    stop: &mut watch::Receiver<bool>,
) -> SessionEnd {
    if *stop.borrow() {
        return SessionEnd::Stopped;
    }

    let link = tokio::select! {
        result = inner.connector.connect(endpoint) => match result {
            Ok(link) => link,
            Err(e) => return SessionEnd::Failed(e),
        },
        _ = stop.changed() => return SessionEnd::Stopped,
    };

    let joined = tokio::select! {
        result = tokio::time::timeout(inner.options.socket_timeout, join_namespace(&link)) => {
            result.unwrap_or(Err(TransportError::Timeout))
        }
        _ = stop.changed() => {
            link.close().await;
            return SessionEnd::Stopped;
        }
    };
    let sid = match joined {
        Ok(sid) => sid,
        Err(e) => {
            link.close().await;
            return SessionEnd::Failed(e);
        }
    };

    let transport = link.transport_type();
    let mut outbound = inner.activate(identity, transport);
    tracing::info!(%transport, sid = %sid, user_id = %identity.id, "realtime connected");

    let end = loop {
        tokio::select! {
            _ = stop.changed() => break SessionEnd::Stopped,
            packet = link.recv() => match packet {
                Ok(packet) => {
                    if !handle_packet(inner, packet) {
                        break SessionEnd::Lost;
                    }
                }
                Err(e) => {
                    tracing::info!(err = %e, "realtime connection lost");
                    break SessionEnd::Lost;
                }
            },
            Some(event) = outbound.recv() => {
                if let Err(e) = link.send(&event.to_packet()).await {
                    tracing::warn!(event = event.name(), err = %e, "emit failed");
                    break SessionEnd::Lost;
                }
                tracing::trace!(event = event.name(), "emitted");
            }
        }
    };

    inner.deactivate();
    link.close().await;
    end
}

/// Send the namespace connect and wait for its ack. Returns the socket id.
async fn join_namespace<T: Transport>(link: &T) -> Result<String, TransportError> {
    link.send(&SocketPacket::Connect(None)).await?;
    loop {
        match link.recv().await? {
            SocketPacket::Connect(ack) => {
                let sid = ack
                    .as_ref()
                    .and_then(|data| data.get("sid"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                return Ok(sid.to_string());
            }
            SocketPacket::ConnectError(reason) => {
                return Err(TransportError::Protocol(format!(
                    "namespace connect refused: {reason}"
                )));
            }
            other => tracing::debug!(?other, "packet before namespace ack ignored"),
        }
    }
}

/// Fold one packet into the store. Returns `false` when the server closed
/// the namespace.
fn handle_packet<C>(inner: &Inner<C>, packet: SocketPacket) -> bool {
    match packet {
        SocketPacket::Event { name, data, .. } => {
            match InboundEvent::decode(&name, data) {
                Ok(event) => {
                    inner.store.apply(event);
                }
                Err(ProtocolError::UnknownEvent(name)) => {
                    tracing::debug!(event = %name, "unknown event ignored");
                }
                Err(e) => tracing::warn!(err = %e, "malformed event dropped"),
            }
            true
        }
        SocketPacket::Disconnect => {
            tracing::info!("server closed the namespace");
            false
        }
        other => {
            tracing::debug!(?other, "unexpected packet ignored");
            true
        }
    }
}
