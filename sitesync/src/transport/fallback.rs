//! Framing selection with fallback.
//!
//! [`FallbackConnector`] tries a preferred connector (WebSocket) first and,
//! if it fails or times out, opens a link with the fallback connector
//! (long-polling). The chosen framing is fixed for the life of the link and
//! is visible through [`Transport::transport_type`].

use sitesync_proto::codec::SocketPacket;

use super::{Connector, Endpoint, Transport, TransportError, TransportType};

/// Connector that tries `P` and falls back to `F`.
///
/// # Type Parameters
///
/// - `P`: the preferred connector (e.g. WebSocket).
/// - `F`: the fallback connector (e.g. polling).
#[derive(Debug, Clone, Default)]
pub struct FallbackConnector<P, F> {
    preferred: P,
    fallback: F,
}

impl<P: Connector, F: Connector> FallbackConnector<P, F> {
    /// Create a connector from a preferred and a fallback connector.
    #[must_use]
    pub const fn new(preferred: P, fallback: F) -> Self {
        Self {
            preferred,
            fallback,
        }
    }
}

impl<P: Connector, F: Connector> Connector for FallbackConnector<P, F> {
    type Link = FallbackLink<P::Link, F::Link>;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Link, TransportError> {
        match self.preferred.connect(endpoint).await {
            Ok(link) => Ok(FallbackLink::Preferred(link)),
            Err(preferred_err) => {
                tracing::info!(
                    server = endpoint.base(),
                    err = %preferred_err,
                    "preferred framing failed, trying fallback"
                );
                self.fallback
                    .connect(endpoint)
                    .await
                    .map(FallbackLink::Fallback)
            }
        }
    }
}

/// A link opened by a [`FallbackConnector`].
pub enum FallbackLink<P, F> {
    Preferred(P),
    Fallback(F),
}

impl<P: Transport, F: Transport> Transport for FallbackLink<P, F> {
    async fn send(&self, packet: &SocketPacket) -> Result<(), TransportError> {
        match self {
            Self::Preferred(link) => link.send(packet).await,
            Self::Fallback(link) => link.send(packet).await,
        }
    }

    async fn recv(&self) -> Result<SocketPacket, TransportError> {
        match self {
            Self::Preferred(link) => link.recv().await,
            Self::Fallback(link) => link.recv().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Preferred(link) => link.is_connected(),
            Self::Fallback(link) => link.is_connected(),
        }
    }

    fn transport_type(&self) -> TransportType {
        match self {
            Self::Preferred(link) => link.transport_type(),
            Self::Fallback(link) => link.transport_type(),
        }
    }

    async fn close(&self) {
        match self {
            Self::Preferred(link) => link.close().await,
            Self::Fallback(link) => link.close().await,
        }
    }
}
