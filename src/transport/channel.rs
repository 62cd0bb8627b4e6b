//! Channel-backed session link.
//!
//! Every link operation becomes a [`LinkEvent`] on an unbounded mpsc channel, in call
//! order. The receiving side owns the real sockets (or, in tests, just records events).

use crate::core::SessionKey;
use crate::error::{RelayError, Result};
use crate::protocol::packet::RelayPacket;
use crate::transport::SessionLink;
use crate::utils::compression::CompressionSettings;
use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectUpstream,
    ToServer(RelayPacket),
    ToClient(RelayPacket),
    Compression(CompressionSettings),
    Encryption(SessionKey),
    Terminated(String),
}

#[derive(Debug)]
pub struct ChannelLink {
    events: UnboundedSender<LinkEvent>,
    connected: bool,
    terminated: bool,
    compression: CompressionSettings,
    encrypted: bool,
}

impl ChannelLink {
    pub fn new() -> (Self, UnboundedReceiver<LinkEvent>) {
        let (events, rx) = unbounded_channel();
        (
            Self {
                events,
                connected: false,
                terminated: false,
                compression: CompressionSettings::DISABLED,
                encrypted: false,
            },
            rx,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn compression(&self) -> CompressionSettings {
        self.compression
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn emit(&self, event: LinkEvent) -> Result<()> {
        if self.terminated {
            return Err(RelayError::ConnectionClosed);
        }
        trace!(?event, "Link event");
        self.events
            .send(event)
            .map_err(|_| RelayError::ConnectionClosed)
    }

    /// For infallible link operations. A dropped receiver surfaces on the next send.
    fn emit_or_log(&self, event: LinkEvent) {
        let kind = match &event {
            LinkEvent::Compression(_) => "compression",
            LinkEvent::Encryption(_) => "encryption",
            LinkEvent::Terminated(_) => "terminate",
            _ => "packet",
        };
        if let Err(e) = self.emit(event) {
            debug!(event = kind, error = %e, "Link event not delivered");
        }
    }
}

#[async_trait]
impl SessionLink for ChannelLink {
    async fn connect_upstream(&mut self) -> Result<()> {
        if self.connected {
            return Err(RelayError::TransportError(
                "Upstream already connected".to_string(),
            ));
        }
        self.emit(LinkEvent::ConnectUpstream)?;
        self.connected = true;
        Ok(())
    }

    async fn send_to_server(&mut self, packet: RelayPacket) -> Result<()> {
        if !self.connected {
            return Err(RelayError::TransportError(
                "Upstream not connected".to_string(),
            ));
        }
        self.emit(LinkEvent::ToServer(packet))
    }

    async fn send_to_client(&mut self, packet: RelayPacket) -> Result<()> {
        self.emit(LinkEvent::ToClient(packet))
    }

    fn set_upstream_compression(&mut self, settings: CompressionSettings) {
        self.compression = settings;
        self.emit_or_log(LinkEvent::Compression(settings));
    }

    fn enable_upstream_encryption(&mut self, key: SessionKey) {
        self.encrypted = true;
        self.emit_or_log(LinkEvent::Encryption(key));
    }

    async fn terminate(&mut self, reason: &str) {
        if self.terminated {
            return;
        }
        debug!(reason, "Terminating session link");
        self.emit_or_log(LinkEvent::Terminated(reason.to_string()));
        self.terminated = true;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::KeyMaterial;
    use crate::utils::compression::CompressionAlgorithm;

    #[tokio::test]
    async fn test_events_in_call_order() {
        let (mut link, mut rx) = ChannelLink::new();
        link.connect_upstream().await.unwrap();
        link.set_upstream_compression(CompressionSettings::negotiated(
            256,
            CompressionAlgorithm::Zlib,
        ));
        link.send_to_server(RelayPacket::ClientToServerHandshake)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(LinkEvent::ConnectUpstream));
        assert!(matches!(rx.recv().await, Some(LinkEvent::Compression(s)) if s.threshold == 256));
        assert_eq!(
            rx.recv().await,
            Some(LinkEvent::ToServer(RelayPacket::ClientToServerHandshake))
        );
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (mut link, _rx) = ChannelLink::new();
        let err = link
            .send_to_server(RelayPacket::ClientToServerHandshake)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::TransportError(_)));
    }

    #[tokio::test]
    async fn test_dropped_receiver_keeps_link_state() {
        let (mut link, rx) = ChannelLink::new();
        link.connect_upstream().await.unwrap();
        drop(rx);

        link.set_upstream_compression(CompressionSettings::negotiated(
            64,
            CompressionAlgorithm::Snappy,
        ));
        let (relay, server) = (KeyMaterial::generate().unwrap(), KeyMaterial::generate().unwrap());
        link.enable_upstream_encryption(relay.shared_secret(&server.public_key(), b"salt"));
        link.terminate("gone").await;

        assert_eq!(link.compression().threshold, 64);
        assert!(link.is_encrypted());
        assert!(link.is_terminated());
        assert!(matches!(
            link.send_to_server(RelayPacket::ClientToServerHandshake).await,
            Err(RelayError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (mut link, mut rx) = ChannelLink::new();
        link.terminate("bye").await;
        link.terminate("again").await;

        assert_eq!(rx.recv().await, Some(LinkEvent::Terminated("bye".into())));
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            link.send_to_client(RelayPacket::ClientToServerHandshake).await,
            Err(RelayError::ConnectionClosed)
        ));
    }
}
