//! Three-party login handshake.
//!
//! The relay sits between a game client and the upstream server and owns the upstream
//! half of the key agreement:
//!
//! ```text
//! client ── Login ──────────────▶ relay   (forge chain with session key, store login)
//!                                 relay ── RequestNetworkSettings ──▶ server
//!                                 relay ◀── NetworkSettings ───────── server
//!                                 relay ── Login (forged) ──────────▶ server
//!                                 relay ◀── ServerToClientHandshake ─ server
//!                                 relay ── ClientToServerHandshake ─▶ server
//! ```
//!
//! **Per-session state**: one coordinator per session, driven strictly in packet order.
//! Every failure is terminal: the coordinator moves to [`HandshakeState::Failed`], tells
//! the client why, and terminates the link.

use crate::core::jwt;
use crate::core::keys::{parse_public_key, KEY_BASE64};
use crate::core::{KeyMaterial, SessionKey};
use crate::error::{constants, HandshakeError, RelayError};
use crate::protocol::chain::ChainForger;
use crate::protocol::packet::{Direction, DisconnectMessage, LoginMessage, RelayPacket};
use crate::protocol::pipeline::Interceptor;
use crate::transport::SessionLink;
use crate::utils::compression::{CompressionAlgorithm, CompressionSettings};
use crate::utils::metrics::RelayMetrics;
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    LoginIntercepted,
    AwaitingCompressionSettings,
    LoginForwarded,
    AwaitingServerHandshake,
    EncryptionEstablished,
    Failed,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandshakeState::EncryptionEstablished | HandshakeState::Failed
        )
    }
}

/// Drives one session from the client's login to an encrypted upstream link.
pub struct HandshakeCoordinator {
    state: HandshakeState,
    keys: KeyMaterial,
    forger: ChainForger,
    login: Option<LoginMessage>,
    cancel: CancellationToken,
    protocol_version: u32,
    metrics: Option<Arc<RelayMetrics>>,
}

impl HandshakeCoordinator {
    pub fn new(keys: KeyMaterial, forger: ChainForger, cancel: CancellationToken) -> Self {
        Self {
            state: HandshakeState::Idle,
            keys,
            forger,
            login: None,
            cancel,
            protocol_version: crate::config::DEFAULT_PROTOCOL_VERSION,
            metrics: None,
        }
    }

    /// Protocol version requested upstream when the client's login carries none.
    pub fn with_protocol_version(mut self, protocol_version: u32) -> Self {
        self.protocol_version = protocol_version;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    /// The forged login held until the server's network settings arrive.
    pub fn pending_login(&self) -> Option<&LoginMessage> {
        self.login.as_ref()
    }

    #[instrument(skip_all, fields(protocol_version = login.protocol_version))]
    async fn intercept_login(&mut self, mut login: LoginMessage, link: &mut dyn SessionLink) {
        let forged = match self.forger.forge(&self.keys, &login, &self.cancel).await {
            Ok(forged) => forged,
            Err(e) => {
                self.fail(link, format!("{}: {e}", constants::ERR_LOGIN_FAILED))
                    .await;
                return;
            }
        };

        login.chain = forged.chain;
        login.client_jwt = Some(forged.skin_token);
        login.auth_type = forged.auth_type;
        let protocol_version = if login.protocol_version == 0 {
            self.protocol_version
        } else {
            login.protocol_version
        };
        self.login = Some(login);
        self.state = HandshakeState::LoginIntercepted;
        debug!(auth_type = ?forged.auth_type, "Login intercepted");

        if let Err(e) = Self::open_upstream(link, protocol_version).await {
            self.fail(link, format!("Failed to reach upstream: {e}")).await;
        }
    }

    async fn open_upstream(
        link: &mut dyn SessionLink,
        protocol_version: u32,
    ) -> Result<(), RelayError> {
        link.connect_upstream().await?;
        link.send_to_server(RelayPacket::RequestNetworkSettings { protocol_version })
            .await
    }

    async fn apply_network_settings(
        &mut self,
        threshold: u16,
        algorithm: CompressionAlgorithm,
        link: &mut dyn SessionLink,
    ) {
        self.state = HandshakeState::AwaitingCompressionSettings;
        let settings = CompressionSettings::negotiated(threshold, algorithm);
        link.set_upstream_compression(settings);
        debug!(
            threshold = settings.threshold,
            algorithm = ?settings.algorithm,
            "Upstream compression negotiated"
        );

        let Some(login) = self.login.take() else {
            let err = HandshakeError::MissingLogin(constants::ERR_NO_STORED_LOGIN);
            self.fail(link, format!("{}: {err}", constants::ERR_LOGIN_FAILED))
                .await;
            return;
        };

        if let Err(e) = link.send_to_server(RelayPacket::Login(login)).await {
            self.fail(link, format!("Failed to forward login: {e}")).await;
            return;
        }
        self.state = HandshakeState::LoginForwarded;
    }

    async fn complete_handshake(&mut self, challenge: &str, link: &mut dyn SessionLink) {
        self.state = HandshakeState::AwaitingServerHandshake;
        let key = match self.derive_session_key(challenge) {
            Ok(key) => key,
            Err(e) => {
                self.fail(link, format!("{}: {e}", constants::ERR_ENCRYPTION_FAILED))
                    .await;
                return;
            }
        };

        link.enable_upstream_encryption(key);
        if let Err(e) = link
            .send_to_server(RelayPacket::ClientToServerHandshake)
            .await
        {
            self.fail(link, format!("{}: {e}", constants::ERR_ENCRYPTION_FAILED))
                .await;
            return;
        }

        self.state = HandshakeState::EncryptionEstablished;
        if let Some(metrics) = &self.metrics {
            metrics.handshake_completed();
        }
        info!("Upstream encryption established");
    }

    /// Session key from the server challenge: `x5u` header locates the server key, the
    /// `salt` claim is standard base64.
    pub fn derive_session_key(&self, challenge: &str) -> Result<SessionKey, HandshakeError> {
        let decoded = jwt::decode(challenge)
            .map_err(|e| HandshakeError::MalformedChallenge(e.to_string()))?;
        let server_key = parse_public_key(decoded.x5u()?)?;

        let salt = decoded.claim_str("salt").ok_or_else(|| {
            HandshakeError::MalformedChallenge(constants::ERR_MISSING_SALT.into())
        })?;
        let salt = KEY_BASE64
            .decode(salt)
            .map_err(|e| HandshakeError::MalformedChallenge(format!("salt is not base64: {e}")))?;

        Ok(self.keys.shared_secret(&server_key, &salt))
    }

    async fn fail(&mut self, link: &mut dyn SessionLink, reason: String) {
        error!(state = ?self.state, %reason, "Handshake failed");
        self.state = HandshakeState::Failed;
        self.login = None;
        if let Some(metrics) = &self.metrics {
            metrics.handshake_failed();
        }

        if let Err(e) = link
            .send_to_client(RelayPacket::Disconnect(DisconnectMessage::new(reason.clone())))
            .await
        {
            debug!(error = %e, "Client already gone");
        }
        link.terminate(&reason).await;
        self.cancel.cancel();
    }
}

#[async_trait]
impl Interceptor for HandshakeCoordinator {
    fn name(&self) -> &'static str {
        "handshake"
    }

    async fn on_packet(
        &mut self,
        direction: Direction,
        packet: &mut RelayPacket,
        link: &mut dyn SessionLink,
    ) -> bool {
        match (direction, &*packet, self.state) {
            (Direction::FromClient, RelayPacket::Login(login), HandshakeState::Idle) => {
                let login = login.clone();
                self.intercept_login(login, link).await;
                true
            }
            (Direction::FromClient, RelayPacket::Login(_), state) => {
                // Swallowed so the client's own chain never reaches the server.
                debug!(?state, "Dropping repeated login");
                true
            }
            (
                Direction::FromServer,
                RelayPacket::NetworkSettings {
                    compression_threshold,
                    compression_algorithm,
                },
                HandshakeState::LoginIntercepted,
            ) => {
                let (threshold, algorithm) = (*compression_threshold, *compression_algorithm);
                self.apply_network_settings(threshold, algorithm, link).await;
                true
            }
            (
                Direction::FromServer,
                RelayPacket::ServerToClientHandshake { jwt },
                HandshakeState::LoginForwarded,
            ) => {
                let challenge = jwt.clone();
                self.complete_handshake(&challenge, link).await;
                true
            }
            _ => false,
        }
    }

    async fn on_disconnect(&mut self, reason: &str) -> crate::error::Result<()> {
        if !self.state.is_terminal() {
            debug!(state = ?self.state, reason, "Session closed mid-handshake");
        }
        self.login = None;
        Ok(())
    }
}
