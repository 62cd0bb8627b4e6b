//! Relay instance.
//!
//! Owns everything that outlives a single connection: the HTTP client, the token cache,
//! the identity acquirer with its device key, the account credential and the counters.
//! Each accepted connection gets a [`RelaySession`] with fresh key material.

use crate::auth::{Account, CredentialProvider, IdentityAcquirer, OAuthClient, TokenCache};
use crate::config::{ChainMode, RelayConfig};
use crate::core::KeyMaterial;
use crate::error::{constants, ForgeError, RelayError, Result};
use crate::protocol::chain::{ChainForger, DelegatedIdentity};
use crate::protocol::handshake::HandshakeCoordinator;
use crate::protocol::pipeline::{Interceptor, PacketPipeline};
use crate::service::session::RelaySession;
use crate::transport::SessionLink;
use crate::utils::metrics::RelayMetrics;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct Relay {
    config: RelayConfig,
    http: reqwest::Client,
    cache: TokenCache,
    acquirer: Arc<IdentityAcquirer>,
    credential: Option<Arc<dyn CredentialProvider>>,
    metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.endpoints.request_timeout)
            .build()
            .map_err(|e| RelayError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        let metrics = Arc::new(RelayMetrics::new());
        let cache = TokenCache::open(config.auth.token_cache_path.clone());
        let acquirer = Arc::new(
            IdentityAcquirer::new(http.clone(), config.endpoints.clone())
                .with_metrics(metrics.clone()),
        );

        let credential = config.auth.refresh_token.as_ref().map(|token| {
            let oauth = OAuthClient::new(http.clone(), &config.endpoints);
            Arc::new(Account::new(
                config.auth.account_id.clone(),
                config.auth.device.descriptor(),
                token.clone(),
                oauth,
            )) as Arc<dyn CredentialProvider>
        });

        info!(mode = ?config.auth.mode, device = ?config.auth.device, "Relay initialized");
        Ok(Self {
            config,
            http,
            cache,
            acquirer,
            credential,
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    /// Use `credential` instead of the configured refresh token.
    pub fn with_credential(mut self, credential: Arc<dyn CredentialProvider>) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Replace the acquirer, e.g. to pin the device proof key.
    pub fn with_acquirer(mut self, acquirer: IdentityAcquirer) -> Self {
        self.acquirer = Arc::new(acquirer.with_metrics(self.metrics.clone()));
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    pub fn acquirer(&self) -> &Arc<IdentityAcquirer> {
        &self.acquirer
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.metrics.clone()
    }

    pub fn open_session(&self, link: Box<dyn SessionLink>) -> Result<RelaySession> {
        self.open_session_with(link, Vec::new())
    }

    /// New session over `link`. The handshake coordinator always runs first, then `extra`
    /// in order.
    pub fn open_session_with(
        &self,
        link: Box<dyn SessionLink>,
        extra: Vec<Box<dyn Interceptor>>,
    ) -> Result<RelaySession> {
        let keys = KeyMaterial::generate()?;
        let cancel = self.shutdown.child_token();

        let coordinator = HandshakeCoordinator::new(keys, self.forger()?, cancel.clone())
            .with_protocol_version(self.config.relay.protocol_version)
            .with_metrics(self.metrics.clone());

        let mut pipeline = PacketPipeline::new();
        pipeline.register(Box::new(coordinator));
        for interceptor in extra {
            pipeline.register(interceptor);
        }

        self.metrics.session_opened();
        let session = RelaySession::new(pipeline, link, cancel).with_metrics(self.metrics.clone());
        debug!(session = %session.id(), "Session opened");
        Ok(session)
    }

    /// Cancel every session opened by this relay.
    pub fn shutdown(&self) {
        info!("Relay shutting down");
        self.shutdown.cancel();
        self.metrics.log_metrics();
    }

    fn forger(&self) -> Result<ChainForger> {
        match self.config.auth.mode {
            ChainMode::SelfSigned => Ok(ChainForger::self_signed()),
            ChainMode::Delegated => {
                let credential = self
                    .credential
                    .clone()
                    .ok_or(ForgeError::MissingIdentity(constants::ERR_NO_IDENTITY))?;
                Ok(ChainForger::delegated(DelegatedIdentity::new(
                    self.acquirer.clone(),
                    credential,
                    self.config.auth.device.descriptor(),
                    self.cache.clone(),
                    self.http.clone(),
                    &self.config.endpoints,
                )))
            }
        }
    }
}
