use crate::error::{constants, RelayError, Result};
use crate::protocol::packet::{Direction, RelayPacket};
use crate::protocol::pipeline::PacketPipeline;
use crate::transport::SessionLink;
use crate::utils::metrics::RelayMetrics;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// One relayed connection. Packets are processed strictly one at a time.
pub struct RelaySession {
    id: Uuid,
    pipeline: PacketPipeline,
    link: Box<dyn SessionLink>,
    cancel: CancellationToken,
    closed: bool,
    metrics: Option<Arc<RelayMetrics>>,
}

impl RelaySession {
    pub fn new(pipeline: PacketPipeline, link: Box<dyn SessionLink>, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline,
            link,
            cancel,
            closed: false,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token fired when the session is torn down; in-flight identity work observes it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run `packet` through the pipeline; forward it to the other side if nobody handled it.
    pub async fn handle(&mut self, direction: Direction, mut packet: RelayPacket) -> Result<()> {
        if self.closed {
            return Err(RelayError::ConnectionClosed);
        }

        if self
            .pipeline
            .dispatch(direction, &mut packet, self.link.as_mut())
            .await
        {
            return Ok(());
        }

        match direction {
            Direction::FromClient => self.link.send_to_server(packet).await,
            Direction::FromServer => self.link.send_to_client(packet).await,
        }
    }

    /// Process inbound packets until the channel closes or the session is cancelled.
    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn run(mut self, mut inbound: Receiver<(Direction, RelayPacket)>) {
        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break constants::ERR_SESSION_CANCELLED.to_string(),
                next = inbound.recv() => next,
            };

            let Some((direction, packet)) = next else {
                break "Connection closed".to_string();
            };

            let name = packet.name();
            if let Err(e) = self.handle(direction, packet).await {
                warn!(packet = name, ?direction, error = %e, "Failed to relay packet");
                if matches!(e, RelayError::ConnectionClosed) {
                    break e.to_string();
                }
            }
        };

        self.close(&reason).await;
    }

    /// Cancel in-flight work, tear the pipeline down and close the link. Runs once.
    pub async fn close(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.cancel.cancel();
        self.pipeline.teardown(reason).await;
        self.link.terminate(reason).await;

        if let Some(metrics) = &self.metrics {
            metrics.session_closed();
        }
        info!(session = %self.id, reason, "Session closed");
        debug!(session = %self.id, interceptors = self.pipeline.len(), "Pipeline torn down");
    }
}
