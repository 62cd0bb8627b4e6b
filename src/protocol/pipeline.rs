use crate::error::Result;
use crate::protocol::packet::{Direction, RelayPacket};
use crate::transport::SessionLink;
use async_trait::async_trait;
use tracing::{trace, warn};

/// A stage in the session's packet pipeline.
///
/// `on_packet` returns `true` when it consumed the packet; later interceptors and the
/// default forwarding are then skipped. It may rewrite the packet in place before
/// declining it.
#[async_trait]
pub trait Interceptor: Send {
    fn name(&self) -> &'static str;

    async fn on_packet(
        &mut self,
        direction: Direction,
        packet: &mut RelayPacket,
        link: &mut dyn SessionLink,
    ) -> bool;

    async fn on_disconnect(&mut self, _reason: &str) -> Result<()> {
        Ok(())
    }
}

/// Ordered interceptor chain for one session.
pub struct PacketPipeline {
    interceptors: Vec<Box<dyn Interceptor>>,
    torn_down: bool,
}

impl Default for PacketPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketPipeline {
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
            torn_down: false,
        }
    }

    /// Append an interceptor; registration order is dispatch order.
    pub fn register(&mut self, interceptor: Box<dyn Interceptor>) {
        trace!(interceptor = interceptor.name(), "Interceptor registered");
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Offer `packet` to each interceptor in order until one handles it.
    pub async fn dispatch(
        &mut self,
        direction: Direction,
        packet: &mut RelayPacket,
        link: &mut dyn SessionLink,
    ) -> bool {
        for interceptor in self.interceptors.iter_mut() {
            if interceptor.on_packet(direction, packet, link).await {
                trace!(
                    interceptor = interceptor.name(),
                    packet = packet.name(),
                    "Packet handled"
                );
                return true;
            }
        }
        false
    }

    /// Notify every interceptor of session end. Runs at most once; failures are logged.
    pub async fn teardown(&mut self, reason: &str) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        for interceptor in self.interceptors.iter_mut() {
            if let Err(e) = interceptor.on_disconnect(reason).await {
                warn!(interceptor = interceptor.name(), error = %e, "Interceptor teardown failed");
            }
        }
    }
}

/// Runs a callback when the session ends.
pub struct OnClose<F> {
    callback: F,
}

impl<F> OnClose<F>
where
    F: FnMut(&str) + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> Interceptor for OnClose<F>
where
    F: FnMut(&str) + Send,
{
    fn name(&self) -> &'static str {
        "on_close"
    }

    async fn on_packet(
        &mut self,
        _direction: Direction,
        _packet: &mut RelayPacket,
        _link: &mut dyn SessionLink,
    ) -> bool {
        false
    }

    async fn on_disconnect(&mut self, reason: &str) -> Result<()> {
        (self.callback)(reason);
        Ok(())
    }
}
