pub mod nats;

use error_stack::Report;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::BusError;

/// A single delivered bus message: the raw payload plus an ack handle.
/// Handlers ack only after their synchronous work (persist + publish the
/// next-stage message) completes; dropping `Delivery` without acking leaves
/// the message subject to redelivery.
pub struct Delivery {
    pub payload: Vec<u8>,
    acker: Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Report<BusError>>> + Send>,
}

impl Delivery {
    pub fn new(
        payload: Vec<u8>,
        acker: impl FnOnce() -> BoxFuture<'static, Result<(), Report<BusError>>> + Send + 'static,
    ) -> Self {
        Self {
            payload,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(self) -> Result<(), Report<BusError>> {
        (self.acker)().await
    }
}

/// The durable publish/subscribe bus the four binaries share. Grounded
/// directly in spec.md §4.5/§6 (JetStream-shaped streams, durable
/// hostname-scoped consumers, explicit ack) — no teacher precedent, so
/// `async-nats` is used as the real crate implementing exactly this
/// contract.
pub trait Bus: Send + Sync {
    /// Publish `payload` on `subject`.
    fn publish(&self, subject: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<(), Report<BusError>>>;

    /// Open a durable, explicitly-acked consumer on `subject` named
    /// `durable_name` (expected to embed the replica hostname so replicas
    /// do not share a cursor).
    fn subscribe(
        &self,
        subject: &str,
        durable_name: &str,
    ) -> BoxFuture<'_, Result<BoxStream<'static, Delivery>, Report<BusError>>>;
}
