use crate::errors::TransportError;
use async_trait::async_trait;
use std::time::Duration;

/// A message handed to a consumer, pending acknowledgement.
#[derive(Debug)]
pub struct Delivery {
    /// Raw message body.
    pub body: Vec<u8>,
    pub(crate) tag: u64,
}

/// Connection-level handle to a delayed-delivery broker.
///
/// Implementations own the exchange/queue topology and the channel
/// lifecycle. The rest of the crate only ever talks to the broker through
/// this trait, so tests and local development can swap in
/// [`MemoryBroker`](crate::MemoryBroker).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare the exchange/queue topology.
    ///
    /// Idempotent: safe to call at every process start even when the
    /// topology already exists.
    async fn declare(&self) -> Result<(), TransportError>;

    /// Publish a persistent message, withheld from consumers until `delay`
    /// has elapsed.
    async fn publish(&self, body: Vec<u8>, delay: Duration) -> Result<(), TransportError>;

    /// Open a subscription that delivers at most one unacknowledged message
    /// at a time.
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, TransportError>;

    /// Tear down channels and the connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// One consumer's view of the queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `wait` for the next delivery.
    ///
    /// `Ok(None)` means the broker reported no pending work within the
    /// window.
    async fn recv(&mut self, wait: Duration) -> Result<Option<Delivery>, TransportError>;

    /// Confirm a delivery so the broker can discard it.
    async fn ack(&mut self, delivery: Delivery) -> Result<(), TransportError>;
}
