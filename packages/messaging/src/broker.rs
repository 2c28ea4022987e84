//! Broker abstraction.
//!
//! Mirrors the queue protocol the services speak: connect, open a channel,
//! declare a named queue, publish raw bytes to the default exchange with the
//! queue name as routing key, consume with manual acknowledgment.

use std::future::Future;

use flick_core::QueueSpec;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Errors from the broker or the connection to it.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("channel closed")]
    ChannelClosed,

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Whether the session that produced this error is unusable.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            BrokerError::Unreachable(_) | BrokerError::ConnectionClosed | BrokerError::ChannelClosed
        )
    }
}

/// Stream of deliveries from a consumer registration.
pub type DeliveryStream<D> = BoxStream<'static, Result<D, BrokerError>>;

/// Opens connections to a broker.
pub trait BrokerConnector: Send + Sync + 'static {
    type Connection: BrokerConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, BrokerError>> + Send;
}

/// An open connection.
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    fn create_channel(&self) -> impl Future<Output = Result<Self::Channel, BrokerError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// A channel on a connection. All queue operations go through a channel.
pub trait BrokerChannel: Send + Sync + 'static {
    type Delivery: Delivery;

    /// Declare a queue. Declaring an existing queue is a no-op.
    fn declare_queue(&self, spec: &QueueSpec)
    -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Publish to the default exchange, routed by queue name.
    fn publish(
        &self,
        queue: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Register a manual-ack consumer on `queue`.
    fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> impl Future<Output = Result<DeliveryStream<Self::Delivery>, BrokerError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// A message handed to a consumer, pending acknowledgment.
pub trait Delivery: Send + Sync + 'static {
    fn body(&self) -> &[u8];

    /// How many times this message has been delivered, this time included.
    fn delivery_count(&self) -> u32;

    /// Whether the message was delivered before.
    fn redelivered(&self) -> bool {
        self.delivery_count() > 1
    }

    fn ack(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn nack(&self, requeue: bool) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

pub(crate) type ChannelOf<C> =
    <<C as BrokerConnector>::Connection as BrokerConnection>::Channel;

pub(crate) type DeliveryOf<C> = <ChannelOf<C> as BrokerChannel>::Delivery;
