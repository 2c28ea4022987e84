//! Message types for the in-memory broker actor.

use flick_core::QueueSpec;
use ractor::RpcReplyPort;
use tokio::sync::mpsc;

use crate::BrokerError;
use crate::memory::MemoryDelivery;

/// Snapshot of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages waiting for a consumer.
    pub ready: usize,
    /// Messages delivered but not yet acknowledged.
    pub unacked: usize,
    /// Registered consumers.
    pub consumers: usize,
}

/// Messages for the BrokerActor.
#[derive(Debug)]
pub enum BrokerMessage {
    /// Open a connection.
    Connect { reply: RpcReplyPort<u64> },

    /// Close a connection and every channel on it.
    CloseConnection {
        connection: u64,
        reply: RpcReplyPort<Result<(), BrokerError>>,
    },

    /// Open a channel on a connection.
    OpenChannel {
        connection: u64,
        reply: RpcReplyPort<Result<u64, BrokerError>>,
    },

    /// Close a channel, requeueing its unacknowledged deliveries.
    CloseChannel {
        channel: u64,
        reply: RpcReplyPort<Result<(), BrokerError>>,
    },

    /// Declare a queue if absent.
    Declare {
        channel: u64,
        spec: QueueSpec,
        reply: RpcReplyPort<Result<(), BrokerError>>,
    },

    /// Publish a message by queue name.
    Publish {
        channel: u64,
        queue: String,
        body: Vec<u8>,
        reply: RpcReplyPort<Result<(), BrokerError>>,
    },

    /// Register a consumer.
    Consume {
        channel: u64,
        queue: String,
        consumer_tag: String,
        sender: mpsc::UnboundedSender<MemoryDelivery>,
        reply: RpcReplyPort<Result<(), BrokerError>>,
    },

    /// Acknowledge a delivery.
    Ack {
        channel: u64,
        delivery_tag: u64,
        reply: RpcReplyPort<Result<(), BrokerError>>,
    },

    /// Reject a delivery, optionally putting it back on its queue.
    Nack {
        channel: u64,
        delivery_tag: u64,
        requeue: bool,
        reply: RpcReplyPort<Result<(), BrokerError>>,
    },

    /// Get stats for a queue.
    GetQueueStats {
        queue: String,
        reply: RpcReplyPort<Option<QueueStats>>,
    },

    /// Count open connections.
    GetConnectionCount { reply: RpcReplyPort<usize> },
}
