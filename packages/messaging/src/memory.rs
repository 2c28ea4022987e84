//! In-process broker.
//!
//! Behaves like a queue broker for the operations the services use: named
//! queues, round-robin delivery across consumers, manual acknowledgment,
//! requeue on reject and on channel close, and unroutable messages dropped.
//! All state lives in a single actor; handles are cheap to clone.

use std::sync::Arc;
use std::time::Duration;

use flick_core::QueueSpec;
use futures_util::StreamExt;
use parking_lot::Mutex;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broker::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, Delivery, DeliveryStream,
};
use crate::broker_actor::BrokerActor;
use crate::messages::{BrokerMessage, QueueStats};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

async fn call<T, F>(broker: &ActorRef<BrokerMessage>, build: F) -> Result<T, BrokerError>
where
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> BrokerMessage + Send,
{
    match ractor::rpc::call(broker, build, Some(CALL_TIMEOUT)).await {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(BrokerError::Unreachable(
            "in-memory broker timed out".to_string(),
        )),
        Ok(CallResult::SenderError) | Err(_) => Err(BrokerError::Unreachable(
            "in-memory broker is not running".to_string(),
        )),
    }
}

/// Handle to an in-process broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    actor: ActorRef<BrokerMessage>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl InMemoryBroker {
    /// Start a new, empty broker.
    pub async fn start() -> Result<Self, BrokerError> {
        let (actor, handle) = Actor::spawn(None, BrokerActor, ())
            .await
            .map_err(|e| BrokerError::Unreachable(format!("failed to start broker: {}", e)))?;
        Ok(Self {
            actor,
            handle: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Stop the broker and wait for it to exit. Open consumers see their
    /// delivery streams end.
    pub async fn shutdown(&self) {
        self.actor.stop(None);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Stats for a queue, or `None` if it was never declared.
    pub async fn queue_stats(&self, queue: &str) -> Result<Option<QueueStats>, BrokerError> {
        let queue = queue.to_string();
        call(&self.actor, |reply| BrokerMessage::GetQueueStats { queue, reply }).await
    }

    /// Messages waiting in a queue (0 if undeclared).
    pub async fn queue_depth(&self, queue: &str) -> Result<usize, BrokerError> {
        Ok(self.queue_stats(queue).await?.map_or(0, |s| s.ready))
    }

    /// Connections currently open.
    pub async fn connection_count(&self) -> Result<usize, BrokerError> {
        call(&self.actor, |reply| BrokerMessage::GetConnectionCount { reply }).await
    }
}

impl BrokerConnector for InMemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, BrokerError> {
        let id = call(&self.actor, |reply| BrokerMessage::Connect { reply }).await?;
        tracing::debug!("Opened in-memory connection {}", id);
        Ok(MemoryConnection {
            broker: self.actor.clone(),
            id,
        })
    }
}

/// A connection to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    broker: ActorRef<BrokerMessage>,
    id: u64,
}

impl BrokerConnection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn create_channel(&self) -> Result<MemoryChannel, BrokerError> {
        let connection = self.id;
        let id = call(&self.broker, |reply| BrokerMessage::OpenChannel {
            connection,
            reply,
        })
        .await??;
        Ok(MemoryChannel {
            broker: self.broker.clone(),
            id,
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let connection = self.id;
        call(&self.broker, |reply| BrokerMessage::CloseConnection {
            connection,
            reply,
        })
        .await?
    }
}

/// A channel on a [`MemoryConnection`].
#[derive(Debug)]
pub struct MemoryChannel {
    broker: ActorRef<BrokerMessage>,
    id: u64,
}

impl BrokerChannel for MemoryChannel {
    type Delivery = MemoryDelivery;

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
        let (channel, spec) = (self.id, spec.clone());
        call(&self.broker, |reply| BrokerMessage::Declare {
            channel,
            spec,
            reply,
        })
        .await?
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        let (channel, queue, body) = (self.id, queue.to_string(), body.to_vec());
        call(&self.broker, |reply| BrokerMessage::Publish {
            channel,
            queue,
            body,
            reply,
        })
        .await?
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream<MemoryDelivery>, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (channel, queue, consumer_tag) =
            (self.id, queue.to_string(), consumer_tag.to_string());
        call(&self.broker, |reply| BrokerMessage::Consume {
            channel,
            queue,
            consumer_tag,
            sender: tx,
            reply,
        })
        .await??;

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), rx))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let channel = self.id;
        call(&self.broker, |reply| BrokerMessage::CloseChannel { channel, reply }).await?
    }
}

/// A message delivered by an [`InMemoryBroker`].
#[derive(Debug)]
pub struct MemoryDelivery {
    broker: ActorRef<BrokerMessage>,
    channel: u64,
    tag: u64,
    body: Vec<u8>,
    delivery_count: u32,
}

impl MemoryDelivery {
    pub(crate) fn new(
        broker: ActorRef<BrokerMessage>,
        channel: u64,
        tag: u64,
        body: Vec<u8>,
        delivery_count: u32,
    ) -> Self {
        Self {
            broker,
            channel,
            tag,
            body,
            delivery_count,
        }
    }
}

impl Delivery for MemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        let (channel, delivery_tag) = (self.channel, self.tag);
        call(&self.broker, |reply| BrokerMessage::Ack {
            channel,
            delivery_tag,
            reply,
        })
        .await?
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let (channel, delivery_tag) = (self.channel, self.tag);
        call(&self.broker, |reply| BrokerMessage::Nack {
            channel,
            delivery_tag,
            requeue,
            reply,
        })
        .await?
    }
}
