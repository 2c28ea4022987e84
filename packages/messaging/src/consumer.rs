//! Event consumer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use flick_core::QueueSpec;
use ractor::{Actor, ActorCell};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::broker::{BrokerChannel, BrokerConnector, BrokerError};
use crate::capability::ScopeFactory;
use crate::consumer_actor::{ConsumerActor, ConsumerArgs};
use crate::events::{ConsumerEvent, ConsumerStats, ConsumerStatsSnapshot};
use crate::session::BrokerSession;

/// What to do with a message whose processing keeps failing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RedeliveryPolicy {
    /// Requeue every time.
    #[default]
    Unbounded,
    /// Requeue until the message has been delivered `max_deliveries` times,
    /// then move it to `queue` and ack the delivery.
    DeadLetter {
        max_deliveries: u32,
        queue: QueueSpec,
    },
}

impl RedeliveryPolicy {
    pub fn dead_letter(max_deliveries: u32, queue: QueueSpec) -> Self {
        RedeliveryPolicy::DeadLetter {
            max_deliveries: max_deliveries.max(1),
            queue,
        }
    }

    /// The dead-letter queue, if a message on its `delivery_count`th
    /// delivery should go there instead of being requeued.
    pub fn dead_letter_queue(&self, delivery_count: u32) -> Option<&QueueSpec> {
        match self {
            RedeliveryPolicy::DeadLetter {
                max_deliveries,
                queue,
            } if delivery_count >= *max_deliveries => Some(queue),
            _ => None,
        }
    }
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: QueueSpec,
    pub consumer_tag: String,
    pub redelivery: RedeliveryPolicy,
    /// How long shutdown waits for in-flight messages.
    pub drain_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: QueueSpec::default(),
            consumer_tag: "watchlist-consumer".to_string(),
            redelivery: RedeliveryPolicy::Unbounded,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl ConsumerConfig {
    pub fn with_queue(mut self, queue: QueueSpec) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    pub fn with_redelivery(mut self, redelivery: RedeliveryPolicy) -> Self {
        self.redelivery = redelivery;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Errors from running a consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("failed to start consumer: {0}")]
    Spawn(String),

    #[error("consumer task failed: {0}")]
    Terminated(String),

    #[error("lost connection to the broker")]
    ConnectionLost,
}

/// Handle to a running consumer.
#[derive(Clone)]
pub struct ConsumerHandle {
    actor: ActorCell,
    queue: String,
    stats: Arc<ConsumerStats>,
}

impl ConsumerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Ask the consumer to stop. Await its join handle to wait for the
    /// drain and the session close.
    pub fn stop(&self) {
        self.actor.stop(Some("shutdown requested".to_string()));
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the consumer stopped because its delivery stream failed.
    pub fn connection_lost(&self) -> bool {
        self.stats.connection_lost()
    }
}

/// Consumes domain events and applies them through a [`ScopeFactory`].
///
/// Each delivery is handled in its own task with a fresh scope. Messages are
/// acked after the capability succeeds, acked and discarded if they cannot
/// be decoded, and otherwise requeued or dead-lettered per the
/// [`RedeliveryPolicy`].
pub struct EventConsumer<C: BrokerConnector, S: ScopeFactory> {
    connector: C,
    scopes: Arc<S>,
    config: ConsumerConfig,
    events: Option<broadcast::Sender<ConsumerEvent>>,
}

impl<C: BrokerConnector, S: ScopeFactory> EventConsumer<C, S> {
    pub fn new(connector: C, scopes: S, config: ConsumerConfig) -> Self {
        Self {
            connector,
            scopes: Arc::new(scopes),
            config,
            events: None,
        }
    }

    /// Broadcast consumer events on `tx`.
    pub fn with_events(mut self, tx: broadcast::Sender<ConsumerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Open a session, register on the queue and start the consumer actor.
    pub async fn spawn(self) -> Result<(ConsumerHandle, JoinHandle<()>), ConsumerError> {
        let session = BrokerSession::open(&self.connector, &self.config.queue).await?;

        let stream = match session
            .channel()
            .consume(&self.config.queue.name, &self.config.consumer_tag)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                let _ = session.close().await;
                return Err(e.into());
            }
        };

        let stats = Arc::new(ConsumerStats::default());
        let args = ConsumerArgs {
            session,
            stream,
            scopes: self.scopes,
            consumer_tag: self.config.consumer_tag,
            redelivery: self.config.redelivery,
            drain_timeout: self.config.drain_timeout,
            events: self.events,
            stats: stats.clone(),
        };

        let (actor, join) = Actor::spawn(None, ConsumerActor::<C, S>::new(), args)
            .await
            .map_err(|e| ConsumerError::Spawn(e.to_string()))?;

        Ok((
            ConsumerHandle {
                actor: actor.get_cell(),
                queue: self.config.queue.name,
                stats,
            },
            join,
        ))
    }

    /// Run until `shutdown` resolves or the broker connection is lost.
    ///
    /// On shutdown, in-flight messages are drained and the session closed
    /// before this returns.
    pub async fn start_listening<F>(self, shutdown: F) -> Result<(), ConsumerError>
    where
        F: Future<Output = ()>,
    {
        let (handle, mut join) = self.spawn().await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!(queue = %handle.queue(), "Shutdown requested");
                handle.stop();
                join.await.map_err(|e| ConsumerError::Terminated(e.to_string()))?;
                Ok(())
            }
            result = &mut join => {
                result.map_err(|e| ConsumerError::Terminated(e.to_string()))?;
                if handle.connection_lost() {
                    Err(ConsumerError::ConnectionLost)
                } else {
                    Ok(())
                }
            }
        }
    }
}
