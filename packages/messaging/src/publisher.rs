//! Event publisher.

use flick_core::{DomainEvent, QueueSpec};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::broker::{BrokerChannel, BrokerConnector, BrokerError};
use crate::session::BrokerSession;

/// Errors from publishing an event.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Publishes domain events onto a queue.
///
/// The broker session is opened on the first publish and reused after that.
/// If a publish fails because the session is broken, the session is dropped
/// and the next publish opens a fresh one. Publishes are serialized: the
/// channel has one user at a time.
pub struct EventPublisher<C: BrokerConnector> {
    connector: C,
    queue: QueueSpec,
    session: Mutex<Option<BrokerSession<C>>>,
}

impl<C: BrokerConnector> EventPublisher<C> {
    pub fn new(connector: C, queue: QueueSpec) -> Self {
        Self {
            connector,
            queue,
            session: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.queue
    }

    /// Whether a session is currently open.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Publish an event.
    ///
    /// `Ok` means the broker accepted the message, not that anyone
    /// processed it.
    pub async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let body = event.encode()?;
        self.publish_raw(&body).await?;
        tracing::info!(
            queue = %self.queue,
            event_type = %event.event_type(),
            user_id = %event.user_id(),
            "Published event"
        );
        Ok(())
    }

    /// Publish and swallow any failure after logging it.
    ///
    /// For callers whose own work is already committed and must not fail
    /// because the broker is down. Returns whether the publish succeeded.
    pub async fn publish_best_effort(&self, event: &DomainEvent) -> bool {
        match self.publish(event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    queue = %self.queue,
                    event_type = %event.event_type(),
                    error = %e,
                    "Failed to publish event"
                );
                false
            }
        }
    }

    /// Publish an already encoded body.
    pub async fn publish_raw(&self, body: &[u8]) -> Result<(), BrokerError> {
        let mut guard = self.session.lock().await;

        if guard.is_none() {
            *guard = Some(BrokerSession::open(&self.connector, &self.queue).await?);
        }
        let Some(session) = guard.as_ref() else {
            return Err(BrokerError::ConnectionClosed);
        };

        let result = session.channel().publish(&self.queue.name, body).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_connectivity() {
                    tracing::warn!(queue = %self.queue, error = %e, "Dropping broken broker session");
                    if let Some(session) = guard.take() {
                        let _ = session.close().await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Close the session, if one is open.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}
