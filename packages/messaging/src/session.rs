//! Broker sessions.

use std::sync::Arc;

use flick_core::QueueSpec;

use crate::broker::{BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, ChannelOf};

/// One connection and one channel, with the session's queue declared.
///
/// A session is owned by exactly one publisher or consumer. It is never
/// opened implicitly: the owner calls [`BrokerSession::open`] and must call
/// [`BrokerSession::close`] to release it.
pub struct BrokerSession<C: BrokerConnector> {
    connection: C::Connection,
    channel: Arc<ChannelOf<C>>,
    queue: QueueSpec,
}

impl<C: BrokerConnector> BrokerSession<C> {
    /// Connect, open a channel and declare `queue`.
    ///
    /// Anything already opened is closed again if a later step fails.
    pub async fn open(connector: &C, queue: &QueueSpec) -> Result<Self, BrokerError> {
        let connection = connector.connect().await?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };

        if let Err(e) = channel.declare_queue(queue).await {
            let _ = channel.close().await;
            let _ = connection.close().await;
            return Err(e);
        }

        tracing::debug!(queue = %queue, "Broker session opened");

        Ok(Self {
            connection,
            channel: Arc::new(channel),
            queue: queue.clone(),
        })
    }

    pub fn channel(&self) -> &ChannelOf<C> {
        &self.channel
    }

    /// Shared handle to the channel, for per-message work the owner spawns.
    pub fn channel_handle(&self) -> Arc<ChannelOf<C>> {
        Arc::clone(&self.channel)
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.queue
    }

    /// Close the channel, then the connection.
    ///
    /// Both are attempted even if the first fails. Returns the first error.
    pub async fn close(self) -> Result<(), BrokerError> {
        let channel_result = self.channel.close().await;
        if let Err(ref e) = channel_result {
            tracing::warn!(queue = %self.queue, error = %e, "Failed to close broker channel");
        }

        let connection_result = self.connection.close().await;
        if let Err(ref e) = connection_result {
            tracing::warn!(queue = %self.queue, error = %e, "Failed to close broker connection");
        }

        tracing::debug!(queue = %self.queue, "Broker session closed");
        channel_result.and(connection_result)
    }
}
