//! Broker selection.

use anyhow::Result;

#[cfg(feature = "amqp")]
pub type Connector = messaging::AmqpConnector;

#[cfg(not(feature = "amqp"))]
pub type Connector = messaging::InMemoryBroker;

/// Whether the broker lives and dies with this process. Nothing published
/// to it reaches another process.
pub const PROCESS_LOCAL: bool = cfg!(not(feature = "amqp"));

/// The broker this binary was built for.
#[cfg(feature = "amqp")]
pub async fn connector(amqp_url: &str) -> Result<Connector> {
    tracing::info!("Using AMQP broker");
    Ok(messaging::AmqpConnector::new(amqp_url))
}

/// The broker this binary was built for.
#[cfg(not(feature = "amqp"))]
pub async fn connector(amqp_url: &str) -> Result<Connector> {
    tracing::info!(
        ignored_url = %amqp_url,
        "Built without the amqp feature, using the in-process broker"
    );
    Ok(messaging::InMemoryBroker::start().await?)
}
