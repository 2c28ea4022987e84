//! Broker plumbing for the FlickBinge services.
//!
//! - `broker` - connector, connection, channel and delivery traits
//! - `InMemoryBroker` - an actor-backed broker for local runs and tests
//! - `AmqpConnector` - a RabbitMQ broker (feature `amqp`)
//! - `BrokerSession` - one owned connection and channel
//! - `EventPublisher` - publishes domain events
//! - `EventConsumer` - consumes them with manual ack, redelivery and a DLQ
//!
//! # Usage
//!
//! ```ignore
//! use messaging::{ConsumerConfig, EventConsumer, EventPublisher, InMemoryBroker};
//!
//! let broker = InMemoryBroker::start().await?;
//! let publisher = EventPublisher::new(broker.clone(), QueueSpec::default());
//! publisher.publish(&DomainEvent::user_created(user_id)).await?;
//!
//! let consumer = EventConsumer::new(broker, scopes, ConsumerConfig::default());
//! consumer.start_listening(shutdown_signal()).await?;
//! ```

#[cfg(feature = "amqp")]
mod amqp;
mod broker;
mod broker_actor;
mod capability;
mod consumer;
mod consumer_actor;
mod events;
mod memory;
mod messages;
mod publisher;
mod session;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannel, AmqpConnection, AmqpConnector, AmqpDelivery};
pub use broker::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, Delivery, DeliveryStream,
};
pub use capability::{CapabilityError, EnsureCreated, ScopeFactory};
pub use consumer::{ConsumerConfig, ConsumerError, ConsumerHandle, EventConsumer, RedeliveryPolicy};
pub use events::{ConsumerEvent, ConsumerStats, ConsumerStatsSnapshot, Disposition};
pub use memory::{InMemoryBroker, MemoryChannel, MemoryConnection, MemoryDelivery};
pub use messages::QueueStats;
pub use publisher::{EventPublisher, PublishError};
pub use session::BrokerSession;
