//! Actor backing the in-memory broker.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use flick_core::QueueSpec;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::mpsc;

use crate::BrokerError;
use crate::memory::MemoryDelivery;
use crate::messages::{BrokerMessage, QueueStats};

/// A message sitting in a queue.
#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    /// Deliveries so far.
    delivery_count: u32,
}

#[derive(Debug)]
struct ConsumerSlot {
    channel: u64,
    tag: String,
    sender: mpsc::UnboundedSender<MemoryDelivery>,
}

#[derive(Debug)]
struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerSlot>,
    /// Round-robin cursor into `consumers`.
    next_consumer: usize,
}

impl QueueState {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
        }
    }
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    message: StoredMessage,
}

#[derive(Debug)]
struct ChannelState {
    connection: u64,
    /// Outstanding deliveries by tag. Ordered so requeues keep delivery order.
    unacked: BTreeMap<u64, Unacked>,
}

/// State for the broker actor.
#[derive(Debug, Default)]
pub struct BrokerState {
    queues: HashMap<String, QueueState>,
    connections: HashMap<u64, HashSet<u64>>,
    channels: HashMap<u64, ChannelState>,
    next_id: u64,
    next_tag: u64,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn channel(&mut self, channel: u64) -> Result<&mut ChannelState, BrokerError> {
        self.channels
            .get_mut(&channel)
            .ok_or(BrokerError::ChannelClosed)
    }

    fn open_channel(&mut self, connection: u64) -> Result<u64, BrokerError> {
        if !self.connections.contains_key(&connection) {
            return Err(BrokerError::ConnectionClosed);
        }
        let id = self.next_id();
        self.channels.insert(
            id,
            ChannelState {
                connection,
                unacked: BTreeMap::new(),
            },
        );
        if let Some(channels) = self.connections.get_mut(&connection) {
            channels.insert(id);
        }
        Ok(id)
    }

    fn declare(&mut self, channel: u64, spec: QueueSpec) -> Result<(), BrokerError> {
        self.channel(channel)?;
        if !self.queues.contains_key(&spec.name) {
            tracing::debug!("Declared queue {}", spec.name);
            self.queues.insert(spec.name.clone(), QueueState::new(spec));
        }
        Ok(())
    }

    fn publish(
        &mut self,
        myself: &ActorRef<BrokerMessage>,
        channel: u64,
        queue: &str,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        self.channel(channel)?;
        match self.queues.get_mut(queue) {
            Some(q) => {
                q.ready.push_back(StoredMessage {
                    body,
                    delivery_count: 0,
                });
                self.dispatch(myself, queue);
            }
            // Unroutable on the default exchange
            None => tracing::debug!("Dropping message for undeclared queue {}", queue),
        }
        Ok(())
    }

    fn consume(
        &mut self,
        myself: &ActorRef<BrokerMessage>,
        channel: u64,
        queue: &str,
        tag: String,
        sender: mpsc::UnboundedSender<MemoryDelivery>,
    ) -> Result<(), BrokerError> {
        self.channel(channel)?;
        let q = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        tracing::debug!("Consumer {} registered on {}", tag, q.spec.name);
        q.consumers.push(ConsumerSlot {
            channel,
            tag,
            sender,
        });
        self.dispatch(myself, queue);
        Ok(())
    }

    fn settle(
        &mut self,
        myself: &ActorRef<BrokerMessage>,
        channel: u64,
        tag: u64,
        requeue: Option<bool>,
    ) -> Result<(), BrokerError> {
        let entry = self
            .channel(channel)?
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDelivery(tag))?;

        match requeue {
            // ack
            None => {}
            Some(true) => {
                if let Some(q) = self.queues.get_mut(&entry.queue) {
                    q.ready.push_front(entry.message);
                    self.dispatch(myself, &entry.queue);
                }
            }
            Some(false) => {
                tracing::debug!("Discarding rejected message from {}", entry.queue);
            }
        }
        Ok(())
    }

    fn close_channel(&mut self, myself: &ActorRef<BrokerMessage>, channel: u64) -> bool {
        let Some(state) = self.channels.remove(&channel) else {
            return false;
        };
        if let Some(channels) = self.connections.get_mut(&state.connection) {
            channels.remove(&channel);
        }

        for q in self.queues.values_mut() {
            q.consumers.retain(|c| {
                if c.channel == channel {
                    tracing::debug!("Consumer {} cancelled", c.tag);
                    false
                } else {
                    true
                }
            });
        }

        let mut touched = HashSet::new();
        for (_, entry) in state.unacked.into_iter().rev() {
            if let Some(q) = self.queues.get_mut(&entry.queue) {
                q.ready.push_front(entry.message);
                touched.insert(entry.queue);
            }
        }
        for queue in touched {
            self.dispatch(myself, &queue);
        }
        true
    }

    fn close_connection(&mut self, myself: &ActorRef<BrokerMessage>, connection: u64) -> bool {
        let Some(channels) = self.connections.remove(&connection) else {
            return false;
        };
        for channel in channels {
            self.close_channel(myself, channel);
        }
        true
    }

    /// Hand ready messages to consumers, round-robin.
    fn dispatch(&mut self, myself: &ActorRef<BrokerMessage>, queue: &str) {
        let Some(q) = self.queues.get_mut(queue) else {
            return;
        };

        while !q.consumers.is_empty() {
            let Some(mut message) = q.ready.pop_front() else {
                break;
            };

            let idx = q.next_consumer % q.consumers.len();
            let channel = q.consumers[idx].channel;
            message.delivery_count += 1;
            self.next_tag += 1;
            let tag = self.next_tag;

            let delivery = MemoryDelivery::new(
                myself.clone(),
                channel,
                tag,
                message.body.clone(),
                message.delivery_count,
            );

            if q.consumers[idx].sender.send(delivery).is_err() {
                // Receiver went away without closing its channel
                message.delivery_count -= 1;
                q.ready.push_front(message);
                q.consumers.remove(idx);
                continue;
            }

            q.next_consumer = idx + 1;
            if let Some(ch) = self.channels.get_mut(&channel) {
                ch.unacked.insert(
                    tag,
                    Unacked {
                        queue: queue.to_string(),
                        message,
                    },
                );
            }
        }
    }

    fn stats(&self, queue: &str) -> Option<QueueStats> {
        let q = self.queues.get(queue)?;
        let unacked = self
            .channels
            .values()
            .flat_map(|c| c.unacked.values())
            .filter(|u| u.queue == queue)
            .count();
        Some(QueueStats {
            ready: q.ready.len(),
            unacked,
            consumers: q.consumers.len(),
        })
    }
}

/// Actor that owns all in-memory broker state.
pub struct BrokerActor;

impl Actor for BrokerActor {
    type Msg = BrokerMessage;
    type State = BrokerState;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting in-memory broker");
        Ok(BrokerState::default())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BrokerMessage::Connect { reply } => {
                let id = state.next_id();
                state.connections.insert(id, HashSet::new());
                let _ = reply.send(id);
            }

            BrokerMessage::CloseConnection { connection, reply } => {
                let result = if state.close_connection(&myself, connection) {
                    Ok(())
                } else {
                    Err(BrokerError::ConnectionClosed)
                };
                let _ = reply.send(result);
            }

            BrokerMessage::OpenChannel { connection, reply } => {
                let _ = reply.send(state.open_channel(connection));
            }

            BrokerMessage::CloseChannel { channel, reply } => {
                let result = if state.close_channel(&myself, channel) {
                    Ok(())
                } else {
                    Err(BrokerError::ChannelClosed)
                };
                let _ = reply.send(result);
            }

            BrokerMessage::Declare {
                channel,
                spec,
                reply,
            } => {
                let _ = reply.send(state.declare(channel, spec));
            }

            BrokerMessage::Publish {
                channel,
                queue,
                body,
                reply,
            } => {
                let _ = reply.send(state.publish(&myself, channel, &queue, body));
            }

            BrokerMessage::Consume {
                channel,
                queue,
                consumer_tag,
                sender,
                reply,
            } => {
                let _ = reply.send(state.consume(&myself, channel, &queue, consumer_tag, sender));
            }

            BrokerMessage::Ack {
                channel,
                delivery_tag,
                reply,
            } => {
                let _ = reply.send(state.settle(&myself, channel, delivery_tag, None));
            }

            BrokerMessage::Nack {
                channel,
                delivery_tag,
                requeue,
                reply,
            } => {
                let _ = reply.send(state.settle(&myself, channel, delivery_tag, Some(requeue)));
            }

            BrokerMessage::GetQueueStats { queue, reply } => {
                let _ = reply.send(state.stats(&queue));
            }

            BrokerMessage::GetConnectionCount { reply } => {
                let _ = reply.send(state.connections.len());
            }
        }

        Ok(())
    }
}
