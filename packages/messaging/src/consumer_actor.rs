//! Consumer actor and per-message processing.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use flick_core::{DecodeError, DomainEvent, QueueSpec};
use futures_util::StreamExt;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::{OnceCell, broadcast};
use tokio::task::{JoinHandle, JoinSet};

use crate::broker::{
    BrokerChannel, BrokerConnector, BrokerError, ChannelOf, Delivery, DeliveryOf, DeliveryStream,
};
use crate::capability::{EnsureCreated, ScopeFactory};
use crate::consumer::RedeliveryPolicy;
use crate::events::{ConsumerEvent, ConsumerStats, Disposition};
use crate::session::BrokerSession;

/// Messages for the ConsumerActor.
#[derive(Debug)]
pub enum ConsumerMessage<D> {
    /// A delivery arrived from the broker.
    Deliver(D),
    /// The delivery stream reported an error.
    StreamFailed(BrokerError),
    /// The delivery stream closed.
    StreamEnded,
}

/// Decodes, applies and settles deliveries. Shared by all in-flight tasks.
pub(crate) struct MessageHandler<Ch> {
    channel: Arc<Ch>,
    queue: String,
    redelivery: RedeliveryPolicy,
    dead_letter_declared: OnceCell<()>,
    events: Option<broadcast::Sender<ConsumerEvent>>,
    stats: Arc<ConsumerStats>,
}

impl<Ch: BrokerChannel> MessageHandler<Ch> {
    pub(crate) fn new(
        channel: Arc<Ch>,
        queue: String,
        redelivery: RedeliveryPolicy,
        events: Option<broadcast::Sender<ConsumerEvent>>,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self {
            channel,
            queue,
            redelivery,
            dead_letter_declared: OnceCell::new(),
            events,
            stats,
        }
    }

    fn notify(&self, event: ConsumerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Decode, apply, settle.
    pub(crate) async fn process<S: ScopeFactory>(
        &self,
        delivery: Ch::Delivery,
        scopes: &S,
    ) -> Disposition {
        let delivery_count = delivery.delivery_count();

        let (disposition, user_id) = match DomainEvent::decode(delivery.body()) {
            Err(e) => {
                match &e {
                    DecodeError::Unrecognized(event_type) => tracing::warn!(
                        queue = %self.queue,
                        event_type = %event_type,
                        "Discarding event of unrecognized type"
                    ),
                    DecodeError::Malformed(_) => tracing::warn!(
                        queue = %self.queue,
                        error = %e,
                        "Discarding malformed message"
                    ),
                }
                self.settle(&delivery, None).await;
                (Disposition::Discarded, None)
            }

            Ok(event) => {
                let user_id = event.user_id();
                let scope = scopes.create_scope();
                let outcome = match &event {
                    DomainEvent::UserCreated { user_id } => scope.ensure_created(*user_id).await,
                };

                match outcome {
                    Ok(()) => {
                        self.settle(&delivery, None).await;
                        (Disposition::Acked, Some(user_id))
                    }
                    Err(e) => {
                        tracing::warn!(
                            queue = %self.queue,
                            event_type = %event.event_type(),
                            user_id = %user_id,
                            delivery_count,
                            error = %e,
                            "Downstream failed to handle event"
                        );
                        (self.on_failure(&delivery).await, Some(user_id))
                    }
                }
            }
        };

        tracing::debug!(
            queue = %self.queue,
            disposition = %disposition,
            delivery_count,
            "Delivery settled"
        );
        self.stats.record(disposition);
        self.notify(ConsumerEvent::Handled {
            disposition,
            user_id,
            delivery_count,
        });
        disposition
    }

    async fn on_failure(&self, delivery: &Ch::Delivery) -> Disposition {
        if let Some(queue) = self.redelivery.dead_letter_queue(delivery.delivery_count()) {
            match self.dead_letter(queue, delivery.body()).await {
                Ok(()) => {
                    tracing::warn!(
                        queue = %self.queue,
                        dead_letter_queue = %queue,
                        delivery_count = delivery.delivery_count(),
                        "Moved message to dead-letter queue"
                    );
                    self.settle(delivery, None).await;
                    return Disposition::DeadLettered;
                }
                Err(e) => {
                    tracing::error!(
                        dead_letter_queue = %queue,
                        error = %e,
                        "Failed to dead-letter message, requeueing"
                    );
                }
            }
        }

        self.settle(delivery, Some(true)).await;
        Disposition::Requeued
    }

    async fn dead_letter(&self, queue: &QueueSpec, body: &[u8]) -> Result<(), BrokerError> {
        self.dead_letter_declared
            .get_or_try_init(|| self.channel.declare_queue(queue))
            .await?;
        self.channel.publish(&queue.name, body).await
    }

    /// `None` acks; `Some(requeue)` nacks.
    async fn settle(&self, delivery: &Ch::Delivery, nack: Option<bool>) {
        let result = match nack {
            None => delivery.ack().await,
            Some(requeue) => delivery.nack(requeue).await,
        };
        if let Err(e) = result {
            self.stats.record_settle_failure();
            tracing::error!(queue = %self.queue, error = %e, "Failed to settle delivery");
        }
    }
}

/// Arguments for starting a ConsumerActor.
pub struct ConsumerArgs<C: BrokerConnector, S: ScopeFactory> {
    pub session: BrokerSession<C>,
    pub stream: DeliveryStream<DeliveryOf<C>>,
    pub scopes: Arc<S>,
    pub consumer_tag: String,
    pub redelivery: RedeliveryPolicy,
    pub drain_timeout: Duration,
    pub events: Option<broadcast::Sender<ConsumerEvent>>,
    pub stats: Arc<ConsumerStats>,
}

/// State for the consumer actor.
pub struct ConsumerState<C: BrokerConnector, S: ScopeFactory> {
    session: Option<BrokerSession<C>>,
    handler: Arc<MessageHandler<ChannelOf<C>>>,
    scopes: Arc<S>,
    pump: Option<JoinHandle<()>>,
    in_flight: JoinSet<()>,
    drain_timeout: Duration,
    queue: String,
    events: Option<broadcast::Sender<ConsumerEvent>>,
    stats: Arc<ConsumerStats>,
}

impl<C: BrokerConnector, S: ScopeFactory> ConsumerState<C, S> {
    /// Drop finished per-message tasks.
    fn reap(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(queue = %self.queue, "Message task panicked: {}", e);
                }
            }
        }
    }

    async fn drain(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        let pending = self.in_flight.len();
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while self.in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                queue = %self.queue,
                pending,
                "Drain timed out, abandoning in-flight messages"
            );
            self.in_flight.abort_all();
            while self.in_flight.join_next().await.is_some() {}
        }
    }
}

/// Actor that owns a consumer's broker session and dispatches deliveries.
pub struct ConsumerActor<C, S>(PhantomData<fn() -> (C, S)>);

impl<C, S> ConsumerActor<C, S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<C, S> Default for ConsumerActor<C, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: BrokerConnector, S: ScopeFactory> Actor for ConsumerActor<C, S> {
    type Msg = ConsumerMessage<DeliveryOf<C>>;
    type State = ConsumerState<C, S>;
    type Arguments = ConsumerArgs<C, S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let ConsumerArgs {
            session,
            mut stream,
            scopes,
            consumer_tag,
            redelivery,
            drain_timeout,
            events,
            stats,
        } = args;

        let queue = session.queue().name.clone();
        tracing::info!(queue = %queue, consumer_tag = %consumer_tag, "Consumer listening");

        // Forward deliveries into the mailbox
        let pump_ref = myself.clone();
        let pump = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let message = match item {
                    Ok(delivery) => ConsumerMessage::Deliver(delivery),
                    Err(e) => ConsumerMessage::StreamFailed(e),
                };
                if pump_ref.send_message(message).is_err() {
                    return;
                }
            }
            let _ = pump_ref.send_message(ConsumerMessage::StreamEnded);
        });

        let handler = Arc::new(MessageHandler::new(
            session.channel_handle(),
            queue.clone(),
            redelivery,
            events.clone(),
            stats.clone(),
        ));

        if let Some(tx) = &events {
            let _ = tx.send(ConsumerEvent::Started {
                queue: queue.clone(),
            });
        }

        Ok(ConsumerState {
            session: Some(session),
            handler,
            scopes,
            pump: Some(pump),
            in_flight: JoinSet::new(),
            drain_timeout,
            queue,
            events,
            stats,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ConsumerMessage::Deliver(delivery) => {
                state.reap();
                let handler = state.handler.clone();
                let scopes = state.scopes.clone();
                state.in_flight.spawn(async move {
                    handler.process(delivery, &*scopes).await;
                });
            }

            ConsumerMessage::StreamFailed(e) => {
                tracing::error!(queue = %state.queue, error = %e, "Delivery stream failed");
                state.stats.mark_connection_lost();
                myself.stop(Some(e.to_string()));
            }

            ConsumerMessage::StreamEnded => {
                tracing::warn!(queue = %state.queue, "Delivery stream ended");
                state.stats.mark_connection_lost();
                myself.stop(Some("delivery stream ended".to_string()));
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(queue = %state.queue, "Stopping consumer");

        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        state.drain().await;

        if let Some(session) = state.session.take() {
            let _ = session.close().await;
        }

        if let Some(tx) = &state.events {
            let _ = tx.send(ConsumerEvent::Stopped {
                queue: state.queue.clone(),
            });
        }
        Ok(())
    }
}
