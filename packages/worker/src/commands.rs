//! Subcommand handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use db::{Database, DbConfig};
use flick_core::{DomainEvent, QueueSpec, RecommendationRequest, User};
use messaging::{
    BrokerConnector, ConsumerConfig, ConsumerEvent, EventConsumer, EventPublisher,
    InMemoryBroker, RedeliveryPolicy,
};
use resilience::{PolicyConfig, ResiliencePolicy};
use services::{
    CompletionClient, CompletionConfig, DrainReport, MovieClient, OmdbConfig, OutboxRelay,
    RecommendationService, RelayConfig, UserService, WatchlistScopeFactory, WatchlistService,
};
use tokio::sync::broadcast;

use crate::Cli;
use crate::broker;

async fn open_db(cli: &Cli) -> Result<Database> {
    let config = DbConfig::default().with_endpoint(&cli.db);
    db::init(config)
        .await
        .with_context(|| format!("Failed to open database at {}", cli.db))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Run the watchlist consumer, plus an outbox relay for this database.
pub async fn worker(cli: &Cli, max_deliveries: Option<u32>, dead_letter_queue: &str) -> Result<()> {
    let db = open_db(cli).await?;
    let connector = broker::connector(&cli.amqp_url).await?;

    let redelivery = match max_deliveries {
        Some(max) => RedeliveryPolicy::dead_letter(max, QueueSpec::transient(dead_letter_queue)),
        None => RedeliveryPolicy::Unbounded,
    };
    let config = ConsumerConfig::default().with_redelivery(redelivery);

    let publisher = Arc::new(EventPublisher::new(connector.clone(), config.queue.clone()));
    let relay = OutboxRelay::new(db.clone(), publisher.clone(), RelayConfig::default()).spawn();

    let consumer = EventConsumer::new(connector, WatchlistScopeFactory::new(db), config);
    tracing::info!("Worker started, press Ctrl-C to stop");
    let result = consumer.start_listening(shutdown_signal()).await;

    let report = relay.stop().await;
    tracing::info!(dispatched = report.dispatched, failed = report.failed, "Relay finished");
    if let Err(e) = publisher.close().await {
        tracing::warn!(error = %e, "Failed to close publisher session");
    }

    result.context("Consumer stopped")
}

pub async fn register_user(cli: &Cli, username: &str, email: &str) -> Result<()> {
    let db = open_db(cli).await?;

    // An in-process broker would take the event with it on exit
    let connector = if broker::PROCESS_LOCAL {
        None
    } else {
        Some(broker::connector(&cli.amqp_url).await?)
    };

    let (user, report) = register_and_publish(db, username, email, connector).await?;
    println!("Registered {} ({})", user.username, user.id);

    match report {
        Some(report) if report.failed == 0 => {
            println!("Published {} event(s)", report.dispatched)
        }
        _ => println!("Event kept in the outbox; the worker's relay will publish it"),
    }
    Ok(())
}

/// Register a user, then drain the outbox through `connector` if there is one.
///
/// Without a connector the event stays pending in the outbox.
async fn register_and_publish<C: BrokerConnector>(
    db: Database,
    username: &str,
    email: &str,
    connector: Option<C>,
) -> Result<(User, Option<DrainReport>)> {
    let user = UserService::new(db.clone())
        .register(username, email)
        .await
        .context("Registration failed")?;

    let Some(connector) = connector else {
        tracing::info!(user_id = %user.id, "No shared broker, leaving event in the outbox");
        return Ok((user, None));
    };

    let publisher = Arc::new(EventPublisher::new(connector, QueueSpec::default()));
    let relay = OutboxRelay::new(db, publisher.clone(), RelayConfig::default());
    let report = relay.drain_once().await?;
    publisher.close().await?;
    Ok((user, Some(report)))
}

pub async fn movies(cli: &Cli) -> Result<()> {
    let config = OmdbConfig::default()
        .with_base_url(&cli.omdb.omdb_base_url)
        .with_api_key(&cli.omdb.omdb_api_key);
    let client = MovieClient::new(config, ResiliencePolicy::new(PolicyConfig::default()))?;

    let movies = client.popular_movies_or_empty().await;
    if movies.is_empty() {
        println!("No movies available");
    }
    for movie in movies {
        println!("{} ({}) {}", movie.title, movie.year, movie.imdb_id);
    }
    Ok(())
}

pub async fn recommend(cli: &Cli, watched: &[String], interests: &[String]) -> Result<()> {
    let config = CompletionConfig::default()
        .with_base_url(&cli.completion.openai_base_url)
        .with_api_key(&cli.completion.openai_api_key)
        .with_model(&cli.completion.openai_model);
    let client = CompletionClient::new(config, ResiliencePolicy::new(PolicyConfig::default()))?;
    let service = RecommendationService::new(client);

    let request = RecommendationRequest::new(watched.to_vec(), interests.to_vec());
    let result = service.recommend_or_empty(&request).await;
    if result.recommended_movies.is_empty() {
        println!("No recommendations available");
    }
    for title in result.recommended_movies {
        println!("{}", title);
    }
    Ok(())
}

/// Everything in one process against the in-process broker.
pub async fn demo() -> Result<()> {
    let db = db::init(DbConfig::memory()).await?;
    let broker = InMemoryBroker::start().await?;

    let (tx, mut events) = broadcast::channel(64);
    let (consumer, join) = EventConsumer::new(
        broker.clone(),
        WatchlistScopeFactory::new(db.clone()),
        ConsumerConfig::default(),
    )
    .with_events(tx)
    .spawn()
    .await?;

    let publisher = Arc::new(EventPublisher::new(broker.clone(), QueueSpec::default()));
    let relay = OutboxRelay::new(db.clone(), publisher.clone(), RelayConfig::default());
    let users = UserService::new(db.clone());

    let ada = users.register("ada", "ada@example.com").await?;
    users.register("grace", "grace@example.com").await?;
    relay.drain_once().await?;

    // The broker may deliver the same event again
    publisher.publish(&DomainEvent::user_created(ada.id)).await?;

    let mut handled = 0;
    while handled < 3 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .context("Timed out waiting for the consumer")??;
        if let ConsumerEvent::Handled {
            disposition,
            user_id,
            ..
        } = event
        {
            handled += 1;
            match user_id {
                Some(id) => println!("{} UserCreated for {}", disposition, id),
                None => println!("{} undecodable message", disposition),
            }
        }
    }

    consumer.stop();
    join.await?;
    publisher.close().await?;
    broker.shutdown().await;

    let watchlists = WatchlistService::new(db).count().await?;
    println!(
        "{} events handled, {} watchlists ({} acked)",
        handled,
        watchlists,
        consumer.stats().acked
    );
    if watchlists != 2 {
        bail!("expected 2 watchlists, found {}", watchlists);
    }
    Ok(())
}
