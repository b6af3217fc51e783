//! Raffle pipeline daemon.
//!
//! Wires the `PostgreSQL` entry store and change feed, the RedPanda topic
//! and the HTTP entry API into one process:
//!
//! ```text
//! GET /raffle ──► entries ──► entry_changes ──► Relay ──► topic ──► WinnerConsumer ──► entries.winner
//! ```
//!
//! Shutdown on Ctrl+C or SIGTERM stops the HTTP server first, then signals
//! the workers and waits up to `SHUTDOWN_TIMEOUT_SECS` for them to finish
//! their current batch.

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use raffle_core::environment::SystemClock;
use raffle_core::topic::TopicSpec;
use raffle_postgres::{PostgresChangeStream, PostgresEntryStore, PostgresPoisonQueue};
use raffle_redpanda::{RedpandaAdmin, RedpandaConfig, RedpandaConsumer, RedpandaProducer, StaticBrokers};
use raffle_runtime::metrics::MetricsServer;
use raffle_runtime::{BootstrappingProducer, ConsumerConfig, Relay, RelayConfig, WinnerConsumer};
use raffle_web::AppState;
use raffled::config::{Config, RedpandaSettings};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the relay's change stream checkpoint.
const RELAY_STREAM: &str = "relay";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "raffled=info,raffle_runtime=info,raffle_web=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting raffle pipeline");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        topic = %config.redpanda.topic,
        partitions = config.redpanda.partitions,
        consumer_group = %config.redpanda.consumer_group,
        strategy = %config.consumer.decision_strategy,
        "Configuration loaded"
    );

    // Metrics recorder, installed before any worker records
    let mut metrics = MetricsServer::new(config.server.metrics_address());
    metrics.start().context("Failed to start metrics")?;
    let metrics = Arc::new(metrics);

    // PostgreSQL: entry store, change feed, poison queue
    info!("Connecting to PostgreSQL...");
    let store = PostgresEntryStore::connect(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    raffle_postgres::migrate(store.pool())
        .await
        .context("Failed to run migrations")?;
    let pool = store.pool().clone();
    let store = Arc::new(store);
    info!("PostgreSQL ready");

    // RedPanda: topic bootstrap, producer, consumer
    info!(brokers = %config.redpanda.brokers, "Connecting to RedPanda...");
    let redpanda = redpanda_config(&config.redpanda).await?;
    let spec = TopicSpec::new(config.redpanda.topic.clone())
        .with_partitions(config.redpanda.partitions)
        .with_replication(config.redpanda.replication);
    let producer = Arc::new(
        BootstrappingProducer::new(
            Arc::new(RedpandaProducer::new(&redpanda)?),
            Arc::new(RedpandaAdmin::new(&redpanda)?),
            spec,
        )
        .with_retry_policy(config.relay.retry_policy.clone()),
    );
    // The consumer subscribes to the topic, so it has to exist first
    let status = producer.ensure_ready().await.context("Failed to bootstrap topic")?;
    info!(topic = %config.redpanda.topic, ?status, "Topic ready");

    let topic_consumer = RedpandaConsumer::new(
        &redpanda,
        &config.redpanda.consumer_group,
        &[config.redpanda.topic.as_str()],
    )?;

    let relay = Relay::new(
        Arc::new(PostgresChangeStream::new(pool.clone(), RELAY_STREAM)),
        Arc::clone(&producer) as _,
        RelayConfig::new(config.redpanda.topic.clone())
            .with_batch_size(config.relay.batch_size)
            .with_poll_interval(config.relay.poll_interval)
            .with_retry_delay(config.relay.retry_delay)
            .with_append_timeout(config.relay.append_timeout)
            .with_retry_policy(config.relay.retry_policy.clone()),
    );

    let consumer = WinnerConsumer::new(
        Arc::new(topic_consumer),
        Arc::clone(&store) as _,
        config
            .consumer
            .decision_strategy
            .build(config.consumer.win_probability),
        Arc::new(PostgresPoisonQueue::new(pool)),
        ConsumerConfig::default()
            .with_max_batch_size(config.consumer.batch_size)
            .with_poll_timeout(config.consumer.poll_timeout)
            .with_concurrency(config.consumer.concurrency)
            .with_retry_delay(config.consumer.retry_delay)
            .with_retry_policy(config.consumer.retry_policy.clone()),
    );

    // Workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = vec![
        tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { relay.run(shutdown).await }
        }),
        tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { consumer.run(shutdown).await }
        }),
        tokio::spawn(serve_metrics(Arc::clone(&metrics), shutdown_rx)),
    ];
    info!("Relay and winner consumer started");

    // HTTP entry API
    let app = raffle_web::router(AppState::new(store, Arc::new(SystemClock)));
    let addr = config.server.bind_address();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, stopping workers");
    let _ = shutdown_tx.send(true);

    let drain = join_workers(workers);
    match tokio::time::timeout(config.server.shutdown_timeout, drain).await {
        Ok(()) => info!("Workers stopped"),
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout.as_secs(),
            "Workers did not stop in time, exiting anyway"
        ),
    }

    producer.reset().await;
    info!("Shutdown complete");
    Ok(())
}

/// Build the client configuration, resolving brokers from the configured list.
async fn redpanda_config(settings: &RedpandaSettings) -> anyhow::Result<RedpandaConfig> {
    let mut builder = RedpandaConfig::builder().timeout(settings.timeout);
    if let Some(protocol) = &settings.security_protocol {
        builder = builder.security_protocol(protocol.clone());
    }
    if let (Some(username), Some(password)) = (&settings.sasl_username, &settings.sasl_password) {
        let mechanism = settings.sasl_mechanism.clone().unwrap_or_else(|| "PLAIN".to_string());
        builder = builder.sasl(mechanism, username.clone(), password.clone());
    }

    let config = builder
        .discover(&StaticBrokers::from_csv(&settings.brokers))
        .await
        .context("Invalid RedPanda configuration")?;
    Ok(config)
}

/// Serve the Prometheus scrape endpoint until shutdown.
async fn serve_metrics(metrics: Arc<MetricsServer>, mut shutdown: watch::Receiver<bool>) {
    let addr = metrics.addr();
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move { metrics.render().unwrap_or_default() }
        }),
    );

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics endpoint");
            return;
        }
    };
    info!(%addr, "Metrics endpoint listening");

    let stopped = async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stopped).await {
        error!(error = %e, "Metrics endpoint failed");
    }
}

/// Wait for every worker task, logging the ones that panicked.
async fn join_workers(workers: Vec<tokio::task::JoinHandle<()>>) {
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Worker task failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
