//! ledger_engine - Transactional account ledger service
//!
//! Serves the account API over HTTP, publishes a notification for every
//! committed change and mirrors accounts created upstream.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_engine::publisher::{EventPublisher, LoggingPublisher, OutboxRelay, OutboxRelayConfig};
use ledger_engine::replication::{EventSource, ReplicationListener};
use ledger_engine::store::{PgAccountStore, StoreTimeouts};
use ledger_engine::{api, db, Config, DeliveryMode, Ledger, LedgerOptions};

/// Initialize tracing/logging
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ledger_engine=debug,tower_http=debug".into());

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Broker-facing halves: outbound publisher and inbound replication source
struct Messaging {
    publisher: Arc<dyn EventPublisher>,
    /// `None` without a broker: there is no upstream to mirror
    source: Option<Box<dyn EventSource>>,
}

#[cfg(feature = "kafka")]
fn connect_messaging(config: &Config) -> anyhow::Result<Messaging> {
    use ledger_engine::publisher::KafkaPublisher;
    use ledger_engine::replication::KafkaSource;

    let Some(brokers) = config.kafka_brokers.as_deref() else {
        return Ok(logging_only());
    };

    let publisher = KafkaPublisher::connect(brokers, &config.kafka_client_id)?;
    let source = KafkaSource::subscribe(
        brokers,
        &config.kafka_group_id,
        &config.kafka_client_id,
        &config.replication_topic,
    )
    .map_err(|e| anyhow::anyhow!("Kafka consumer: {}", e))?;

    Ok(Messaging {
        publisher: Arc::new(publisher),
        source: Some(Box::new(source)),
    })
}

#[cfg(not(feature = "kafka"))]
fn connect_messaging(config: &Config) -> anyhow::Result<Messaging> {
    if config.kafka_brokers.is_some() {
        tracing::warn!("KAFKA_BROKERS is set but the binary was built without the `kafka` feature");
    }
    Ok(logging_only())
}

fn logging_only() -> Messaging {
    tracing::info!("No broker configured; events are logged only and replication is disabled");
    Messaging {
        publisher: Arc::new(LoggingPublisher::new()),
        source: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting ledger_engine server");
    tracing::info!("Connecting to database...");

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;

    // Verify database schema
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let store = Arc::new(PgAccountStore::with_timeouts(
        pool.clone(),
        StoreTimeouts {
            lock_timeout: config.lock_timeout,
            statement_timeout: config.statement_timeout,
        },
    ));

    let Messaging { publisher, source } = connect_messaging(&config)?;

    let ledger = Arc::new(Ledger::with_options(
        store.clone(),
        publisher.clone(),
        LedgerOptions {
            delivery: config.event_delivery,
            topics: config.topics.clone(),
            user_list_limit: config.user_list_event_limit,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Outbox relay only has work when events go through the outbox
    let relay_handle = match config.event_delivery {
        DeliveryMode::Outbox => {
            let relay = OutboxRelay::with_config(
                store.clone(),
                publisher.clone(),
                OutboxRelayConfig {
                    poll_interval: config.outbox_poll_interval,
                    batch_size: config.outbox_batch_size,
                },
            );
            Some(relay.start(shutdown_rx.clone()))
        }
        DeliveryMode::Direct => None,
    };

    let replication_handle =
        source.map(|source| ReplicationListener::new(store, source).spawn(shutdown_rx));

    tracing::info!(delivery = %config.event_delivery, "Event delivery configured");
    tracing::info!("Listening on http://{}", addr);

    let app = api::build_app(ledger);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    let _ = shutdown_tx.send(true);

    // The relay flushes the publisher after its final pass
    match relay_handle {
        Some(handle) => {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Outbox relay task failed");
            }
        }
        None => {
            if let Err(e) = publisher.flush().await {
                tracing::error!(error = %e, "Publisher flush on shutdown failed");
            }
        }
    }
    if let Some(handle) = replication_handle {
        match handle.await {
            Ok(stats) => tracing::info!(stats = ?stats, "Replication listener stopped"),
            Err(e) => tracing::error!(error = %e, "Replication listener task failed"),
        }
    }

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
