use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

mod config;
mod domain;
mod messaging;
mod metrics;
mod outbox;
mod utils;

use config::Config;
use domain::profile::{ProfileService, ProfileUpdate};
use messaging::KafkaPublisher;
use outbox::{Dispatcher, OutboxRecorder, PgOutboxStore};
use utils::{Breaker, BreakerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, overridable with RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,outbox_relay=debug")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!("starting outbox relay");

    // === 1. Postgres pool + schema ===
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    outbox::pg::migrate(&pool).await?;
    domain::profile::migrate(&pool).await?;

    let store = Arc::new(PgOutboxStore::new(pool.clone()));

    // === 2. Metrics + admin endpoints on their own thread ===
    let metrics = Arc::new(metrics::OutboxMetrics::new()?);
    let registry = Arc::new(metrics.registry().clone());
    let admin_store: Arc<dyn outbox::OutboxStore> = store.clone();
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("metrics runtime");
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(registry, admin_store, metrics_port).await
            {
                tracing::error!(error = %e, "metrics server error");
            }
        });
    });

    // === 3. Kafka publisher behind a circuit breaker ===
    let breaker =
        Breaker::new(BreakerConfig::default()).with_gauge(metrics.breaker_state.clone());
    let publisher = Arc::new(KafkaPublisher::new(&config.kafka_brokers, breaker)?);

    // === 4. Outbox dispatcher ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(store, publisher, config.dispatcher(), metrics.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx));

    // === 5. Profile service wired to the recorder ===
    let recorder = OutboxRecorder::new("UserProfile", &config.profile_topic);
    let profiles = ProfileService::new(pool.clone(), recorder);

    // === 6. Demonstrate the full path: mutate + record, dispatcher publishes ===
    let demo_user = Uuid::parse_str("7f1f4aa6-4c2e-4d27-9b09-6a21d1b3f001")?;
    seed_demo_profile(&pool, demo_user).await?;

    let correlation_id = Uuid::new_v4().to_string();
    let updated = profiles
        .update_profile(
            demo_user,
            ProfileUpdate {
                location: Some("Berlin".to_string()),
                bio: Some("updated through the transactional outbox".to_string()),
                ..Default::default()
            },
            &correlation_id,
        )
        .await?;
    tracing::info!(
        user_id = %updated.id,
        location = ?updated.location,
        "demo profile updated, event queued for dispatch"
    );

    let fetched = profiles.get_profile(demo_user).await?;
    tracing::info!(user_id = %fetched.id, updated_at = %fetched.updated_at, "demo profile read back");

    // === 7. Run until interrupted, then drain ===
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping dispatcher");
    let _ = shutdown_tx.send(true);
    dispatcher_handle.await?;
    pool.close().await;

    tracing::info!("outbox relay stopped");
    Ok(())
}

async fn seed_demo_profile(pool: &PgPool, user_id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO user_profiles (id, first_name, last_name, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $4)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(user_id)
    .bind("Demo")
    .bind("User")
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}
