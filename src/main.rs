//! Parcelhook callback reliability service.
//!
//! Loads configuration, prepares the database, then runs the HTTP server and
//! the retry worker until a shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use parcelhook_api::{build_registry, shutdown_signal, AppState, Config};
use parcelhook_core::{
    storage::{run_migrations, Storage},
    RealClock, RegistryFlow,
};
use parcelhook_retry::{CallbackIngress, PostgresRetryStore, RetryProcessor, RetryWorker};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Grace period for in-flight requests and the current retry batch.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// How long a claimed retry record stays hidden from other workers.
const CLAIM_LEASE: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config);

    info!("Starting parcelhook callback service");
    let server_addr = config.parse_server_addr()?;
    info!(
        database_url = %config.database_url_masked(),
        server_addr = %server_addr,
        max_connections = config.database_max_connections,
        retry_enabled = config.retry_enabled,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    run_migrations(&db_pool).await.context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let storage = Arc::new(Storage::new(db_pool.clone()));
    let registry = Arc::new(build_registry(&config)?);
    let flow = Arc::new(RegistryFlow::new(registry, storage.shipments.clone()));
    let policy = config.to_retry_policy();
    let retry_store = Arc::new(
        PostgresRetryStore::new(storage.callback_retries.clone(), policy.backoff_seconds)
            .with_claim_lease(CLAIM_LEASE),
    );

    let ingress = CallbackIngress::new(storage.shipments.clone(), flow.clone(), policy)
        .with_retry_store(retry_store.clone());
    let state = AppState::new(Arc::new(ingress)).with_storage(storage.clone());

    let cancel = CancellationToken::new();

    let worker_handle = if config.retry_enabled {
        let processor = Arc::new(RetryProcessor::new(
            retry_store,
            storage.shipments.clone(),
            flow,
            policy,
            config.retry_batch_size,
        ));
        let worker = RetryWorker::new(
            processor,
            Arc::new(RealClock::new()),
            Duration::from_secs(config.retry_poll_interval_seconds),
        );
        let token = cancel.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        info!("Retry worker disabled");
        None
    };

    let server_handle = tokio::spawn({
        let request_timeout = Duration::from_secs(config.request_timeout);
        async move {
            if let Err(e) = parcelhook_api::start_server(state, server_addr, request_timeout).await
            {
                error!(error = %e, "Server failed");
            }
        }
    });

    info!(addr = %server_addr, "Parcelhook is ready to receive callbacks");

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");
    cancel.cancel();

    let drain = async {
        let _ = server_handle.await;
        if let Some(handle) = worker_handle {
            let _ = handle.await;
        }
    };
    tokio::select! {
        () = tokio::time::sleep(SHUTDOWN_GRACE) => {
            info!("Shutdown grace period expired");
        },
        () = drain => {
            info!("Server and retry worker stopped");
        },
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("Parcelhook shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured filter.
fn init_tracing(config: &Config) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.rust_log))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
