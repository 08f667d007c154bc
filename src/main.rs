use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchyard::analytics::AnalyticsAggregator;
use switchyard::api;
use switchyard::auth::AuthService;
use switchyard::classifier::Classifier;
use switchyard::cloak::CloakingProxy;
use switchyard::config::{Config, DatabaseBackend};
use switchyard::recorder::ClickRecorder;
use switchyard::redirect;
use switchyard::resolver::LinkResolver;
use switchyard::storage::{PostgresStorage, SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(SqliteStorage::new(&config.database.url, config.database.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
    };

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    let classifier = Arc::new(Classifier::from_config(&config.geo)?);
    info!("Geo provider: {}", classifier.provider_name());

    let recorder = Arc::new(ClickRecorder::new(
        Arc::clone(&storage),
        Arc::clone(&classifier),
        &config.recorder,
    ));
    info!(
        workers = config.recorder.workers,
        queue_capacity = config.recorder.queue_capacity,
        "Click recorder started"
    );

    let resolver = Arc::new(LinkResolver::new(
        Arc::clone(&storage),
        Arc::clone(&recorder),
        config.resolver.clone(),
        config.rotation.clone(),
    ));
    let cloak = Arc::new(CloakingProxy::new(&config.cloak)?);
    let aggregator = Arc::new(AnalyticsAggregator::new(Arc::clone(&storage)));
    let auth_service = Arc::new(AuthService::new(&config.auth)?);

    let api_router = api::create_api_router(aggregator, auth_service);
    let redirect_router =
        redirect::create_redirect_router(resolver, cloak, config.client_ip.clone());

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);

    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr).await?;
    info!("🚀 Redirect server listening on http://{}", redirect_addr);

    let (stop_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut api_stop = stop_tx.subscribe();
    let mut redirect_stop = stop_tx.subscribe();

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", err);
        }
        info!("Shutdown signal received");
        let _ = stop_tx.send(());
    });

    tokio::try_join!(
        axum::serve(api_listener, api_router).with_graceful_shutdown(async move {
            let _ = api_stop.recv().await;
        }),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = redirect_stop.recv().await;
        }),
    )?;

    recorder.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
