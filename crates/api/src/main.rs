use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::Handle;

use projectdesk_api::app::{build_app, services};
use projectdesk_infra::{
    artifacts::FsArtifactStore, config::PipelineConfig, projects::InMemoryProjectDirectory,
    schema::PostgresSchema,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("invalid configuration")?;
    projectdesk_observability::init_with(config.log_format);

    let artifacts = Arc::new(FsArtifactStore::new(config.artifact_root.clone()));

    let (stores, pool) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            PostgresSchema::ensure(&pool)
                .await
                .context("failed to create database schema")?;
            (
                services::Stores::postgres(pool.clone(), Handle::current(), artifacts),
                Some(pool),
            )
        }
        None => {
            tracing::warn!(
                "USE_PERSISTENT_STORES not set; jobs, offers and projects are kept in memory \
                 and the project directory starts empty, so every offer fails with \"project not found\""
            );
            (
                services::Stores::in_memory(Arc::new(InMemoryProjectDirectory::new()), artifacts),
                None,
            )
        }
    };

    let (services, executor) = services::build_services(stores, &config);
    let worker = executor.spawn().context("failed to start offer worker")?;

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        artifact_root = %config.artifact_root.display(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    // In-flight HTTP requests are drained; let the worker finish its current job.
    tracing::info!("stopping offer worker");
    tokio::task::spawn_blocking(move || worker.shutdown())
        .await
        .context("offer worker did not stop cleanly")?;

    if let Some(pool) = pool {
        pool.close().await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
