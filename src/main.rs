use anyhow::{Context, Result};
use axum::Router;
use stash::{
    config::AppConfig,
    db,
    handlers::AppState,
    providers::{aliyun::StsClient, qiniu::QiniuProvider},
    repository::{ObjectRepository, SqliteObjectRepository},
    routes,
    services::{
        callback_service::{CallbackService, UnverifiedTokens},
        object_service::ObjectService,
    },
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting stash on {} (debug: {}, database: {})",
        cfg.addr(),
        cfg.debug,
        cfg.database.url
    );

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database)
        .await
        .with_context(|| format!("connecting to {}", cfg.database.url))?;
    db::run_migrations(&pool).await.context("applying schema")?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize services ---
    let repo: Arc<dyn ObjectRepository> = Arc::new(SqliteObjectRepository::new(Arc::new(pool)));
    let sts = StsClient::new(&cfg.aliyun).context("building STS client")?;
    let objects = ObjectService::new(
        repo.clone(),
        QiniuProvider::new(cfg.qiniu.clone()),
        Arc::new(sts),
        cfg.aliyun.token_duration,
    );
    let callbacks = CallbackService::new(repo.clone(), Arc::new(UnverifiedTokens));
    let state = AppState {
        objects,
        callbacks,
        repo,
    };

    // --- Build router ---
    let app: Router = routes::routes::app(state, &cfg);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.server.addr.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.server.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
