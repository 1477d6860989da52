use std::sync::Arc;

use leaderboard::config::ServiceConfig;
use leaderboard::coordinator::Leaderboard;
use leaderboard::metrics::ServiceMetrics;
use leaderboard::router::create_router;
use leaderboard::state::AppState;
use leaderboard::store::{MemoryStore, RedisStore, ScoreStore};
use leaderboard::SERVICE_VERSION;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        version = SERVICE_VERSION,
        leaderboard = %config.leaderboard_id,
        top_k = config.leaderboard.top_k,
        score_mode = %config.leaderboard.score_mode,
        ranking_source = %config.leaderboard.ranking_source,
        "Starting leaderboard service"
    );

    let metrics = Arc::new(ServiceMetrics::new());
    let store: Arc<dyn ScoreStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisStore::connect(url).await?),
        None => {
            warn!("REDIS_URL not set; scores are kept in process memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let leaderboard = Leaderboard::new(
        config.leaderboard_id.clone(),
        config.leaderboard.clone(),
        store,
        metrics.clone(),
    );
    let state = AppState::new(leaderboard.clone(), config.rate_limit.clone(), metrics);
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(leaderboard))
        .await?;

    info!("Leaderboard service stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM, after closing every viewer connection so
/// the server can drain.
async fn shutdown_signal(leaderboard: Leaderboard) {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    leaderboard.shutdown().await;
}
