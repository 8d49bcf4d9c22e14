use std::sync::Arc;

use anyhow::Context;
use lottery::{
    AutoDrawScheduler, Config, LotteryEngine, NotificationQueue, SqliteStore, TokioSleeper,
    TracingNotifier,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(database = %config.database_url, "starting lottery engine");

    let store = SqliteStore::connect(&config.database_url)
        .await
        .context("failed to open lottery database")?;

    let (notifications, notifier_worker) = NotificationQueue::start(Arc::new(TracingNotifier));
    let engine = LotteryEngine::new(Arc::new(store), notifications, config.engine.clone())
        .with_retry(config.retry, Arc::new(TokioSleeper));

    let scheduler = AutoDrawScheduler::new(engine.clone(), config.draw_check_interval).spawn();

    shutdown_signal().await;
    info!("shutdown requested");

    scheduler.shutdown().await;
    // the worker drains once the last queue handle is gone
    drop(engine);
    notifier_worker.await.context("notification worker panicked")?;

    info!("lottery engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
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
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
