//! Service entry point: load configuration, wire components, serve the
//! Control API, and shut down gracefully.

use cronmill::api;
use cronmill::config::AppConfig;
use cronmill::executor::Executor;
use cronmill::fetcher::HttpFetcher;
use cronmill::mailer::SmtpMailer;
use cronmill::observability;
use cronmill::scheduler::Scheduler;
use cronmill::state::AppState;
use cronmill::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let _log_guard = observability::init(&config)?;

    tracing::info!("starting cronmill");

    let config = Arc::new(config);
    let store = Arc::new(Store::load(&config.job_storage_path).await?);

    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
        config.api_fetch_timeout,
    )));
    let mailer = Arc::new(SmtpMailer::new(&config)?);
    let executor = Arc::new(Executor::new(fetcher, mailer, &config));
    let scheduler = Arc::new(Scheduler::new(executor, Arc::clone(&store)));

    scheduler.load_all().await;
    scheduler.start();

    let state = AppState {
        config: Arc::clone(&config),
        store,
        scheduler: Arc::clone(&scheduler),
    };

    let app = api::router()
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, waiting for in-flight job runs");
    scheduler.stop(Duration::from_secs(30)).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
