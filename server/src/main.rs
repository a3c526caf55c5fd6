use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tiergate::{RateLimiter, SystemTimeSource, TimeSource};
use tiergate_server::{Cli, Settings, build_router, logging};

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli).context("loading configuration")?;

    // flushes the log file on drop, keep it for the whole of main
    let _log_guard = logging::init(&settings.logging.dir).with_context(|| {
        format!("opening log directory {}", settings.logging.dir.display())
    })?;

    let clock: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let limiter = Arc::new(RateLimiter::with_time_source(
        settings.limiter_options()?,
        clock,
    ));
    limiter.run_eviction_loop();

    let app = build_router(Arc::clone(&limiter), &settings.cors.allowed_origins);

    let addr = settings.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        per_identifier = settings.rate_limits.per_identifier,
        account = settings.rate_limits.account,
        log_dir = %settings.logging.dir.display(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    limiter.stop_eviction_loop();
    tracing::info!("server shutdown complete");

    Ok(())
}
