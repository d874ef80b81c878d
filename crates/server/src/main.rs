mod bootstrap;
mod calls;
mod health;
mod notify;

use std::time::Duration;

use anyhow::Result;
use frontdesk_core::config::{AppConfig, LoadOptions};
use tower_http::trace::TraceLayer;

fn init_logging(config: &AppConfig) {
    use frontdesk_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = calls::router(calls::CallsState::new(
        app.registry.clone(),
        app.transport.clone(),
        app.audit.clone(),
    ))
    .merge(health::router(health::HealthState::new(app.db_pool.clone(), app.registry.clone())))
    .layer(TraceLayer::new_for_http());

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        practice = %app.config.practice.name,
        "frontdesk-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    drain_live_sessions(&app, grace).await;
    app.db_pool.close().await;
    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "frontdesk-server stopped"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(event_name = "system.server.signal_failed", error = %error);
    }
    tracing::info!(event_name = "system.server.stopping", correlation_id = "shutdown");
}

/// Gives in-flight calls a bounded window to seal before the pool closes.
async fn drain_live_sessions(app: &bootstrap::Application, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let live = app.registry.live_sessions().await;
        if live == 0 {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(
                event_name = "system.server.sessions_abandoned_at_shutdown",
                correlation_id = "shutdown",
                live_sessions = live,
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
