//! mlplane coordinator binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use mlplane_coordinator::{api, config, server::AgentServer, state::AppState};
use mlplane_events::ModelEventHub;
use mlplane_state::{MemoryStore, PassiveScheduler};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to MLPLANE_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting mlplane coordinator");
    info!(
        listen_addr = %config.listen_addr,
        send_timeout_ms = config.send_timeout.as_millis() as u64,
        command_buffer = config.command_buffer,
        event_buffer = config.event_buffer,
        "Configuration loaded"
    );

    let events = Arc::new(ModelEventHub::new());
    let store = Arc::new(MemoryStore::with_events(events.clone()));
    let scheduler = Arc::new(PassiveScheduler::new(events.clone()));
    let server = AgentServer::new(store, scheduler, config.agent_server_options());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = server.dispatcher(events.as_ref());
    let dispatcher_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { dispatcher.run(shutdown_rx).await }
    });

    let app = api::create_router(AppState::new(server.clone(), events.clone()));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Replica streams are long-lived, so close them before waiting on
    // anything else.
    server.close_all().await;
    let _ = shutdown_tx.send(true);
    events.close();

    match tokio::time::timeout(config.shutdown_timeout, dispatcher_handle).await {
        Ok(Ok(dispatched)) => info!(dispatched, "Sync dispatcher stopped"),
        Ok(Err(e)) => error!(error = %e, "Sync dispatcher task panicked"),
        Err(_) => warn!("Sync dispatcher did not shut down in time"),
    }

    info!("Coordinator shutdown complete");
    Ok(())
}
