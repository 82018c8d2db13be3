use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use outbox_relay::app::{AppServices, build_app};
use outbox_relay::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    outbox_observability::init();

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    tracing::info!(machine_id = %config.machine_id, http_addr = %config.http_addr, "starting outbox relay");

    let services = Arc::new(AppServices::from_config(&config).await?);

    let cancel = CancellationToken::new();
    let (errors_tx, errors_rx) = mpsc::channel(config.error_buffer);
    let error_logger = outbox_relay::spawn_error_logger(errors_rx);
    let dispatcher = services
        .run_dispatcher(config.dispatcher.clone(), &config.machine_id, errors_tx, cancel.clone())
        .context("failed to start dispatcher")?;

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let shutdown = cancel.clone();
    axum::serve(listener, build_app(services))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("ctrl-c received, shutting down"),
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
        .await
        .context("http server failed")?;

    cancel.cancel();
    dispatcher.join().await.context("dispatcher task panicked")?;
    let _ = outbox_relay::join_logged("error-logger", error_logger).await;

    tracing::info!("outbox relay stopped");
    Ok(())
}
