//! Outbox relay daemon: configuration, wiring and the admin HTTP surface.

pub mod app;
pub mod config;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use outbox_infra::OutboxError;

/// Drain the dispatcher error channel into the log. Ends once every sender is gone.
pub fn spawn_error_logger(mut errors: mpsc::Receiver<OutboxError>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            match &err {
                OutboxError::Delivery { record_id, message } => {
                    tracing::warn!(record_id = %record_id, error = %message, "outbox delivery failed");
                }
                other => tracing::error!(error = %other, "outbox dispatcher error"),
            }
        }
    })
}

/// Wait for a background task, logging instead of discarding a panic or abort.
pub async fn join_logged(task: &'static str, handle: JoinHandle<()>) -> Result<(), JoinError> {
    handle.await.inspect_err(|err| {
        tracing::error!(task, error = %err, "background task failed");
    })
}
