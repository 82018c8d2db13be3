use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use outbox_broker::InMemoryBroker;
use outbox_core::{Header, Message, RecordId};
use outbox_infra::{
    ConfigError, Dispatcher, DispatcherHandle, DispatcherSettings, InMemoryRecordStore,
    OutboxError, Publisher, RecordStats, RecordStore, StoreError,
};
#[cfg(feature = "redis")]
use outbox_infra::{PostgresRecordStore, broker::RedisStreamsBroker};

use crate::config::RelayConfig;

/// Store + broker wiring for one relay process.
pub enum AppServices {
    /// Dev/test: in-memory store, in-memory broker.
    InMemory {
        store: InMemoryRecordStore,
        broker: Arc<InMemoryBroker>,
        publisher: Publisher<InMemoryRecordStore>,
    },
    #[cfg(feature = "redis")]
    Persistent {
        store: PostgresRecordStore,
        broker: Arc<RedisStreamsBroker>,
        publisher: Publisher<PostgresRecordStore>,
    },
}

impl AppServices {
    pub fn in_memory(broker: Arc<InMemoryBroker>) -> Self {
        let store = InMemoryRecordStore::new();
        AppServices::InMemory {
            publisher: Publisher::new(store.clone()),
            store,
            broker,
        }
    }

    #[cfg(feature = "redis")]
    pub async fn persistent(database_url: &str, redis_url: &str, stream_prefix: Option<String>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let pool = sqlx::PgPool::connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        let store = PostgresRecordStore::new(pool);
        let broker = Arc::new(
            RedisStreamsBroker::new(redis_url, stream_prefix)
                .context("failed to create Redis Streams broker")?,
        );

        Ok(AppServices::Persistent {
            publisher: Publisher::new(store.clone()),
            store,
            broker,
        })
    }

    /// Pick the wiring from configuration.
    pub async fn from_config(config: &RelayConfig) -> anyhow::Result<Self> {
        match &config.database_url {
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory store (records are lost on exit)");
                Ok(Self::in_memory(Arc::new(InMemoryBroker::non_recording())))
            }
            #[cfg(feature = "redis")]
            Some(database_url) => {
                let redis_url = config.redis_url.clone().unwrap_or_else(|| {
                    tracing::warn!("REDIS_URL not set; using redis://localhost:6379");
                    "redis://localhost:6379".to_string()
                });
                Self::persistent(database_url, &redis_url, config.stream_prefix.clone()).await
            }
            #[cfg(not(feature = "redis"))]
            Some(_) => {
                tracing::warn!("DATABASE_URL set but redis feature not enabled, falling back to in-memory");
                Ok(Self::in_memory(Arc::new(InMemoryBroker::non_recording())))
            }
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            AppServices::InMemory { .. } => "in_memory",
            #[cfg(feature = "redis")]
            AppServices::Persistent { .. } => "persistent",
        }
    }

    /// Start a dispatcher over this wiring.
    pub fn run_dispatcher(
        &self,
        settings: DispatcherSettings,
        machine_id: &str,
        errors: mpsc::Sender<OutboxError>,
        cancel: CancellationToken,
    ) -> Result<DispatcherHandle, ConfigError> {
        match self {
            AppServices::InMemory { store, broker, .. } => {
                Ok(Dispatcher::new(store.clone(), broker.clone(), settings, machine_id)?.run(errors, cancel))
            }
            #[cfg(feature = "redis")]
            AppServices::Persistent { store, broker, .. } => {
                Ok(Dispatcher::new(store.clone(), broker.clone(), settings, machine_id)?.run(errors, cancel))
            }
        }
    }

    /// Write one message through a store transaction of its own.
    pub async fn publish(&self, message: Message) -> Result<RecordId, AppError> {
        match self {
            AppServices::InMemory { store, publisher, .. } => {
                let mut tx = store.begin();
                let id = publisher.send(message, &mut tx).await?;
                tx.commit().map_err(OutboxError::Persistence)?;
                Ok(id)
            }
            #[cfg(feature = "redis")]
            AppServices::Persistent { store, publisher, .. } => {
                let mut tx = store.pool().begin().await?;
                let id = publisher.send(message, &mut *tx).await?;
                tx.commit().await?;
                Ok(id)
            }
        }
    }

    pub async fn stats(&self) -> Result<RecordStats, StoreError> {
        match self {
            AppServices::InMemory { store, .. } => store.stats().await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { store, .. } => store.stats().await,
        }
    }
}

/// HTTP-facing error.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub key: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    /// UTF-8 body; stored as raw bytes.
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub id: RecordId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub mode: String,
    #[serde(flatten)]
    pub records: RecordStats,
}

/// Admin router: `GET /health`, `GET /stats`, `POST /messages`.
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/messages", post(publish))
        .layer(Extension(services))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn stats(Extension(services): Extension<Arc<AppServices>>) -> Result<Json<StatsResponse>, AppError> {
    let records = services.stats().await?;
    Ok(Json(StatsResponse {
        mode: services.mode().to_string(),
        records,
    }))
}

async fn publish(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), AppError> {
    if req.topic.trim().is_empty() {
        return Err(AppError::BadRequest("topic cannot be empty".to_string()));
    }

    let message = Message {
        key: req.key,
        headers: req.headers,
        body: req.body.into_bytes(),
        topic: req.topic,
    };
    let id = services.publish(message).await?;

    Ok((StatusCode::CREATED, Json(PublishResponse { id })))
}
