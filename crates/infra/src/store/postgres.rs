//! Postgres-backed record store.
//!
//! Schema lives in `sql/outbox_records.sql`. Applying it is left to the
//! deployment's own migration tooling.
//!
//! ## Claim Atomicity
//!
//! `claim_pending_records` is one conditional `UPDATE`:
//!
//! ```sql
//! UPDATE outbox_records SET lock_owner = $1, locked_on = $2
//! WHERE state = 'pending_delivery' AND lock_owner IS NULL
//! ```
//!
//! Under `READ COMMITTED`, a row updated concurrently by another instance is
//! re-evaluated against the `WHERE` clause after that transaction commits, so
//! it no longer matches and the second instance skips it.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (check constraint violation) | `23514` | `Corrupt` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / other | N/A | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

use outbox_core::{Claim, Header, Message, Record, RecordId, RecordState};

use super::{RecordStats, RecordStore, StoreError, StoreResult};

const SELECT_COLUMNS: &str = r#"
    id, topic, message_key, headers, body, state, created_on,
    lock_owner, locked_on, processed_on, attempt_count, last_attempt_on, last_error
"#;

/// Postgres-backed record store.
///
/// `Tx = PgConnection`, so `add_record_tx` joins any open transaction:
///
/// ```ignore
/// let mut tx = pool.begin().await?;
/// sqlx::query("INSERT INTO orders ...").execute(&mut *tx).await?;
/// publisher.send(message, &mut *tx).await?;
/// tx.commit().await?;
/// ```
#[derive(Debug, Clone)]
pub struct PostgresRecordStore {
    pool: Arc<PgPool>,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_where_id(&self, id: RecordId) -> StoreResult<Option<Record>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM outbox_records WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_record", e))?;

        row.map(|r| RecordRow::from_row(&r).and_then(Record::try_from))
            .transpose()
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    type Tx = PgConnection;

    #[instrument(skip(self, record, tx), fields(record_id = %record.id, topic = %record.message.topic), err)]
    async fn add_record_tx(&self, record: &Record, tx: &mut Self::Tx) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_records (
                id, topic, message_key, headers, body, state, created_on,
                lock_owner, locked_on, processed_on, attempt_count, last_attempt_on, last_error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.message.topic)
        .bind(&record.message.key)
        .bind(Json(&record.message.headers))
        .bind(&record.message.body)
        .bind(record.state.as_str())
        .bind(record.created_on)
        .bind(record.lock_owner())
        .bind(record.locked_on())
        .bind(record.processed_on)
        .bind(attempt_count_to_db(record.attempt_count)?)
        .bind(record.last_attempt_on)
        .bind(record.last_error.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("add_record_tx", e))?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn claim_pending_records(&self, owner: &str, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET lock_owner = $1, locked_on = $2
            WHERE state = 'pending_delivery' AND lock_owner IS NULL
            "#,
        )
        .bind(owner)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_pending_records", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn fetch_claimed_records(&self, owner: &str) -> StoreResult<Vec<Record>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_records WHERE lock_owner = $1 ORDER BY created_on ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(owner)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_claimed_records", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(Record::try_from(RecordRow::from_row(&row)?)?);
        }
        Ok(records)
    }

    #[instrument(skip(self, record), fields(record_id = %record.id, state = %record.state), err)]
    async fn update_record(&self, record: &Record) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET state = $2,
                lock_owner = $3,
                locked_on = $4,
                processed_on = $5,
                attempt_count = $6,
                last_attempt_on = $7,
                last_error = $8
            WHERE id = $1 AND state = 'pending_delivery'
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.state.as_str())
        .bind(record.lock_owner())
        .bind(record.locked_on())
        .bind(record.processed_on)
        .bind(attempt_count_to_db(record.attempt_count)?)
        .bind(record.last_attempt_on)
        .bind(record.last_error.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_record", e))?;

        if result.rows_affected() == 0 {
            // Either gone or already terminal.
            return match self.load_where_id(record.id).await? {
                Some(_) => Err(StoreError::Conflict(record.id)),
                None => Err(StoreError::NotFound(record.id)),
            };
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn release_claims_by_owner(&self, owner: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE outbox_records SET lock_owner = NULL, locked_on = NULL WHERE lock_owner = $1",
        )
        .bind(owner)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_claims_by_owner", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn release_claims_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE outbox_records SET lock_owner = NULL, locked_on = NULL WHERE locked_on < $1",
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_claims_older_than", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn delete_records_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_records
            WHERE created_on < $1 AND state IN ('delivered', 'max_attempts_reached')
            "#,
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_records_older_than", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    async fn get_record(&self, id: RecordId) -> StoreResult<Option<Record>> {
        self.load_where_id(id).await
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> StoreResult<RecordStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'pending_delivery') AS pending,
                COUNT(*) FILTER (WHERE state = 'pending_delivery' AND lock_owner IS NOT NULL) AS claimed,
                COUNT(*) FILTER (WHERE state = 'delivered') AS delivered,
                COUNT(*) FILTER (WHERE state = 'max_attempts_reached') AS max_attempts_reached
            FROM outbox_records
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let count = |col: &str| -> StoreResult<u64> {
            let n: i64 = row
                .try_get(col)
                .map_err(|e| StoreError::Corrupt(format!("failed to read {col}: {e}")))?;
            Ok(n.max(0) as u64)
        };

        Ok(RecordStats {
            pending: count("pending")?,
            claimed: count("claimed")?,
            delivered: count("delivered")?,
            max_attempts_reached: count("max_attempts_reached")?,
        })
    }
}

fn attempt_count_to_db(count: u32) -> StoreResult<i32> {
    i32::try_from(count).map_err(|_| StoreError::Corrupt(format!("attempt_count {count} overflows")))
}

/// Map SQLx errors to `StoreError` with operation context.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct RecordRow {
    id: uuid::Uuid,
    topic: String,
    message_key: String,
    headers: Json<Vec<Header>>,
    body: Vec<u8>,
    state: String,
    created_on: DateTime<Utc>,
    lock_owner: Option<String>,
    locked_on: Option<DateTime<Utc>>,
    processed_on: Option<DateTime<Utc>>,
    attempt_count: i32,
    last_attempt_on: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl RecordRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Self> {
        let read = |e: sqlx::Error| StoreError::Corrupt(format!("failed to read record row: {e}"));
        Ok(RecordRow {
            id: row.try_get("id").map_err(read)?,
            topic: row.try_get("topic").map_err(read)?,
            message_key: row.try_get("message_key").map_err(read)?,
            headers: row.try_get("headers").map_err(read)?,
            body: row.try_get("body").map_err(read)?,
            state: row.try_get("state").map_err(read)?,
            created_on: row.try_get("created_on").map_err(read)?,
            lock_owner: row.try_get("lock_owner").map_err(read)?,
            locked_on: row.try_get("locked_on").map_err(read)?,
            processed_on: row.try_get("processed_on").map_err(read)?,
            attempt_count: row.try_get("attempt_count").map_err(read)?,
            last_attempt_on: row.try_get("last_attempt_on").map_err(read)?,
            last_error: row.try_get("last_error").map_err(read)?,
        })
    }
}

impl TryFrom<RecordRow> for Record {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let id = RecordId::from_uuid(row.id);
        let claim = match (row.lock_owner, row.locked_on) {
            (Some(owner), Some(locked_on)) => Some(Claim { owner, locked_on }),
            (None, None) => None,
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "record {id} has a partial claim"
                )));
            }
        };

        Ok(Record {
            id,
            message: Message {
                key: row.message_key,
                headers: row.headers.0,
                body: row.body,
                topic: row.topic,
            },
            state: row.state.parse::<RecordState>()?,
            created_on: row.created_on,
            claim,
            processed_on: row.processed_on,
            attempt_count: u32::try_from(row.attempt_count)
                .map_err(|_| StoreError::Corrupt(format!("record {id} has a negative attempt_count")))?,
            last_attempt_on: row.last_attempt_on,
            last_error: row.last_error,
        })
    }
}
