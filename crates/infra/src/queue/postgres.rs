//! Postgres-backed queue store.
//!
//! ## Concurrency
//!
//! | Operation | Guard |
//! |-----------|-------|
//! | `create` | `INSERT .. ON CONFLICT (request_id) DO NOTHING`, then read back |
//! | `mark_started` | `UPDATE .. WHERE status = 'pending'` |
//! | `update_progress` | `UPDATE .. WHERE progress_percent <= $new` on non-terminal rows |
//! | `mark_completed` / `mark_failed` | `UPDATE .. WHERE status = 'in_progress'` |
//!
//! When a guarded update touches no row, the current row is read to tell
//! "already there" apart from "not allowed" and "missing". No advisory locks
//! are taken; the row-level guards are the compare-and-set.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use coachgen_ai::GenerationParams;
use coachgen_core::{RequestId, UserId};

use super::store::{Enqueued, QueueStore, QueueStoreError};
use super::types::{ProgressWrite, QueueEntry, QueueStatus, Transition};

const MIGRATION: &str = include_str!("../../migrations/0001_generation_queue.sql");

const COLUMNS: &str = "request_id, user_id, status, progress_percent, current_phase, context, \
     result_ref, error_message, last_attempt_error, created_at, updated_at";

/// Postgres-backed queue store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: Arc<PgPool>,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the `generation_queue` schema (idempotent).
    pub async fn migrate(&self) -> Result<(), QueueStoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn status_of(&self, request_id: &RequestId) -> Result<QueueStatus, QueueStoreError> {
        let row = sqlx::query("SELECT status FROM generation_queue WHERE request_id = $1")
            .bind(request_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("status_of", e))?
            .ok_or_else(|| QueueStoreError::NotFound(request_id.clone()))?;
        let raw: String = row
            .try_get("status")
            .map_err(|e| map_sqlx_error("status_of", e))?;
        QueueStatus::parse(&raw)
            .ok_or_else(|| QueueStoreError::Storage(format!("unknown status {raw:?}")))
    }

    /// Run a guarded terminal update; on a miss, classify from the current row.
    async fn finish(
        &self,
        request_id: &RequestId,
        target: QueueStatus,
        sql: &'static str,
        value: &str,
    ) -> Result<Transition, QueueStoreError> {
        let hit = sqlx::query(sql)
            .bind(request_id.as_str())
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(target.as_str(), e))?;
        if hit.is_some() {
            return Ok(Transition::Applied);
        }
        match self.status_of(request_id).await? {
            current if current == target => Ok(Transition::Unchanged),
            from => Err(QueueStoreError::InvalidTransition {
                request_id: request_id.clone(),
                from,
                to: target,
            }),
        }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    #[instrument(skip(self, context), fields(request_id = %request_id), err)]
    async fn create(
        &self,
        request_id: &RequestId,
        user_id: UserId,
        context: GenerationParams,
    ) -> Result<Enqueued, QueueStoreError> {
        let context = serde_json::to_value(&context)
            .map_err(|e| QueueStoreError::Storage(format!("failed to encode context: {e}")))?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO generation_queue
                (request_id, user_id, status, progress_percent, current_phase, context)
            VALUES ($1, $2, 'pending', 0, 'queued', $3)
            ON CONFLICT (request_id) DO NOTHING
            RETURNING {COLUMNS}
            "#
        ))
        .bind(request_id.as_str())
        .bind(user_id.as_uuid())
        .bind(&context)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        if let Some(row) = inserted {
            return Ok(Enqueued {
                entry: QueueEntry::try_from(QueueRow::from_row(&row)?)?,
                created: true,
            });
        }

        // Lost the race (or a redelivery): first writer wins, return its row.
        let entry = self
            .get_by_request_id(request_id)
            .await?
            .ok_or_else(|| QueueStoreError::Storage("entry vanished after conflict".into()))?;
        Ok(Enqueued {
            entry,
            created: false,
        })
    }

    #[instrument(skip(self), fields(request_id = %request_id), err)]
    async fn get_by_request_id(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<QueueEntry>, QueueStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM generation_queue WHERE request_id = $1"
        ))
        .bind(request_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_by_request_id", e))?;

        row.map(|r| QueueRow::from_row(&r).and_then(QueueEntry::try_from))
            .transpose()
    }

    #[instrument(skip(self), fields(request_id = %request_id), err)]
    async fn mark_started(&self, request_id: &RequestId) -> Result<Transition, QueueStoreError> {
        let hit = sqlx::query(
            r#"
            UPDATE generation_queue
            SET status = 'in_progress', current_phase = 'starting', updated_at = now()
            WHERE request_id = $1 AND status = 'pending'
            RETURNING request_id
            "#,
        )
        .bind(request_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_started", e))?;

        if hit.is_some() {
            return Ok(Transition::Applied);
        }
        self.status_of(request_id).await?;
        Ok(Transition::Unchanged)
    }

    #[instrument(skip(self), fields(request_id = %request_id), err)]
    async fn update_progress(
        &self,
        request_id: &RequestId,
        percent: u8,
        phase: &str,
    ) -> Result<ProgressWrite, QueueStoreError> {
        let percent = i16::from(percent.min(100));
        let hit = sqlx::query(
            r#"
            UPDATE generation_queue
            SET progress_percent = $2, current_phase = $3, updated_at = now()
            WHERE request_id = $1
              AND progress_percent <= $2
              AND status IN ('pending', 'in_progress')
            RETURNING request_id
            "#,
        )
        .bind(request_id.as_str())
        .bind(percent)
        .bind(phase)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_progress", e))?;

        if hit.is_some() {
            return Ok(ProgressWrite::Applied);
        }
        if self.status_of(request_id).await?.is_terminal() {
            Ok(ProgressWrite::Terminal)
        } else {
            Ok(ProgressWrite::Stale)
        }
    }

    #[instrument(skip(self, message), fields(request_id = %request_id), err)]
    async fn record_retry(
        &self,
        request_id: &RequestId,
        message: &str,
    ) -> Result<Transition, QueueStoreError> {
        let hit = sqlx::query(
            r#"
            UPDATE generation_queue
            SET last_attempt_error = $2, current_phase = 'retrying', updated_at = now()
            WHERE request_id = $1 AND status IN ('pending', 'in_progress')
            RETURNING request_id
            "#,
        )
        .bind(request_id.as_str())
        .bind(message)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_retry", e))?;

        if hit.is_some() {
            return Ok(Transition::Applied);
        }
        self.status_of(request_id).await?;
        Ok(Transition::Unchanged)
    }

    #[instrument(skip(self), fields(request_id = %request_id), err)]
    async fn mark_completed(
        &self,
        request_id: &RequestId,
        result_ref: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.finish(
            request_id,
            QueueStatus::Completed,
            r#"
            UPDATE generation_queue
            SET status = 'completed', progress_percent = 100, current_phase = 'complete',
                result_ref = $2, updated_at = now()
            WHERE request_id = $1 AND status = 'in_progress'
            RETURNING request_id
            "#,
            result_ref,
        )
        .await
    }

    #[instrument(skip(self, error_message), fields(request_id = %request_id), err)]
    async fn mark_failed(
        &self,
        request_id: &RequestId,
        error_message: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.finish(
            request_id,
            QueueStatus::Failed,
            r#"
            UPDATE generation_queue
            SET status = 'failed', current_phase = 'error', error_message = $2, updated_at = now()
            WHERE request_id = $1 AND status = 'in_progress'
            RETURNING request_id
            "#,
            error_message,
        )
        .await
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueStoreError {
    match err {
        sqlx::Error::Database(db_err) => QueueStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            QueueStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => QueueStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

// SQLx row type

#[derive(Debug)]
struct QueueRow {
    request_id: String,
    user_id: uuid::Uuid,
    status: String,
    progress_percent: i16,
    current_phase: String,
    context: serde_json::Value,
    result_ref: Option<String>,
    error_message: Option<String>,
    last_attempt_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl QueueRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, QueueStoreError> {
        let get = |e: sqlx::Error| map_sqlx_error("decode_row", e);
        Ok(QueueRow {
            request_id: row.try_get("request_id").map_err(get)?,
            user_id: row.try_get("user_id").map_err(get)?,
            status: row.try_get("status").map_err(get)?,
            progress_percent: row.try_get("progress_percent").map_err(get)?,
            current_phase: row.try_get("current_phase").map_err(get)?,
            context: row.try_get("context").map_err(get)?,
            result_ref: row.try_get("result_ref").map_err(get)?,
            error_message: row.try_get("error_message").map_err(get)?,
            last_attempt_error: row.try_get("last_attempt_error").map_err(get)?,
            created_at: row.try_get("created_at").map_err(get)?,
            updated_at: row.try_get("updated_at").map_err(get)?,
        })
    }
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = QueueStoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let request_id = RequestId::parse(row.request_id)
            .map_err(|e| QueueStoreError::Storage(format!("stored request id: {e}")))?;
        let status = QueueStatus::parse(&row.status)
            .ok_or_else(|| QueueStoreError::Storage(format!("unknown status {:?}", row.status)))?;
        let context: GenerationParams = serde_json::from_value(row.context)
            .map_err(|e| QueueStoreError::Storage(format!("stored context: {e}")))?;

        Ok(QueueEntry {
            request_id,
            user_id: UserId::from_uuid(row.user_id),
            status,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            current_phase: row.current_phase,
            context,
            result_ref: row.result_ref,
            error_message: row.error_message,
            last_attempt_error: row.last_attempt_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
