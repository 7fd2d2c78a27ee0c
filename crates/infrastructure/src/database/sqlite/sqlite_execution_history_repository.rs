use std::str::FromStr;

use async_trait::async_trait;
use orchestrator_domain::{ExecutionHistory, ExecutionHistoryRepository, ExecutionStatus};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT id, schedule_id, started_at, completed_at, status, \
    records_processed, error_message, execution_details, attempts FROM execution_history";

pub struct SqliteExecutionHistoryRepository {
    pool: SqlitePool,
}

impl SqliteExecutionHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_history(row: &sqlx::sqlite::SqliteRow) -> OrchestratorResult<ExecutionHistory> {
        let id: String = row.try_get("id")?;
        let schedule_id: String = row.try_get("schedule_id")?;
        let status: String = row.try_get("status")?;
        let details: String = row.try_get("execution_details")?;

        Ok(ExecutionHistory {
            id: Uuid::parse_str(&id)?,
            schedule_id: Uuid::parse_str(&schedule_id)?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            status: ExecutionStatus::from_str(&status)?,
            records_processed: row.try_get::<i64, _>("records_processed")? as u64,
            error_message: row.try_get("error_message")?,
            execution_details: serde_json::from_str(&details)?,
            attempts: row.try_get::<i64, _>("attempts")? as u32,
        })
    }
}

#[async_trait]
impl ExecutionHistoryRepository for SqliteExecutionHistoryRepository {
    #[instrument(skip(self, history), fields(execution_id = %history.id, schedule_id = %history.schedule_id))]
    async fn create(&self, history: &ExecutionHistory) -> OrchestratorResult<ExecutionHistory> {
        sqlx::query(
            r#"
            INSERT INTO execution_history (id, schedule_id, started_at, completed_at, status,
                records_processed, error_message, execution_details, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(history.id.to_string())
        .bind(history.schedule_id.to_string())
        .bind(history.started_at)
        .bind(history.completed_at)
        .bind(history.status.as_str())
        .bind(history.records_processed as i64)
        .bind(&history.error_message)
        .bind(serde_json::to_string(&history.execution_details)?)
        .bind(history.attempts as i64)
        .execute(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;
        Ok(history.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> OrchestratorResult<Option<ExecutionHistory>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_history(&row)?)),
            None => Ok(None),
        }
    }

    /// 已终结的记录不允许再改写
    #[instrument(skip(self, history), fields(execution_id = %history.id, status = %history.status))]
    async fn update(&self, history: &ExecutionHistory) -> OrchestratorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE execution_history
            SET completed_at = $2, status = $3, records_processed = $4, error_message = $5,
                execution_details = $6, attempts = $7
            WHERE id = $1 AND status IN ('STARTED', 'IN_PROGRESS')
            "#,
        )
        .bind(history.id.to_string())
        .bind(history.completed_at)
        .bind(history.status.as_str())
        .bind(history.records_processed as i64)
        .bind(&history.error_message)
        .bind(serde_json::to_string(&history.execution_details)?)
        .bind(history.attempts as i64)
        .execute(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(history.id).await? {
                Some(existing) => Err(OrchestratorError::InvalidTransition {
                    entity: "ExecutionHistory",
                    id: history.id,
                    from: existing.status.to_string(),
                    to: history.status.to_string(),
                }),
                None => Err(OrchestratorError::ExecutionNotFound { id: history.id }),
            };
        }
        Ok(())
    }

    async fn list_by_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Vec<ExecutionHistory>> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} WHERE schedule_id = $1"))
            .bind(schedule_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;
        let mut found = rows
            .iter()
            .map(Self::row_to_history)
            .collect::<OrchestratorResult<Vec<_>>>()?;
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(found)
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> OrchestratorResult<Vec<ExecutionHistory>> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} WHERE status = $1"))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;
        let mut found = rows
            .iter()
            .map(Self::row_to_history)
            .collect::<OrchestratorResult<Vec<_>>>()?;
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(found)
    }
}
