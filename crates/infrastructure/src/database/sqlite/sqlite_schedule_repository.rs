use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_domain::{Schedule, ScheduleFilter, ScheduleRepository, ScheduleStatus};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT id, name, tenant_id, orchestration_id, import_type, \
    schedule_expression, recurring, priority, created_by, status, next_execution, last_execution, \
    execution_count, success_count, failure_count, import_configuration, resource_requirements, \
    lock_requirements, max_retries, retry_delay_seconds, timeout_minutes, is_active, \
    active_execution_id, active_request_id, current_attempt, created_at, updated_at FROM schedules";

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

fn parse_optional_uuid(value: Option<String>) -> OrchestratorResult<Option<Uuid>> {
    value.map(|v| Uuid::parse_str(&v)).transpose().map_err(Into::into)
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &sqlx::sqlite::SqliteRow) -> OrchestratorResult<Schedule> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let priority: i64 = row.try_get("priority")?;
        let import_configuration: String = row.try_get("import_configuration")?;
        let resource_requirements: String = row.try_get("resource_requirements")?;
        let lock_requirements: String = row.try_get("lock_requirements")?;

        Ok(Schedule {
            id: Uuid::parse_str(&id)?,
            name: row.try_get("name")?,
            tenant_id: row.try_get("tenant_id")?,
            orchestration_id: parse_optional_uuid(row.try_get("orchestration_id")?)?,
            import_type: row.try_get("import_type")?,
            schedule_expression: row.try_get("schedule_expression")?,
            recurring: row.try_get("recurring")?,
            priority: u8::try_from(priority).map_err(|_| {
                OrchestratorError::Serialization(format!("Invalid priority: {priority}"))
            })?,
            created_by: row.try_get("created_by")?,
            status: ScheduleStatus::from_str(&status)?,
            next_execution: row.try_get("next_execution")?,
            last_execution: row.try_get("last_execution")?,
            execution_count: row.try_get::<i64, _>("execution_count")? as u64,
            success_count: row.try_get::<i64, _>("success_count")? as u64,
            failure_count: row.try_get::<i64, _>("failure_count")? as u64,
            import_configuration: serde_json::from_str(&import_configuration)?,
            resource_requirements: serde_json::from_str(&resource_requirements)?,
            lock_requirements: serde_json::from_str(&lock_requirements)?,
            max_retries: row.try_get::<i64, _>("max_retries")? as u32,
            retry_delay_seconds: row.try_get::<i64, _>("retry_delay_seconds")? as u64,
            timeout_minutes: row.try_get::<i64, _>("timeout_minutes")? as u64,
            is_active: row.try_get("is_active")?,
            active_execution_id: parse_optional_uuid(row.try_get("active_execution_id")?)?,
            active_request_id: parse_optional_uuid(row.try_get("active_request_id")?)?,
            current_attempt: row.try_get::<i64, _>("current_attempt")? as u32,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_all(&self) -> OrchestratorResult<Vec<Schedule>> {
        let rows = sqlx::query(SELECT_COLUMNS)
            .fetch_all(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;
        rows.iter().map(Self::row_to_schedule).collect()
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.id, tenant_id = %schedule.tenant_id))]
    async fn create(&self, schedule: &Schedule) -> OrchestratorResult<Schedule> {
        sqlx::query(
            r#"
            INSERT INTO schedules (id, name, tenant_id, orchestration_id, import_type,
                schedule_expression, recurring, priority, created_by, status, next_execution,
                last_execution, execution_count, success_count, failure_count, import_configuration,
                resource_requirements, lock_requirements, max_retries, retry_delay_seconds,
                timeout_minutes, is_active, active_execution_id, active_request_id, current_attempt,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
            "#,
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.name)
        .bind(&schedule.tenant_id)
        .bind(schedule.orchestration_id.map(|id| id.to_string()))
        .bind(&schedule.import_type)
        .bind(&schedule.schedule_expression)
        .bind(schedule.recurring)
        .bind(schedule.priority as i64)
        .bind(&schedule.created_by)
        .bind(schedule.status.as_str())
        .bind(schedule.next_execution)
        .bind(schedule.last_execution)
        .bind(schedule.execution_count as i64)
        .bind(schedule.success_count as i64)
        .bind(schedule.failure_count as i64)
        .bind(serde_json::to_string(&schedule.import_configuration)?)
        .bind(serde_json::to_string(&schedule.resource_requirements)?)
        .bind(serde_json::to_string(&schedule.lock_requirements)?)
        .bind(schedule.max_retries as i64)
        .bind(schedule.retry_delay_seconds as i64)
        .bind(schedule.timeout_minutes as i64)
        .bind(schedule.is_active)
        .bind(schedule.active_execution_id.map(|id| id.to_string()))
        .bind(schedule.active_request_id.map(|id| id.to_string()))
        .bind(schedule.current_attempt as i64)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        debug!("调度已写入数据库");
        Ok(schedule.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> OrchestratorResult<Option<Schedule>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_schedule(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.id, status = %schedule.status))]
    async fn update(&self, schedule: &Schedule) -> OrchestratorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET name = $2, orchestration_id = $3, schedule_expression = $4, recurring = $5,
                priority = $6, status = $7, next_execution = $8, last_execution = $9,
                execution_count = $10, success_count = $11, failure_count = $12,
                import_configuration = $13, resource_requirements = $14, lock_requirements = $15,
                max_retries = $16, retry_delay_seconds = $17, timeout_minutes = $18,
                is_active = $19, active_execution_id = $20, active_request_id = $21,
                current_attempt = $22, updated_at = $23
            WHERE id = $1
            "#,
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.name)
        .bind(schedule.orchestration_id.map(|id| id.to_string()))
        .bind(&schedule.schedule_expression)
        .bind(schedule.recurring)
        .bind(schedule.priority as i64)
        .bind(schedule.status.as_str())
        .bind(schedule.next_execution)
        .bind(schedule.last_execution)
        .bind(schedule.execution_count as i64)
        .bind(schedule.success_count as i64)
        .bind(schedule.failure_count as i64)
        .bind(serde_json::to_string(&schedule.import_configuration)?)
        .bind(serde_json::to_string(&schedule.resource_requirements)?)
        .bind(serde_json::to_string(&schedule.lock_requirements)?)
        .bind(schedule.max_retries as i64)
        .bind(schedule.retry_delay_seconds as i64)
        .bind(schedule.timeout_minutes as i64)
        .bind(schedule.is_active)
        .bind(schedule.active_execution_id.map(|id| id.to_string()))
        .bind(schedule.active_request_id.map(|id| id.to_string()))
        .bind(schedule.current_attempt as i64)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::ScheduleNotFound { id: schedule.id });
        }
        Ok(())
    }

    async fn list(&self, filter: &ScheduleFilter) -> OrchestratorResult<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> = self
            .fetch_all()
            .await?
            .into_iter()
            .filter(|s| filter.matches(s))
            .collect();
        schedules.sort_by_key(|s| s.created_at);
        if let Some(limit) = filter.limit {
            schedules.truncate(limit);
        }
        Ok(schedules)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> OrchestratorResult<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'SCHEDULED' AND is_active = 1 AND next_execution IS NOT NULL"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;

        // 时间比较在内存中完成，避免依赖 TEXT 时间戳的字典序
        let mut due = rows
            .iter()
            .map(Self::row_to_schedule)
            .collect::<OrchestratorResult<Vec<_>>>()?;
        due.retain(|s| s.is_due(now));
        due.sort_by_key(|s| (s.next_execution, s.priority));
        Ok(due)
    }

    async fn find_by_status(&self, status: ScheduleStatus) -> OrchestratorResult<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = $1 ORDER BY created_at"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(OrchestratorError::Database)?;
        rows.iter().map(Self::row_to_schedule).collect()
    }
}
