pub mod sqlite_execution_history_repository;
pub mod sqlite_schedule_repository;

pub use sqlite_execution_history_repository::SqliteExecutionHistoryRepository;
pub use sqlite_schedule_repository::SqliteScheduleRepository;

use std::str::FromStr;
use std::time::Duration;

use orchestrator_errors::OrchestratorResult;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

const MIGRATIONS: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        tenant_id TEXT NOT NULL,
        orchestration_id TEXT,
        import_type TEXT NOT NULL,
        schedule_expression TEXT NOT NULL,
        recurring INTEGER NOT NULL,
        priority INTEGER NOT NULL,
        created_by TEXT NOT NULL,
        status TEXT NOT NULL,
        next_execution TEXT,
        last_execution TEXT,
        execution_count INTEGER NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        import_configuration TEXT NOT NULL,
        resource_requirements TEXT NOT NULL,
        lock_requirements TEXT NOT NULL,
        max_retries INTEGER NOT NULL,
        retry_delay_seconds INTEGER NOT NULL,
        timeout_minutes INTEGER NOT NULL,
        is_active INTEGER NOT NULL,
        active_execution_id TEXT,
        active_request_id TEXT,
        current_attempt INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_schedules_status ON schedules (status, is_active)",
    r#"
    CREATE TABLE IF NOT EXISTS execution_history (
        id TEXT PRIMARY KEY,
        schedule_id TEXT NOT NULL REFERENCES schedules (id),
        started_at TEXT NOT NULL,
        completed_at TEXT,
        status TEXT NOT NULL,
        records_processed INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        execution_details TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_execution_history_schedule ON execution_history (schedule_id)",
];

/// 建立 SQLite 连接池；内存数据库只能使用单连接，否则每个连接各自一份数据
pub async fn connect_sqlite(
    url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> OrchestratorResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let in_memory = url.contains(":memory:");
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { max_connections })
        .acquire_timeout(acquire_timeout)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    info!(database.url = url, in_memory, "SQLite 连接池已建立");
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> OrchestratorResult<()> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("数据库表结构已就绪");
    Ok(())
}
