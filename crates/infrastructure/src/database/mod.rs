pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryExecutionHistoryRepository, InMemoryScheduleRepository};
pub use sqlite::{
    connect_sqlite, run_migrations, SqliteExecutionHistoryRepository, SqliteScheduleRepository,
};
