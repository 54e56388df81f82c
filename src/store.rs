//! Durable enrollment and lesson progress records.

pub mod enrollments;

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{config::DatabaseConfig, error::Result};

pub static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
    ToSchema,
    clap::ValueEnum,
)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub status: EnrollmentStatus,
    /// Completion percentage, 0..=100
    pub progress: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub dropped_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub id: i64,
    pub enrollment_id: i64,
    pub lesson_id: i64,
    pub is_completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// Row counts a progress recalculation is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::FromRow)]
pub struct LessonCounts {
    pub total: i64,
    pub completed: i64,
}

/// Open the pool and bring the schema up to date.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let database = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&database).await?;
    Ok(database)
}

/// Start a transaction that takes the write lock on `BEGIN`.
///
/// A deferred transaction that read first cannot upgrade once another
/// connection has committed, and fails with `SQLITE_BUSY` without waiting.
/// Taking the lock up front makes writers queue on the busy timeout and run
/// their checks against the latest committed state.
pub async fn begin_write(database: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(database.begin_with("BEGIN IMMEDIATE").await?)
}

/// In-memory database with the schema applied. A single connection that is
/// never recycled, otherwise the database vanishes.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let database = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    MIGRATOR.run(&database).await.unwrap();
    database
}

/// File-backed database behind a multi-connection pool, for tests that need
/// real concurrent writers. Keep the directory alive as long as the pool.
#[cfg(test)]
pub async fn file_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("course_tracker.db").display()),
        max_connections: 8,
    };
    let database = connect(&config).await.unwrap();
    (dir, database)
}
