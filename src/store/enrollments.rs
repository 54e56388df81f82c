//! Statements over `enrollments` and `lesson_progress`.
//!
//! Every function takes a connection so the caller decides the transaction
//! boundary; the enrollment service runs each operation in one transaction.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use time::OffsetDateTime;

use super::{Enrollment, EnrollmentStatus, LessonCounts};
use crate::error::{Error, Result};

const ENROLLMENT_COLUMNS: &str =
    "id, student_id, course_id, status, progress, enrolled_at, completed_at, dropped_at";

pub async fn find(
    conn: &mut SqliteConnection,
    student_id: i64,
    course_id: i64,
) -> Result<Option<Enrollment>> {
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = ? AND course_id = ?"
    ))
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(conn)
    .await?;
    Ok(enrollment)
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Enrollment> {
    sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(Error::NotFound("Enrollment"))
}

/// Lesson ids of a course in course order, as seen by this connection
pub async fn course_lessons(conn: &mut SqliteConnection, course_id: i64) -> Result<Vec<i64>> {
    let lessons = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM lessons WHERE course_id = ? ORDER BY position, id",
    )
    .bind(course_id)
    .fetch_all(conn)
    .await?;
    Ok(lessons)
}

/// Insert an active enrollment and one incomplete progress row per lesson.
///
/// The unique index on (student_id, course_id) turns a lost check-then-insert
/// race into [`Error::Conflict`].
pub async fn insert_with_lessons(
    conn: &mut SqliteConnection,
    student_id: i64,
    course_id: i64,
    lesson_ids: &[i64],
    now: OffsetDateTime,
) -> Result<Enrollment> {
    let inserted = sqlx::query_as::<_, Enrollment>(&format!(
        "INSERT INTO enrollments (student_id, course_id, status, progress, enrolled_at) \
         VALUES (?, ?, ?, 0, ?) RETURNING {ENROLLMENT_COLUMNS}"
    ))
    .bind(student_id)
    .bind(course_id)
    .bind(EnrollmentStatus::Active)
    .bind(now)
    .fetch_one(&mut *conn)
    .await;
    let enrollment = match inserted {
        Ok(enrollment) => enrollment,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(Error::Conflict(
                "You are already enrolled in this course".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    // sqlite caps bound parameters per statement
    for chunk in lesson_ids.chunks(400) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO lesson_progress (enrollment_id, lesson_id, is_completed) ");
        builder.push_values(chunk, |mut row, lesson_id| {
            row.push_bind(enrollment.id)
                .push_bind(*lesson_id)
                .push_bind(false);
        });
        builder.build().execute(&mut *conn).await?;
    }
    Ok(enrollment)
}

/// ACTIVE -> DROPPED. Returns `None` when the row was no longer active.
pub async fn mark_dropped(
    conn: &mut SqliteConnection,
    id: i64,
    now: OffsetDateTime,
) -> Result<Option<Enrollment>> {
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        "UPDATE enrollments SET status = ?, dropped_at = ? \
         WHERE id = ? AND status = ? RETURNING {ENROLLMENT_COLUMNS}"
    ))
    .bind(EnrollmentStatus::Dropped)
    .bind(now)
    .bind(id)
    .bind(EnrollmentStatus::Active)
    .fetch_optional(conn)
    .await?;
    Ok(enrollment)
}

/// Flag one lesson completed. A lesson completed earlier keeps its first
/// completion time. Returns false when the enrollment has no row for the
/// lesson.
pub async fn complete_lesson(
    conn: &mut SqliteConnection,
    enrollment_id: i64,
    lesson_id: i64,
    now: OffsetDateTime,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE lesson_progress SET is_completed = 1, completed_at = COALESCE(completed_at, ?) \
         WHERE enrollment_id = ? AND lesson_id = ?",
    )
    .bind(now)
    .bind(enrollment_id)
    .bind(lesson_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn lesson_counts(conn: &mut SqliteConnection, enrollment_id: i64) -> Result<LessonCounts> {
    let counts = sqlx::query_as::<_, LessonCounts>(
        "SELECT COUNT(*) AS total, COALESCE(SUM(is_completed), 0) AS completed \
         FROM lesson_progress WHERE enrollment_id = ?",
    )
    .bind(enrollment_id)
    .fetch_one(conn)
    .await?;
    Ok(counts)
}

pub async fn set_progress(
    conn: &mut SqliteConnection,
    id: i64,
    progress: i64,
) -> Result<Enrollment> {
    sqlx::query_as::<_, Enrollment>(&format!(
        "UPDATE enrollments SET progress = ? WHERE id = ? RETURNING {ENROLLMENT_COLUMNS}"
    ))
    .bind(progress)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(Error::NotFound("Enrollment"))
}

/// ACTIVE -> COMPLETED at 100%. Returns `None` when the row was no longer
/// active, so the completion edge is taken at most once.
pub async fn mark_completed(
    conn: &mut SqliteConnection,
    id: i64,
    now: OffsetDateTime,
) -> Result<Option<Enrollment>> {
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        "UPDATE enrollments SET progress = 100, status = ?, completed_at = ? \
         WHERE id = ? AND status = ? RETURNING {ENROLLMENT_COLUMNS}"
    ))
    .bind(EnrollmentStatus::Completed)
    .bind(now)
    .bind(id)
    .bind(EnrollmentStatus::Active)
    .fetch_optional(conn)
    .await?;
    Ok(enrollment)
}
