use sqlx::SqliteConnection;
use time::OffsetDateTime;

use crate::{
    error::Result,
    store::{Enrollment, EnrollmentStatus, LessonCounts, enrollments},
};

/// Aggregate progress derived from the per-lesson rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recalculation {
    pub percentage: i64,
    pub fully_complete: bool,
}

impl Recalculation {
    /// Round-half-up percentage of completed lessons. An enrollment without
    /// lessons sits at 0% and never counts as complete.
    pub fn from_counts(counts: LessonCounts) -> Self {
        let LessonCounts { total, completed } = counts;
        if total <= 0 {
            return Self {
                percentage: 0,
                fully_complete: false,
            };
        }
        let completed = completed.clamp(0, total);
        // round(100 * c / t) == floor((200 * c + t) / (2 * t))
        let percentage = (200 * completed + total) / (2 * total);
        Self {
            percentage,
            fully_complete: percentage == 100,
        }
    }
}

/// Outcome of recalculating one enrollment
#[derive(Debug, Clone)]
pub struct Recalculated {
    pub enrollment: Enrollment,
    /// True only on the ACTIVE -> COMPLETED edge
    pub newly_completed: bool,
}

/// Re-derive `progress` from the stored lesson rows and promote the
/// enrollment to COMPLETED when every lesson is done.
pub async fn recalculate(
    conn: &mut SqliteConnection,
    enrollment: &Enrollment,
    now: OffsetDateTime,
) -> Result<Recalculated> {
    let counts = enrollments::lesson_counts(&mut *conn, enrollment.id).await?;
    let recalculation = Recalculation::from_counts(counts);

    if recalculation.fully_complete && enrollment.status == EnrollmentStatus::Active {
        if let Some(completed) = enrollments::mark_completed(&mut *conn, enrollment.id, now).await? {
            return Ok(Recalculated {
                enrollment: completed,
                newly_completed: true,
            });
        }
    }
    let enrollment = if recalculation.fully_complete {
        // already completed, progress stays at 100
        enrollments::get(&mut *conn, enrollment.id).await?
    } else {
        enrollments::set_progress(&mut *conn, enrollment.id, recalculation.percentage).await?
    };
    Ok(Recalculated {
        enrollment,
        newly_completed: false,
    })
}
