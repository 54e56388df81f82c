//! Read side: enrollment listings, detail and progress views.

pub mod pagination;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use crate::{
    catalog::{Caller, Role},
    error::{Error, Result},
    store::{Enrollment, EnrollmentStatus},
};
use pagination::{Page, PageRequest, Pagination};

/// The course as shown next to an enrollment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub id: i64,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub instructor_id: i64,
    pub instructor_name: String,
    pub lesson_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct EnrollmentView {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub course: CourseSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgressView {
    pub lesson_id: i64,
    pub title: String,
    pub position: i64,
    pub is_completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct EnrollmentDetail {
    #[serde(flatten)]
    pub view: EnrollmentView,
    /// In lesson order
    pub lessons: Vec<LessonProgressView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProgressSummary {
    pub id: i64,
    pub progress: i64,
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProgressReport {
    pub enrollment: ProgressSummary,
    pub lessons: Vec<LessonProgressView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledStudent {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub status: EnrollmentStatus,
    pub progress: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EnrollmentQuery {
    /// Only enrollments in this state
    pub status: Option<EnrollmentStatus>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

impl EnrollmentQuery {
    fn split(self) -> (Option<EnrollmentStatus>, PageRequest) {
        (self.status, PageRequest::new(self.cursor, self.limit))
    }
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    #[sqlx(flatten)]
    enrollment: Enrollment,
    course_title: String,
    course_thumbnail_url: Option<String>,
    instructor_id: i64,
    instructor_first_name: String,
    instructor_last_name: String,
    lesson_count: i64,
}

impl From<EnrollmentRow> for EnrollmentView {
    fn from(row: EnrollmentRow) -> Self {
        let course = CourseSummary {
            id: row.enrollment.course_id,
            title: row.course_title,
            thumbnail_url: row.course_thumbnail_url,
            instructor_id: row.instructor_id,
            instructor_name: format!("{} {}", row.instructor_first_name, row.instructor_last_name),
            lesson_count: row.lesson_count,
        };
        Self {
            enrollment: row.enrollment,
            course,
        }
    }
}

const ENROLLMENT_VIEW_SELECT: &str = "\
    SELECT e.id, e.student_id, e.course_id, e.status, e.progress, \
           e.enrolled_at, e.completed_at, e.dropped_at, \
           c.title AS course_title, c.thumbnail_url AS course_thumbnail_url, \
           c.instructor_id, u.first_name AS instructor_first_name, \
           u.last_name AS instructor_last_name, \
           (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id) AS lesson_count \
    FROM enrollments e \
    JOIN courses c ON c.id = e.course_id \
    JOIN users u ON u.id = c.instructor_id";

pub async fn enrollment_view(database: &SqlitePool, enrollment_id: i64) -> Result<EnrollmentView> {
    let row = sqlx::query_as::<_, EnrollmentRow>(&format!("{ENROLLMENT_VIEW_SELECT} WHERE e.id = ?"))
        .bind(enrollment_id)
        .fetch_optional(database)
        .await?
        .ok_or(Error::NotFound("Enrollment"))?;
    Ok(row.into())
}

/// The student's enrollments, most recently enrolled first.
pub async fn list_my_enrollments(
    database: &SqlitePool,
    student_id: i64,
    query: EnrollmentQuery,
) -> Result<Page<EnrollmentView>> {
    let (status, page) = query.split();
    let page = page.validate()?;
    let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
        "{ENROLLMENT_VIEW_SELECT} \
         WHERE e.student_id = ?1 \
           AND (?2 IS NULL OR e.status = ?2) \
           AND (?3 IS NULL OR (e.enrolled_at, e.id) < \
                (SELECT enrolled_at, id FROM enrollments WHERE id = ?3)) \
         ORDER BY e.enrolled_at DESC, e.id DESC \
         LIMIT ?4"
    ))
    .bind(student_id)
    .bind(status)
    .bind(page.after)
    .bind(page.fetch_limit())
    .fetch_all(database)
    .await?;
    Ok(Page::from_rows(rows, page.limit, |row| row.enrollment.id).map(EnrollmentView::from))
}

async fn find_view(
    database: &SqlitePool,
    student_id: i64,
    course_id: i64,
) -> Result<EnrollmentView> {
    let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
        "{ENROLLMENT_VIEW_SELECT} WHERE e.student_id = ? AND e.course_id = ?"
    ))
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(database)
    .await?
    .ok_or(Error::NotFound("Enrollment"))?;
    Ok(row.into())
}

async fn lesson_progress(database: &SqlitePool, enrollment_id: i64) -> Result<Vec<LessonProgressView>> {
    let lessons = sqlx::query_as::<_, LessonProgressView>(
        "SELECT lp.lesson_id, l.title, l.position, lp.is_completed, lp.completed_at \
         FROM lesson_progress lp JOIN lessons l ON l.id = lp.lesson_id \
         WHERE lp.enrollment_id = ? \
         ORDER BY l.position, l.id",
    )
    .bind(enrollment_id)
    .fetch_all(database)
    .await?;
    Ok(lessons)
}

pub async fn get_enrollment_detail(
    database: &SqlitePool,
    student_id: i64,
    course_id: i64,
) -> Result<EnrollmentDetail> {
    let view = find_view(database, student_id, course_id).await?;
    let lessons = lesson_progress(database, view.enrollment.id).await?;
    Ok(EnrollmentDetail { view, lessons })
}

pub async fn get_progress(
    database: &SqlitePool,
    student_id: i64,
    course_id: i64,
) -> Result<ProgressReport> {
    let summary = sqlx::query_as::<_, (i64, i64, EnrollmentStatus)>(
        "SELECT id, progress, status FROM enrollments WHERE student_id = ? AND course_id = ?",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(database)
    .await?
    .ok_or(Error::NotFound("Enrollment"))?;
    let (id, progress, status) = summary;
    let lessons = lesson_progress(database, id).await?;
    Ok(ProgressReport {
        enrollment: ProgressSummary {
            id,
            progress,
            status,
        },
        lessons,
    })
}

/// Students enrolled in a course, most recent first. Instructors see only
/// their own courses; admins see every course.
pub async fn list_course_students(
    database: &SqlitePool,
    caller: Caller,
    course_id: i64,
    page: PageRequest,
) -> Result<Page<EnrolledStudent>> {
    if caller.role == Role::Student {
        return Err(Error::Forbidden(
            "Only instructors and admins can view enrolled students".to_string(),
        ));
    }
    let page: Pagination = page.validate()?;
    let instructor_id =
        sqlx::query_scalar::<_, i64>("SELECT instructor_id FROM courses WHERE id = ?")
            .bind(course_id)
            .fetch_optional(database)
            .await?
            .ok_or(Error::NotFound("Course"))?;
    if !caller.role.is_admin() && instructor_id != caller.user_id {
        return Err(Error::Forbidden(
            "You can only view students for your own courses".to_string(),
        ));
    }

    let rows = sqlx::query_as::<_, EnrolledStudent>(
        "SELECT e.id AS enrollment_id, e.student_id, u.first_name, u.last_name, u.email, \
                e.status, e.progress, e.enrolled_at \
         FROM enrollments e JOIN users u ON u.id = e.student_id \
         WHERE e.course_id = ?1 \
           AND (?2 IS NULL OR (e.enrolled_at, e.id) < \
                (SELECT enrolled_at, id FROM enrollments WHERE id = ?2)) \
         ORDER BY e.enrolled_at DESC, e.id DESC \
         LIMIT ?3",
    )
    .bind(course_id)
    .bind(page.after)
    .bind(page.fetch_limit())
    .fetch_all(database)
    .await?;
    Ok(Page::from_rows(rows, page.limit, |s| s.enrollment_id))
}
