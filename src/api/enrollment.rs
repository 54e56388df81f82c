use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};

use super::{Student, Success};
use crate::{
    error::Result,
    query::{self, EnrollmentDetail, EnrollmentQuery, EnrollmentView, ProgressReport},
    server::Server,
    store::Enrollment,
};

#[utoipa::path(
    get,
    path = "/me",
    context_path = "/api/enrollments",
    tag = "enrollments",
    params(EnrollmentQuery),
    responses(
        (status = 200, description = "The caller's enrollments, newest first", body = [EnrollmentView]),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid cursor or limit")
    )
)]
pub async fn list_my_enrollments(
    State(server): State<Arc<Server>>,
    Student(student_id): Student,
    Query(params): Query<EnrollmentQuery>,
) -> Result<impl IntoResponse> {
    let page = query::list_my_enrollments(&server.database, student_id, params).await?;
    Ok(Success::from(page))
}

#[utoipa::path(
    get,
    path = "/me/courses/{course_id}",
    context_path = "/api/enrollments",
    tag = "enrollments",
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Enrollment with per-lesson progress", body = EnrollmentDetail),
        (status = 404, description = "Not enrolled in this course")
    )
)]
pub async fn get_enrollment_detail(
    State(server): State<Arc<Server>>,
    Student(student_id): Student,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let detail = query::get_enrollment_detail(&server.database, student_id, course_id).await?;
    Ok(Success::new(detail))
}

#[utoipa::path(
    post,
    path = "/courses/{course_id}",
    context_path = "/api/enrollments",
    tag = "enrollments",
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 201, description = "Enrolled", body = EnrollmentView),
        (status = 400, description = "Course unpublished or previously dropped"),
        (status = 403, description = "Only students can enroll"),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Already enrolled")
    )
)]
pub async fn enroll(
    State(server): State<Arc<Server>>,
    Student(student_id): Student,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let view = server.enrollments.enroll(student_id, course_id).await?;
    Ok((StatusCode::CREATED, Success::new(view)))
}

#[utoipa::path(
    patch,
    path = "/courses/{course_id}/drop",
    context_path = "/api/enrollments",
    tag = "enrollments",
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Enrollment dropped", body = EnrollmentView),
        (status = 400, description = "Enrollment is not active"),
        (status = 404, description = "Not enrolled in this course")
    )
)]
pub async fn drop(
    State(server): State<Arc<Server>>,
    Student(student_id): Student,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let view = server.enrollments.drop(student_id, course_id).await?;
    Ok(Success::new(view))
}

#[utoipa::path(
    post,
    path = "/courses/{course_id}/lessons/{lesson_id}/complete",
    context_path = "/api/enrollments",
    tag = "enrollments",
    params(
        ("course_id" = i64, Path, description = "Course id"),
        ("lesson_id" = i64, Path, description = "Lesson id")
    ),
    responses(
        (status = 200, description = "Enrollment after recalculation", body = Enrollment),
        (status = 400, description = "Enrollment is not active"),
        (status = 404, description = "Enrollment or lesson progress not found")
    )
)]
pub async fn mark_lesson_complete(
    State(server): State<Arc<Server>>,
    Student(student_id): Student,
    Path((course_id, lesson_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse> {
    let enrollment = server
        .enrollments
        .mark_lesson_complete(student_id, course_id, lesson_id)
        .await?;
    Ok(Success::new(enrollment))
}

#[utoipa::path(
    get,
    path = "/courses/{course_id}/progress",
    context_path = "/api/enrollments",
    tag = "enrollments",
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Progress summary and lesson states", body = ProgressReport),
        (status = 404, description = "Not enrolled in this course")
    )
)]
pub async fn get_progress(
    State(server): State<Arc<Server>>,
    Student(student_id): Student,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let report = query::get_progress(&server.database, student_id, course_id).await?;
    Ok(Success::new(report))
}

pub fn routes() -> Router<Arc<Server>> {
    Router::new().nest(
        "/enrollments",
        Router::new()
            .route("/me", get(list_my_enrollments))
            .route("/me/courses/{course_id}", get(get_enrollment_detail))
            .route("/courses/{course_id}", post(enroll))
            .route("/courses/{course_id}/drop", patch(drop))
            .route(
                "/courses/{course_id}/lessons/{lesson_id}/complete",
                post(mark_lesson_complete),
            )
            .route("/courses/{course_id}/progress", get(get_progress)),
    )
}
