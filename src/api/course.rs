use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
};

use super::Success;
use crate::{
    catalog::Caller,
    error::Result,
    query::{self, EnrolledStudent, pagination::PageRequest},
    server::Server,
};

#[utoipa::path(
    get,
    path = "/{course_id}/students",
    context_path = "/api/courses",
    tag = "courses",
    params(("course_id" = i64, Path, description = "Course id"), PageRequest),
    responses(
        (status = 200, description = "Enrolled students, newest first", body = [EnrolledStudent]),
        (status = 403, description = "Not the course instructor or an admin"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn list_course_students(
    State(server): State<Arc<Server>>,
    caller: Caller,
    Path(course_id): Path<i64>,
    Query(page): Query<PageRequest>,
) -> Result<impl IntoResponse> {
    let page = query::list_course_students(&server.database, caller, course_id, page).await?;
    Ok(Success::from(page))
}

pub fn routes() -> Router<Arc<Server>> {
    Router::new().route("/courses/{course_id}/students", get(list_course_students))
}
