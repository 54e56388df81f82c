pub mod course;
pub mod enrollment;
pub mod events;
pub mod notification;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tower_sessions::Session;
use utoipa::OpenApi;

use crate::{
    catalog::{Caller, Role},
    error::Error,
    query::pagination::{Page, PageMeta},
    server::Server,
};

/// Session keys written by the account service at login
pub const USER_ID_KEY: &str = "user_id";
pub const ROLE_KEY: &str = "role";

/// `{"success": true, "data": ..., "meta"?: ...}`
#[derive(Debug, Serialize)]
pub struct Success<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<PageMeta>,
}

impl<T> Success<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            meta: None,
        }
    }
}

impl<T> From<Page<T>> for Success<Vec<T>> {
    fn from(page: Page<T>) -> Self {
        Self {
            success: true,
            data: page.data,
            meta: Some(page.meta),
        }
    }
}

impl<T: Serialize> IntoResponse for Success<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| Error::Unauthorized)?;
        let user_id = session
            .get::<i64>(USER_ID_KEY)
            .await
            .map_err(|e| Error::Fatal(e.into()))?;
        let role = session
            .get::<Role>(ROLE_KEY)
            .await
            .map_err(|e| Error::Fatal(e.into()))?;
        match (user_id, role) {
            (Some(user_id), Some(role)) => Ok(Caller { user_id, role }),
            _ => Err(Error::Unauthorized),
        }
    }
}

/// A caller holding the STUDENT role
#[derive(Debug, Clone, Copy)]
pub struct Student(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for Student {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if caller.role != Role::Student {
            return Err(Error::Forbidden("Insufficient permissions".to_string()));
        }
        Ok(Student(caller.user_id))
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        enrollment::list_my_enrollments,
        enrollment::get_enrollment_detail,
        enrollment::enroll,
        enrollment::drop,
        enrollment::mark_lesson_complete,
        enrollment::get_progress,
        course::list_course_students,
        notification::list_notifications,
        notification::unread_count,
        notification::mark_read,
        notification::mark_all_read,
        events::events,
    ),
    tags(
        (name = "enrollments", description = "Enrollment lifecycle and progress"),
        (name = "courses", description = "Course rosters"),
        (name = "notifications", description = "In-app notifications"),
        (name = "events", description = "Real-time push"),
    )
)]
pub struct ApiDoc;

pub fn openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// All `/api` routes. The session layer is added by the caller.
pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(enrollment::routes())
                .merge(course::routes())
                .merge(notification::routes())
                .merge(events::routes()),
        )
        .with_state(server)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        extract::Path,
        http::{Request, StatusCode, header},
        routing::post,
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use tower_sessions::{MemoryStore, SessionManagerLayer};

    use super::*;
    use crate::{
        catalog::CourseStatus,
        store,
        testing::{self, RecordingMailer},
    };

    async fn login(Path((user_id, role)): Path<(i64, Role)>, session: Session) -> StatusCode {
        session.insert(USER_ID_KEY, user_id).await.unwrap();
        session.insert(ROLE_KEY, role).await.unwrap();
        StatusCode::NO_CONTENT
    }

    struct App {
        router: Router,
        server: Arc<Server>,
    }

    impl App {
        async fn new() -> Self {
            let database = store::test_pool().await;
            let server = Arc::new(Server::with_mailer(
                database,
                Arc::new(RecordingMailer::default()),
            ));
            let router = router(server.clone())
                .route("/test/login/{user_id}/{role}", post(login))
                .layer(SessionManagerLayer::new(MemoryStore::default()).with_secure(false));
            Self { router, server }
        }

        async fn cookie_for(&self, user_id: i64, role: &str) -> String {
            let response = self
                .call(Request::post(format!("/test/login/{user_id}/{role}")).body(Body::empty()).unwrap())
                .await;
            let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
            cookie.split(';').next().unwrap().to_string()
        }

        async fn call(&self, request: Request<Body>) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }

        async fn send(&self, method: &str, uri: &str, cookie: Option<&str>) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(cookie) = cookie {
                request = request.header(header::COOKIE, cookie);
            }
            let response = self.call(request.body(Body::empty()).unwrap()).await;
            let status = response.status();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&body).unwrap())
        }
    }

    #[tokio::test]
    async fn anonymous_requests_are_unauthorized() {
        let app = App::new().await;
        let (status, body) = app.send("GET", "/api/enrollments/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn student_enrolls_and_lists_through_the_api() {
        let app = App::new().await;
        let database = &app.server.database;
        let student = testing::seed_user(database, "Sam", "Student", Role::Student).await;
        let instructor = testing::seed_user(database, "Ian", "Structor", Role::Instructor).await;
        let course =
            testing::seed_course(database, instructor, "Rust 101", CourseStatus::Published, 2)
                .await;
        let cookie = app.cookie_for(student, "STUDENT").await;

        let uri = format!("/api/enrollments/courses/{}", course.id);
        let (status, body) = app.send("POST", &uri, Some(&cookie)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "ACTIVE");
        assert_eq!(body["data"]["course"]["lessonCount"], 2);

        let (status, body) = app.send("POST", &uri, Some(&cookie)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");

        let uri = format!(
            "/api/enrollments/courses/{}/lessons/{}/complete",
            course.id, course.lessons[0]
        );
        let (status, body) = app.send("POST", &uri, Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["progress"], 50);

        let (status, body) = app.send("GET", "/api/enrollments/me?limit=1", Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["meta"]["hasMore"], false);

        let (status, body) = app.send("GET", "/api/enrollments/me?limit=99", Some(&cookie)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        app.server.shutdown().await;
    }

    #[tokio::test]
    async fn instructors_cannot_enroll_but_see_their_roster() {
        let app = App::new().await;
        let database = &app.server.database;
        let instructor = testing::seed_user(database, "Ian", "Structor", Role::Instructor).await;
        let course =
            testing::seed_course(database, instructor, "Rust 101", CourseStatus::Published, 1)
                .await;
        let cookie = app.cookie_for(instructor, "INSTRUCTOR").await;

        let uri = format!("/api/enrollments/courses/{}", course.id);
        let (status, body) = app.send("POST", &uri, Some(&cookie)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let uri = format!("/api/courses/{}/students", course.id);
        let (status, body) = app.send("GET", &uri, Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[test]
    fn openapi_document_lists_routes() {
        let json = openapi_json().unwrap();
        assert!(json.contains("/api/enrollments/courses/{course_id}/lessons/{lesson_id}/complete"));
        assert!(json.contains("/api/notifications/read-all"));
    }
}
