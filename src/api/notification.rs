use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch},
};
use serde_json::json;

use super::Success;
use crate::{
    catalog::Caller,
    error::{Error, Result},
    notification::Notification,
    query::pagination::PageRequest,
    server::Server,
};

#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "notifications",
    params(PageRequest),
    responses(
        (status = 200, description = "The caller's notifications, newest first", body = [Notification]),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_notifications(
    State(server): State<Arc<Server>>,
    caller: Caller,
    Query(page): Query<PageRequest>,
) -> Result<impl IntoResponse> {
    let page = server
        .notifications
        .list(caller.user_id, page.validate()?)
        .await?;
    Ok(Success::from(page))
}

#[utoipa::path(
    get,
    path = "/unread-count",
    context_path = "/api/notifications",
    tag = "notifications",
    responses((status = 200, description = "`{\"count\": n}`"))
)]
pub async fn unread_count(
    State(server): State<Arc<Server>>,
    caller: Caller,
) -> Result<impl IntoResponse> {
    let count = server.notifications.unread_count(caller.user_id).await?;
    Ok(Success::new(json!({ "count": count })))
}

#[utoipa::path(
    patch,
    path = "/{id}/read",
    context_path = "/api/notifications",
    tag = "notifications",
    params(("id" = i64, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Marked as read"),
        (status = 404, description = "No such notification for the caller")
    )
)]
pub async fn mark_read(
    State(server): State<Arc<Server>>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    if !server.notifications.mark_read(id, caller.user_id).await? {
        return Err(Error::NotFound("Notification"));
    }
    Ok(Success::new(json!({ "id": id, "isRead": true })))
}

#[utoipa::path(
    patch,
    path = "/read-all",
    context_path = "/api/notifications",
    tag = "notifications",
    responses((status = 200, description = "`{\"updated\": n}`"))
)]
pub async fn mark_all_read(
    State(server): State<Arc<Server>>,
    caller: Caller,
) -> Result<impl IntoResponse> {
    let updated = server.notifications.mark_all_read(caller.user_id).await?;
    Ok(Success::new(json!({ "updated": updated })))
}

pub fn routes() -> Router<Arc<Server>> {
    Router::new().nest(
        "/notifications",
        Router::new()
            .route("/", get(list_notifications))
            .route("/unread-count", get(unread_count))
            .route("/{id}/read", patch(mark_read))
            .route("/read-all", patch(mark_all_read)),
    )
}
