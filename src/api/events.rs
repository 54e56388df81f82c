use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::{catalog::Caller, server::Server};

#[utoipa::path(
    get,
    path = "/events",
    context_path = "/api",
    tag = "events",
    responses(
        (status = 200, description = "Server-sent events for the caller", body = String, content_type = "text/event-stream"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn events(
    State(server): State<Arc<Server>>,
    caller: Caller,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user_id = caller.user_id;
    let mut rx = server.realtime.subscribe(user_id);
    info!(user_id, "realtime session connected");

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("connected"));
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(&event.event).json_data(&event.payload) {
                    Ok(sse) => yield Ok(sse),
                    Err(e) => warn!(user_id, event = %event.event, error = %e, "unencodable realtime event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id, skipped, "realtime session lagged, events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

pub fn routes() -> Router<Arc<Server>> {
    Router::new().route("/events", get(events))
}
