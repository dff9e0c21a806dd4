//! Thread update feed over HTTP: newline-delimited JSON by default, server
//! sent events with `?events=true`.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use skein_shared::types::ThreadId;

use crate::api::AppState;
use crate::error::ServerError;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct UpdatesQuery {
    #[serde(default)]
    events: bool,
    /// Only blocks indexed after this seq are sent.
    #[serde(default)]
    since: i64,
}

pub async fn thread_updates(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UpdatesQuery>,
) -> Result<Response, ServerError> {
    let id = ThreadId(id);
    let updates = state.node.updates(&id, query.since)?;
    debug!(thread = %id, since = query.since, sse = query.events, "Update subscriber attached");

    if query.events {
        let events = updates.filter_map(|update| async move {
            match Event::default().event("update").json_data(&update) {
                Ok(event) => Some(Ok::<_, Infallible>(event)),
                Err(e) => {
                    warn!("Failed to encode update event: {}", e);
                    None
                }
            }
        });
        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
            .into_response());
    }

    let lines = updates.map(|update| {
        serde_json::to_vec(&update).map(|mut line| {
            line.push(b'\n');
            line
        })
    });
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}
