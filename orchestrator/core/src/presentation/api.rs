// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HTTP API
//!
//! Routes under `/api/v1.0` map one-to-one onto [`ApplicationRegistry`]
//! operations. Errors are rendered as `{"reason": "..."}`.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::application::registry::{ApplicationRegistry, OrchestratorError};
use crate::domain::application::ApplicationConfiguration;
use crate::domain::driver::{DriverError, ExecSession};
use crate::infrastructure::event_bus::{EventBusError, GoalEventReceiver};

pub const DEFAULT_EXEC_COMMAND: &str = "/bin/sh";

pub fn app(registry: Arc<ApplicationRegistry>) -> Router {
    Router::new()
        .route("/_ping", get(ping))
        .route("/api/v1.0/applications", get(list_applications))
        .route(
            "/api/v1.0/applications/{app}",
            get(application_status).put(create_application).delete(delete_application),
        )
        .route("/api/v1.0/applications/{app}/events", get(stream_events))
        .route("/api/v1.0/applications/{app}/goals/{goal}", get(goal_status))
        .route("/api/v1.0/applications/{app}/goals/{goal}/inspect", get(inspect_goal))
        .route(
            "/api/v1.0/applications/{app}/goals/{goal}/transition_log",
            get(transition_log),
        )
        .route("/api/v1.0/applications/{app}/goals/{goal}/stats", get(goal_stats))
        .route(
            "/api/v1.0/applications/{app}/goals/{goal}/current_stats",
            get(current_stats),
        )
        .route("/api/v1.0/applications/{app}/goals/{goal}/logs", get(goal_logs))
        .route("/api/v1.0/applications/{app}/goals/{goal}/exec", get(exec_goal))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Error body returned by every failing route.
pub struct ApiError {
    status: StatusCode,
    reason: String,
}

impl ApiError {
    fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        let status = match &e {
            OrchestratorError::ApplicationNotFound(_)
            | OrchestratorError::GoalNotFound { .. }
            | OrchestratorError::NoContainer(_) => StatusCode::NOT_FOUND,
            OrchestratorError::ApplicationAlreadyExists(_) => StatusCode::CONFLICT,
            OrchestratorError::Configuration(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::Driver(DriverError::NotFound(_)) => StatusCode::NOT_FOUND,
            OrchestratorError::Driver(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "reason": self.reason }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn ping() -> &'static str {
    "OK"
}

async fn list_applications(State(registry): State<Arc<ApplicationRegistry>>) -> impl IntoResponse {
    Json(registry.names())
}

async fn create_application(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path(app): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let text = std::str::from_utf8(&body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Body is not UTF-8: {}", e)))?;
    let configuration = parse_document(&headers, text)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid application document: {}", e)))?;
    let status = registry.create(&app, configuration)?;
    Ok((StatusCode::CREATED, Json(status)))
}

/// YAML content types (`application/yaml`, `application/x-yaml`,
/// `text/yaml`) select the YAML parser; anything else is read as JSON.
fn parse_document(headers: &HeaderMap, text: &str) -> Result<ApplicationConfiguration, String> {
    let yaml = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("yaml"));
    if yaml {
        ApplicationConfiguration::from_yaml_str(text).map_err(|e| e.to_string())
    } else {
        ApplicationConfiguration::from_json_str(text).map_err(|e| e.to_string())
    }
}

async fn application_status(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path(app): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(registry.status(&app)?))
}

async fn delete_application(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path(app): Path<String>,
) -> ApiResult<StatusCode> {
    registry.delete(&app).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn goal_status(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path((app, goal)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(registry.goal_status(&app, &goal)?))
}

async fn inspect_goal(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path((app, goal)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(registry.inspect(&app, &goal).await?))
}

async fn transition_log(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path((app, goal)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(registry.transition_log(&app, &goal)?))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub since: Option<DateTime<Utc>>,
}

async fn goal_stats(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path((app, goal)): Path<(String, String)>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(registry.stats(&app, &goal, query.since)?))
}

async fn current_stats(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path((app, goal)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    match registry.current_stats(&app, &goal)? {
        Some(sample) => Ok(Json(sample)),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("No stats collected for goal {:?}", goal),
        )),
    }
}

async fn goal_logs(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path((app, goal)): Path<(String, String)>,
) -> ApiResult<String> {
    Ok(registry.logs(&app, &goal)?)
}

#[derive(Debug, Deserialize)]
pub struct ExecQuery {
    pub command: Option<String>,
}

impl ExecQuery {
    fn argv(&self) -> Vec<String> {
        let argv: Vec<String> = self
            .command
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if argv.is_empty() {
            vec![DEFAULT_EXEC_COMMAND.to_string()]
        } else {
            argv
        }
    }
}

async fn exec_goal(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path((app, goal)): Path<(String, String)>,
    Query(query): Query<ExecQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let session = registry.exec(&app, &goal, &query.argv()).await?;
    Ok(ws.on_upgrade(move |socket| bridge_terminal(socket, session)))
}

/// Pumps container output to the socket and socket input to the container
/// until either side closes.
async fn bridge_terminal(socket: WebSocket, session: ExecSession) {
    let (mut sink, mut incoming) = socket.split();
    let ExecSession { mut output, mut input } = session;

    let outbound = async {
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(bytes) => {
                    if sink.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Terminal output failed: {}", e);
                    break;
                }
            }
        }
        let _ = sink.close().await;
    };

    let inbound = async {
        while let Some(Ok(message)) = incoming.next().await {
            let written = match message {
                Message::Text(text) => input.write_all(text.as_str().as_bytes()).await,
                Message::Binary(bytes) => input.write_all(&bytes).await,
                Message::Close(_) => break,
                _ => continue,
            };
            if written.and(input.flush().await).is_err() {
                break;
            }
        }
        let _ = input.shutdown().await;
    };

    tokio::select! {
        _ = outbound => {}
        _ = inbound => {}
    }
    debug!("Terminal session closed");
}

async fn stream_events(
    State(registry): State<Arc<ApplicationRegistry>>,
    Path(app): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    registry.status(&app)?;
    let receiver = registry.events().subscribe_application(app);
    Ok(Sse::new(goal_events(receiver)).keep_alive(KeepAlive::default()))
}

fn goal_events(receiver: GoalEventReceiver) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().data(data)), receiver));
                }
                Err(EventBusError::Lagged(_)) | Err(EventBusError::Empty) => continue,
                Err(EventBusError::Closed) => return None,
            }
        }
    })
}
