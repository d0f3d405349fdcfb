use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    handler::{ApiJsonResult, AppState},
    session::{
        DestinationDescriptor, Scene, SessionError, SessionMode, SessionSnapshot, SessionStatus,
        StartRequest,
    },
};

pub fn stream_router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_stream))
        .route("/stop", post(stop_stream))
        .route("/ingest", get(ingest_endpoint))
        .route("/status", get(stream_status))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartStreamRequest {
    source_url: Option<String>,
    destinations: Option<Vec<DestinationRequest>>,
    mode: Option<String>,
    scene: Option<Scene>,
}

/// A destination is either a bare URL or `{ url, key }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DestinationRequest {
    Url(String),
    Target { url: String, key: Option<String> },
}

impl StartStreamRequest {
    fn into_start_request(self) -> Result<StartRequest, SessionError> {
        let mode_hint = self
            .mode
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::parse::<SessionMode>)
            .transpose()?;

        let destinations = self
            .destinations
            .unwrap_or_default()
            .into_iter()
            .map(|d| match d {
                DestinationRequest::Url(url) => DestinationDescriptor::url(url),
                DestinationRequest::Target { url, key } => DestinationDescriptor::new(url, key),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let source_locator = self
            .source_url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| {
                self.scene
                    .as_ref()
                    .and_then(Scene::remote_locator)
                    .map(str::to_string)
            });

        Ok(StartRequest {
            source_locator,
            destinations,
            mode_hint,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartStreamResponse {
    success: bool,
    message: &'static str,
    mode: SessionMode,
    session_id: String,
    status: SessionStatus,
    started_at: DateTime<Utc>,
}

async fn start_stream(
    State(state): State<AppState>,
    request: Result<Json<StartStreamRequest>, JsonRejection>,
) -> ApiJsonResult<StartStreamResponse> {
    // a body that does not parse is a config error like any other
    let Json(request) = request.map_err(|e| SessionError::invalid(e.body_text()))?;
    let request = request.into_start_request()?;
    let handle = state.controller.start(request).await?;
    Ok(Json(StartStreamResponse {
        success: true,
        message: "stream started",
        mode: handle.mode,
        session_id: handle.id,
        status: handle.status,
        started_at: handle.started_at,
    }))
}

#[derive(Serialize)]
struct StopStreamResponse {
    success: bool,
    message: &'static str,
}

async fn stop_stream(State(state): State<AppState>) -> Json<StopStreamResponse> {
    let message = if state.controller.stop().await {
        "stream stopped"
    } else {
        "no stream running"
    };
    Json(StopStreamResponse {
        success: true,
        message,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestEndpoint {
    rtmp_url: String,
    stream_key: String,
}

async fn ingest_endpoint(State(state): State<AppState>) -> Json<IngestEndpoint> {
    Json(IngestEndpoint {
        rtmp_url: state.config.ingest_rtmp_url().to_string(),
        stream_key: state.config.ingest_stream_key().to_string(),
    })
}

async fn stream_status(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.controller.status().await)
}
