use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{
    destination::{DestinationDescriptor, DestinationSet},
    mode::SessionMode,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    /// Encoder launch requested, not yet confirmed.
    Starting,
    Live,
    Stopping,
    /// Transient: the encoder failed and the session is being torn down.
    Failed,
}

/// Start request as seen by the controller.
#[derive(Clone, Debug, Default)]
pub struct StartRequest {
    pub source_locator: Option<String>,
    pub destinations: Vec<DestinationDescriptor>,
    pub mode_hint: Option<SessionMode>,
}

#[cfg(test)]
impl StartRequest {
    pub fn relay(locator: impl Into<String>, destinations: Vec<DestinationDescriptor>) -> Self {
        Self {
            source_locator: Some(locator.into()),
            destinations,
            mode_hint: Some(SessionMode::Relay),
        }
    }

    pub fn ingest(destinations: Vec<DestinationDescriptor>) -> Self {
        Self {
            source_locator: None,
            destinations,
            mode_hint: Some(SessionMode::Ingest),
        }
    }
}

/// The one broadcast the controller is running.
#[derive(Clone, Debug)]
pub struct BroadcastSession {
    pub id: String,
    pub mode: SessionMode,
    pub source_locator: Option<String>,
    pub destinations: DestinationSet,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
}

/// Returned by a successful start. `status` is `Starting`: the encoder was
/// launched, data may not be flowing yet.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub id: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
}

/// Read-only view of the controller for status polling.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SessionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub destinations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub chunks_accepted: u64,
    pub chunks_dropped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the most recent runtime failure happened; cleared by the next
    /// successful start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn idle(last_error: Option<String>) -> Self {
        Self {
            status: SessionStatus::Idle,
            session_id: None,
            mode: None,
            source_url: None,
            destinations: 0,
            started_at: None,
            chunks_accepted: 0,
            chunks_dropped: 0,
            last_error,
            failed_at: None,
        }
    }
}

/// What happened to one pushed chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// An ingest session is running but its conduit is full or closing.
    Dropped,
    /// No ingest session is accepting chunks.
    NoSession,
}
