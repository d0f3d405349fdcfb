use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::session::error::SessionError;

/// Source type the capture client uses for a pullable remote stream.
pub const REMOTE_SOURCE_TYPE: &str = "remote_url";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// The encoder pulls a remote locator.
    Relay,
    /// Chunks are pushed over the realtime channel.
    Ingest,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Relay => f.write_str("relay"),
            SessionMode::Ingest => f.write_str("ingest"),
        }
    }
}

impl FromStr for SessionMode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relay" => Ok(SessionMode::Relay),
            "ingest" => Ok(SessionMode::Ingest),
            other => Err(SessionError::invalid(format!("unknown mode: {}", other))),
        }
    }
}

/// Picks the session mode for one start request.
///
/// Without a hint, a non-blank locator means relay and anything else ingest.
/// An explicit relay hint requires a locator; an explicit ingest hint drops
/// any locator.
pub fn resolve_mode(
    source_locator: Option<&str>,
    hint: Option<SessionMode>,
) -> Result<(SessionMode, Option<String>), SessionError> {
    let locator = source_locator
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string);

    match (hint, locator) {
        (Some(SessionMode::Relay), None) => Err(SessionError::invalid(
            "relay mode requires a source url",
        )),
        (Some(SessionMode::Ingest), _) => Ok((SessionMode::Ingest, None)),
        (_, Some(locator)) => Ok((SessionMode::Relay, Some(locator))),
        (None, None) => Ok((SessionMode::Ingest, None)),
    }
}

/// Upstream scene as reported by the capture client. Read only to find a
/// relay locator.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub config: SourceConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceConfig {
    pub url: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl Scene {
    /// URL of the first visible remote source, if any.
    pub fn remote_locator(&self) -> Option<&str> {
        self.sources
            .iter()
            .filter(|s| s.visible && s.kind == REMOTE_SOURCE_TYPE)
            .filter_map(|s| s.config.url.as_deref())
            .map(str::trim)
            .find(|url| !url.is_empty())
    }
}
