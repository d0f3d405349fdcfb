use serde::{Deserialize, Serialize};

use crate::session::error::SessionError;

/// One outbound streaming target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationDescriptor {
    endpoint_url: String,
    stream_key: Option<String>,
}

impl DestinationDescriptor {
    pub fn new(
        endpoint_url: impl Into<String>,
        stream_key: Option<String>,
    ) -> Result<Self, SessionError> {
        let endpoint_url: String = endpoint_url.into();
        let endpoint_url = endpoint_url.trim().to_string();
        if endpoint_url.is_empty() {
            return Err(SessionError::invalid("destination url is empty"));
        }
        let stream_key = stream_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        Ok(Self {
            endpoint_url,
            stream_key,
        })
    }

    pub fn url(url: impl Into<String>) -> Result<Self, SessionError> {
        Self::new(url, None)
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn stream_key(&self) -> Option<&str> {
        self.stream_key.as_deref()
    }

    /// `endpoint/key` when a key is set, the endpoint alone otherwise.
    pub fn sink_address(&self) -> String {
        match &self.stream_key {
            Some(key) => format!("{}/{}", self.endpoint_url.trim_end_matches('/'), key),
            None => self.endpoint_url.clone(),
        }
    }
}

/// The validated, ordered, non-empty destinations of one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationSet(Vec<DestinationDescriptor>);

impl DestinationSet {
    pub fn new(destinations: Vec<DestinationDescriptor>) -> Result<Self, SessionError> {
        if destinations.is_empty() {
            return Err(SessionError::invalid("at least one destination is required"));
        }
        Ok(Self(destinations))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DestinationDescriptor> {
        self.0.iter()
    }

    pub fn sink_addresses(&self) -> Vec<String> {
        self.0.iter().map(|d| d.sink_address()).collect()
    }
}
