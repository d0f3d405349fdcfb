use ffmpeg_relay::LaunchError;

/// Errors returned synchronously by session operations.
///
/// Encoder failures after launch are not returned here; they move the session
/// to `Failed` and show up in the status snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request was rejected before anything was allocated.
    #[error("invalid stream config: {0}")]
    InvalidConfig(String),

    /// The encoder could not be started. Nothing is left running.
    #[error("failed to launch encoder: {0}")]
    LaunchFailure(#[from] LaunchError),
}

impl SessionError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}
