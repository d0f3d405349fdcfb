use std::io;

/// Reasons an encoder process could not be brought up.
///
/// Failures after the process is running are not errors of this type; they
/// are reported through [`EncoderEvent`](crate::EncoderEvent).
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The plan cannot be turned into a command line.
    #[error("invalid encode plan: {0}")]
    InvalidPlan(String),

    /// The OS refused to start the process (binary missing, not executable).
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The plan reads from stdin but the spawned process exposes none.
    #[error("encoder process has no stdin to feed")]
    MissingStdin,
}
