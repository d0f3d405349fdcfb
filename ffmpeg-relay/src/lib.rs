//! Supervision of an external `ffmpeg` process that fans one encode out to
//! several streaming destinations.
//!
//! ```text
//!   relay:  remote locator ─────────────────────┐
//!                                                ▼
//!   ingest: push ─► Conduit ─► feeder ─► stdin  ffmpeg ─► tee ─┬─► flv dest 1
//!                                                              ├─► flv dest 2
//!                                                              └─► ...
//! ```

pub mod conduit;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod plan;
pub mod process;
pub mod supervisor;
pub mod tuning;

pub use conduit::{Conduit, ConduitReader, ConduitWriter, WriteOutcome};
pub use error::LaunchError;
pub use plan::{EncodePlan, EncoderCommand, FanOutPolicy, PlanInput};
pub use process::{EncoderChild, EncoderSpawner, FfmpegSpawner, ProcessExit};
pub use supervisor::{EncoderEvent, EncoderEventKind, EncoderState, EncoderSupervisor};
pub use tuning::EncodeTuning;

/// Runs `<binary> -version` and returns the first line of its banner.
/// Call once at startup to surface a missing encoder before the first session.
pub async fn probe(binary: &str) -> anyhow::Result<String> {
    let output = tokio::process::Command::new(binary)
        .arg("-version")
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("failed to run {} -version: {}", binary, e))?;
    if !output.status.success() {
        anyhow::bail!("{} -version exited with {}", binary, output.status);
    }
    let banner = String::from_utf8_lossy(&output.stdout);
    Ok(banner.lines().next().unwrap_or_default().to_string())
}
