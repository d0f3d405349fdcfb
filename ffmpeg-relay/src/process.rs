use std::{io, pin::Pin, process::Stdio};

use futures::{FutureExt, future::BoxFuture};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{error::LaunchError, plan::EncoderCommand};

pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// How a process ended. `code` is `None` when it was killed by a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running encoder process as the supervisor sees it.
pub trait EncoderChild: Send {
    fn id(&self) -> Option<u32>;

    /// Hands over the stdin pipe. Returns `None` after the first call.
    fn take_stdin(&mut self) -> Option<BoxedWriter>;

    /// Hands over the stderr pipe. Returns `None` after the first call.
    fn take_stderr(&mut self) -> Option<BoxedReader>;

    /// Sends a kill signal without waiting for the process to exit.
    fn start_kill(&mut self) -> io::Result<()>;

    fn wait(&mut self) -> BoxFuture<'_, io::Result<ProcessExit>>;
}

/// Starts encoder processes. Tests swap in the `FakeSpawner` from the
/// `test-util` feature.
pub trait EncoderSpawner: Send + Sync {
    fn spawn(
        &self,
        command: &EncoderCommand,
        pipe_stdin: bool,
    ) -> Result<Box<dyn EncoderChild>, LaunchError>;
}

/// Spawns the real `ffmpeg` binary named in the command.
#[derive(Clone, Debug, Default)]
pub struct FfmpegSpawner;

impl EncoderSpawner for FfmpegSpawner {
    fn spawn(
        &self,
        command: &EncoderCommand,
        pipe_stdin: bool,
    ) -> Result<Box<dyn EncoderChild>, LaunchError> {
        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(if pipe_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: command.program.clone(),
                source,
            })?;
        Ok(Box::new(FfmpegChild(child)))
    }
}

struct FfmpegChild(tokio::process::Child);

impl EncoderChild for FfmpegChild {
    fn id(&self) -> Option<u32> {
        self.0.id()
    }

    fn take_stdin(&mut self) -> Option<BoxedWriter> {
        self.0
            .stdin
            .take()
            .map(|stdin| Box::pin(stdin) as BoxedWriter)
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.0
            .stderr
            .take()
            .map(|stderr| Box::pin(stderr) as BoxedReader)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.0.start_kill()
    }

    fn wait(&mut self) -> BoxFuture<'_, io::Result<ProcessExit>> {
        async move {
            let status = self.0.wait().await?;
            Ok(ProcessExit {
                code: status.code(),
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();

        let command = EncoderCommand {
            program: "/nonexistent/streamforge-ffmpeg".to_string(),
            args: vec!["-version".to_string()],
        };
        match FfmpegSpawner.spawn(&command, false) {
            Err(LaunchError::Spawn { program, .. }) => {
                assert_eq!(program, "/nonexistent/streamforge-ffmpeg");
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[test]
    fn test_exit_success() {
        assert!(ProcessExit { code: Some(0) }.success());
        assert!(!ProcessExit { code: Some(1) }.success());
        assert!(!ProcessExit { code: None }.success());
    }
}
