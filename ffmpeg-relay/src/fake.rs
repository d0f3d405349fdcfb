//! In-memory stand-in for the encoder process.
//!
//! [`FakeSpawner`] hands out [`FakeProcess`] handles that record the command
//! line, every byte written to stdin, and kill signals, and let a test make
//! the process fail or exit on demand.

use std::{
    io,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use futures::{FutureExt, future::BoxFuture};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::watch,
};

use crate::{
    error::LaunchError,
    plan::EncoderCommand,
    process::{BoxedReader, BoxedWriter, EncoderChild, EncoderSpawner, ProcessExit},
};

const PIPE_CAPACITY: usize = 64 * 1024;

static NEXT_PID: AtomicU32 = AtomicU32::new(1000);

#[derive(Default)]
struct SpawnerState {
    processes: Vec<FakeProcess>,
    overlapping: usize,
}

#[derive(Clone, Default)]
pub struct FakeSpawner {
    state: Arc<Mutex<SpawnerState>>,
    refuse: bool,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A spawner whose every launch fails as if the binary were missing.
    pub fn refusing() -> Self {
        Self {
            state: Arc::default(),
            refuse: true,
        }
    }

    pub fn processes(&self) -> Vec<FakeProcess> {
        self.lock().processes.clone()
    }

    pub fn last(&self) -> Option<FakeProcess> {
        self.lock().processes.last().cloned()
    }

    pub fn launch_count(&self) -> usize {
        self.lock().processes.len()
    }

    /// Number of launches that happened while an earlier process was still
    /// alive.
    pub fn overlapping_launches(&self) -> usize {
        self.lock().overlapping
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpawnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EncoderSpawner for FakeSpawner {
    fn spawn(
        &self,
        command: &EncoderCommand,
        pipe_stdin: bool,
    ) -> Result<Box<dyn EncoderChild>, LaunchError> {
        if self.refuse {
            return Err(LaunchError::Spawn {
                program: command.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
            });
        }

        let (stdin_writer, stdin_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (exit_tx, exit_rx) = watch::channel(None);

        let shared = Arc::new(FakeShared {
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            command: command.clone(),
            pipe_stdin,
            killed: AtomicBool::new(false),
            exit_tx,
            input: tokio::sync::Mutex::new(stdin_reader),
            stderr: Mutex::new(Some(stderr_writer)),
        });

        let mut state = self.lock();
        if state.processes.iter().any(|p| p.is_alive()) {
            state.overlapping += 1;
        }
        state.processes.push(FakeProcess {
            shared: Arc::clone(&shared),
        });

        Ok(Box::new(FakeChild {
            shared,
            stdin: pipe_stdin.then_some(stdin_writer),
            stderr: Some(stderr_reader),
            exit_rx,
        }))
    }
}

struct FakeShared {
    pid: u32,
    command: EncoderCommand,
    pipe_stdin: bool,
    killed: AtomicBool,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    input: tokio::sync::Mutex<DuplexStream>,
    stderr: Mutex<Option<DuplexStream>>,
}

impl FakeShared {
    fn finish(&self, exit: ProcessExit) {
        // close stderr so readers see EOF
        self.stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.exit_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(exit);
            true
        });
    }
}

/// Test-side view of one fake encoder process.
#[derive(Clone)]
pub struct FakeProcess {
    shared: Arc<FakeShared>,
}

impl FakeProcess {
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    pub fn command(&self) -> &EncoderCommand {
        &self.shared.command
    }

    pub fn has_stdin(&self) -> bool {
        self.shared.pipe_stdin
    }

    pub fn is_killed(&self) -> bool {
        self.shared.killed.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.shared.exit_tx.borrow().is_none()
    }

    /// Reads exactly `len` bytes of what the supervisor wrote to stdin.
    pub async fn read_input(&self, len: usize) -> io::Result<Vec<u8>> {
        let mut input = self.shared.input.lock().await;
        let mut buf = vec![0u8; len];
        input.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Reads stdin until the supervisor closes it.
    pub async fn read_input_to_end(&self) -> io::Result<Vec<u8>> {
        let mut input = self.shared.input.lock().await;
        let mut buf = Vec::new();
        input.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Writes `message` to stderr and exits with `code`.
    pub async fn fail(&self, code: i32, message: &str) -> io::Result<()> {
        let writer = self
            .shared
            .stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut writer) = writer {
            writer.write_all(message.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        self.shared.finish(ProcessExit { code: Some(code) });
        Ok(())
    }

    /// Exits on its own with `code`.
    pub fn exit(&self, code: i32) {
        self.shared.finish(ProcessExit { code: Some(code) });
    }
}

struct FakeChild {
    shared: Arc<FakeShared>,
    stdin: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl EncoderChild for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(self.shared.pid)
    }

    fn take_stdin(&mut self) -> Option<BoxedWriter> {
        self.stdin.take().map(|s| Box::pin(s) as BoxedWriter)
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.stderr.take().map(|s| Box::pin(s) as BoxedReader)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.shared.killed.store(true, Ordering::SeqCst);
        self.shared.finish(ProcessExit { code: None });
        Ok(())
    }

    fn wait(&mut self) -> BoxFuture<'_, io::Result<ProcessExit>> {
        async move {
            let exit = {
                let exit = self
                    .exit_rx
                    .wait_for(|exit| exit.is_some())
                    .await
                    .map_err(|_| io::Error::other("fake process vanished"))?;
                *exit
            };
            Ok(exit.unwrap_or(ProcessExit { code: None }))
        }
        .boxed()
    }
}
