use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    conduit::ConduitReader,
    error::LaunchError,
    plan::{EncodePlan, EncoderCommand, FanOutTarget},
    process::{BoxedReader, BoxedWriter, EncoderChild, EncoderSpawner, ProcessExit},
};

const STDERR_TAIL_LINES: usize = 8;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderEventKind {
    /// The process was launched.
    Started { pid: Option<u32> },
    /// The process failed after launch. Always followed by `Ended`.
    Error { message: String },
    /// The process is gone, for whatever reason.
    Ended {
        exit: Option<ProcessExit>,
        killed: bool,
    },
}

/// Lifecycle signal tagged with the id given at launch, so a listener can
/// tell events of a superseded encoder from the current one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderEvent {
    pub id: String,
    pub kind: EncoderEventKind,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderState {
    Running = 0,
    Exited = 1,
    Failed = 2,
    Killed = 3,
}

impl From<u8> for EncoderState {
    fn from(value: u8) -> Self {
        match value {
            0 => EncoderState::Running,
            1 => EncoderState::Exited,
            2 => EncoderState::Failed,
            _ => EncoderState::Killed,
        }
    }
}

type KillRequest = oneshot::Sender<()>;

/// Owns one encoder process for its whole life.
pub struct EncoderSupervisor {
    id: String,
    pid: Option<u32>,
    command: EncoderCommand,
    outputs: Vec<FanOutTarget>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    kill_tx: Option<oneshot::Sender<KillRequest>>,
}

impl EncoderSupervisor {
    /// Spawns the process described by `plan` and starts watching it.
    ///
    /// `input` must be given when the plan reads stdin; chunks from it are
    /// written to the process in order. Returns once the process is spawned,
    /// not once it is streaming.
    pub fn launch(
        id: &str,
        spawner: &dyn EncoderSpawner,
        program: &str,
        plan: &EncodePlan,
        input: Option<ConduitReader>,
        events: mpsc::UnboundedSender<EncoderEvent>,
    ) -> Result<Self, LaunchError> {
        if plan.reads_stdin() && input.is_none() {
            return Err(LaunchError::InvalidPlan(
                "stdin input requires a conduit".to_string(),
            ));
        }

        let command = plan.to_command(program);
        log::debug!("encoder {}: {}", id, command);
        let mut child = spawner.spawn(&command, plan.reads_stdin())?;
        let pid = child.id();

        let cancel = CancellationToken::new();
        if let Some(input) = input {
            let Some(stdin) = child.take_stdin() else {
                let _ = child.start_kill();
                return Err(LaunchError::MissingStdin);
            };
            tokio::spawn(feed_stdin(id.to_string(), input, stdin, cancel.clone()));
        }

        let stderr_task = child
            .take_stderr()
            .map(|stderr| tokio::spawn(collect_stderr(id.to_string(), stderr)));

        let state = Arc::new(AtomicU8::new(EncoderState::Running as u8));
        let (kill_tx, kill_rx) = oneshot::channel();

        log::info!(
            "encoder {}: started pid={:?} outputs={}",
            id,
            pid,
            plan.outputs.len()
        );
        let _ = events.send(EncoderEvent {
            id: id.to_string(),
            kind: EncoderEventKind::Started { pid },
        });

        tokio::spawn(watch_exit(
            id.to_string(),
            child,
            kill_rx,
            stderr_task,
            Arc::clone(&state),
            cancel.clone(),
            events,
        ));

        Ok(Self {
            id: id.to_string(),
            pid,
            command,
            outputs: plan.outputs.clone(),
            state,
            cancel,
            kill_tx: Some(kill_tx),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command(&self) -> &EncoderCommand {
        &self.command
    }

    pub fn outputs(&self) -> &[FanOutTarget] {
        &self.outputs
    }

    pub fn state(&self) -> EncoderState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Kills the process. Returns once the kill signal has been sent, without
    /// waiting for the exit. Calling it on a dead process does nothing.
    pub async fn terminate(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if kill_tx.send(ack_tx).is_ok() {
                let _ = ack_rx.await;
            }
        }
        self.cancel.cancel();
    }
}

impl Drop for EncoderSupervisor {
    fn drop(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let (ack_tx, _) = oneshot::channel();
            let _ = kill_tx.send(ack_tx);
        }
        self.cancel.cancel();
    }
}

async fn feed_stdin(
    id: String,
    mut input: ConduitReader,
    mut stdin: BoxedWriter,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = input.recv() => chunk,
        };
        let Some(chunk) = chunk else {
            log::debug!("encoder {}: input conduit closed", id);
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = stdin.write_all(&chunk) => {
                if let Err(e) = result {
                    log::warn!("encoder {}: stdin write failed: {}", id, e);
                    break;
                }
            }
        }
    }
    let _ = stdin.shutdown().await;
}

async fn collect_stderr(id: String, stderr: BoxedReader) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                log::debug!("encoder {}: {}", id, line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!("encoder {}: stderr read failed: {}", id, e);
                break;
            }
        }
    }
    tail.into_iter().collect()
}

async fn watch_exit(
    id: String,
    mut child: Box<dyn EncoderChild>,
    mut kill_rx: oneshot::Receiver<KillRequest>,
    stderr_task: Option<JoinHandle<Vec<String>>>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<EncoderEvent>,
) {
    let (exit, killed) = tokio::select! {
        exit = child.wait() => (exit, false),
        Ok(ack) = &mut kill_rx => {
            if let Err(e) = child.start_kill() {
                log::warn!("encoder {}: kill failed: {}", id, e);
            }
            state.store(EncoderState::Killed as u8, Ordering::SeqCst);
            let _ = ack.send(());
            (child.wait().await, true)
        }
    };
    cancel.cancel();

    let tail = match stderr_task {
        Some(task) => match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await {
            Ok(Ok(tail)) => tail,
            _ => Vec::new(),
        },
        None => Vec::new(),
    };

    let send = |kind| {
        let _ = events.send(EncoderEvent {
            id: id.clone(),
            kind,
        });
    };

    let exit = match exit {
        Ok(exit) => Some(exit),
        Err(e) => {
            log::error!("encoder {}: wait failed: {}", id, e);
            None
        }
    };

    if killed {
        log::info!("encoder {}: killed", id);
    } else {
        match exit {
            Some(exit) if exit.success() => {
                state.store(EncoderState::Exited as u8, Ordering::SeqCst);
                log::info!("encoder {}: exited", id);
            }
            _ => {
                state.store(EncoderState::Failed as u8, Ordering::SeqCst);
                let message = failure_message(exit, &tail);
                log::error!("encoder {}: {}", id, message);
                send(EncoderEventKind::Error { message });
            }
        }
    }

    send(EncoderEventKind::Ended { exit, killed });
}

fn failure_message(exit: Option<ProcessExit>, tail: &[String]) -> String {
    let head = match exit.and_then(|e| e.code) {
        Some(code) => format!("ffmpeg exited with code {}", code),
        None if exit.is_some() => "ffmpeg was killed by a signal".to_string(),
        None => "ffmpeg exit status unknown".to_string(),
    };
    if tail.is_empty() {
        head
    } else {
        format!("{}: {}", head, tail.join("; "))
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_test;
