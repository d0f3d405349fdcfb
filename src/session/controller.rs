use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ffmpeg_relay::{
    Conduit, ConduitWriter, EncodePlan, EncodeTuning, EncoderEvent, EncoderEventKind,
    EncoderSpawner, EncoderSupervisor, FanOutPolicy, LaunchError, WriteOutcome,
    conduit::ConduitStats,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    config::StreamforgeConfig,
    session::{
        destination::DestinationSet,
        error::SessionError,
        mode::{SessionMode, resolve_mode},
        types::{
            BroadcastSession, PushOutcome, SessionHandle, SessionSnapshot, SessionStatus,
            StartRequest,
        },
    },
};

/// How sessions drive the encoder.
#[derive(Clone, Debug)]
pub struct EncoderSettings {
    pub program: String,
    pub ingest_format: String,
    pub conduit_depth: usize,
    pub fan_out: FanOutPolicy,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            ingest_format: "webm".to_string(),
            conduit_depth: 64,
            fan_out: FanOutPolicy::Abort,
        }
    }
}

impl From<&StreamforgeConfig> for EncoderSettings {
    fn from(config: &StreamforgeConfig) -> Self {
        Self {
            program: config.ffmpeg_path().to_string(),
            ingest_format: config.ingest_format().to_string(),
            conduit_depth: config.conduit_depth(),
            fan_out: config.fan_out(),
        }
    }
}

/// Write end of the running ingest session's conduit.
struct IngestSlot {
    session_id: String,
    writer: ConduitWriter,
    warned_full: bool,
}

struct ActiveSession {
    session: BroadcastSession,
    supervisor: EncoderSupervisor,
    stats: Option<Arc<ConduitStats>>,
}

// transitions buffered per subscriber before it starts lagging
const TRANSITION_CAPACITY: usize = 64;

#[derive(Default)]
struct ControllerState {
    active: Option<ActiveSession>,
    last_error: Option<String>,
    failed_at: Option<DateTime<Utc>>,
}

impl ControllerState {
    fn snapshot(&self) -> SessionSnapshot {
        let Some(active) = &self.active else {
            let mut snapshot = SessionSnapshot::idle(self.last_error.clone());
            snapshot.failed_at = self.failed_at;
            return snapshot;
        };
        let session = &active.session;
        let (chunks_accepted, chunks_dropped) = active
            .stats
            .as_ref()
            .map(|s| (s.accepted(), s.dropped()))
            .unwrap_or_default();
        SessionSnapshot {
            status: session.status,
            session_id: Some(session.id.clone()),
            mode: Some(session.mode),
            source_url: session.source_locator.clone(),
            destinations: session.destinations.len(),
            started_at: Some(session.started_at),
            chunks_accepted,
            chunks_dropped,
            last_error: self.last_error.clone(),
            failed_at: self.failed_at,
        }
    }
}

struct Shared {
    // start, stop and encoder events are serialized on this lock
    state: tokio::sync::Mutex<ControllerState>,
    // pushes only touch this one, never awaiting while holding it
    ingest: Mutex<Option<IngestSlot>>,
    transitions: broadcast::Sender<SessionSnapshot>,
    events_tx: mpsc::UnboundedSender<EncoderEvent>,
    spawner: Arc<dyn EncoderSpawner>,
    settings: EncoderSettings,
}

impl Shared {
    fn publish(&self, state: &ControllerState) {
        let snapshot = state.snapshot();
        log::debug!("status -> {:?}", snapshot.status);
        // no subscribers is fine
        let _ = self.transitions.send(snapshot);
    }

    fn ingest_slot(&self) -> std::sync::MutexGuard<'_, Option<IngestSlot>> {
        self.ingest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes the conduit and signals the encoder to die. Both are done when
    /// this returns.
    async fn teardown(&self, mut active: ActiveSession) {
        {
            let mut slot = self.ingest_slot();
            if slot
                .as_ref()
                .is_some_and(|s| s.session_id == active.session.id)
            {
                if let Some(slot) = slot.take() {
                    slot.writer.close();
                }
            }
        }
        active.supervisor.terminate().await;
        log::info!("session {}: torn down", active.session.id);
    }

    fn plan_for(
        &self,
        mode: SessionMode,
        locator: Option<&str>,
        destinations: &DestinationSet,
    ) -> Result<EncodePlan, LaunchError> {
        let builder = EncodePlan::builder().fan_out(self.settings.fan_out);
        let mut builder = match mode {
            SessionMode::Relay => builder
                .input_url(locator.unwrap_or_default())
                .tuning(EncodeTuning::relay()),
            SessionMode::Ingest => builder
                .input_stdin(self.settings.ingest_format.as_str())
                .tuning(EncodeTuning::ingest()),
        };
        for address in destinations.sink_addresses() {
            builder = builder.add_flv_output(address);
        }
        builder.build()
    }

    async fn handle_event(&self, event: EncoderEvent) {
        let mut state = self.state.lock().await;
        let current = state
            .active
            .as_ref()
            .is_some_and(|a| a.session.id == event.id);
        if !current {
            log::debug!("session {}: ignoring stale {:?}", event.id, event.kind);
            return;
        }

        match event.kind {
            EncoderEventKind::Started { pid } => {
                if let Some(active) = state.active.as_mut() {
                    if active.session.status == SessionStatus::Starting {
                        active.session.status = SessionStatus::Live;
                        log::info!("session {}: live (pid {:?})", event.id, pid);
                    }
                }
                self.publish(&state);
            }
            EncoderEventKind::Error { message } => {
                log::error!("session {}: encoder failed: {}", event.id, message);
                if let Some(active) = state.active.as_mut() {
                    active.session.status = SessionStatus::Failed;
                }
                state.last_error = Some(message);
                state.failed_at = Some(Utc::now());
                self.publish(&state);
                if let Some(active) = state.active.take() {
                    self.teardown(active).await;
                }
                self.publish(&state);
            }
            EncoderEventKind::Ended { exit, .. } => {
                log::info!("session {}: encoder ended ({:?})", event.id, exit);
                if let Some(active) = state.active.take() {
                    self.teardown(active).await;
                }
                self.publish(&state);
            }
        }
    }
}

/// Owner of the single broadcast session.
///
/// Every mutation goes through here: `start` and `stop` are serialized, a new
/// `start` fully tears down the previous session before launching, and
/// `push_chunk` writes only into the conduit of a running ingest session.
pub struct SessionController {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl SessionController {
    pub fn new(spawner: Arc<dyn EncoderSpawner>, settings: EncoderSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let shared = Arc::new(Shared {
            state: tokio::sync::Mutex::new(ControllerState::default()),
            ingest: Mutex::new(None),
            transitions,
            events_tx,
            spawner,
            settings,
        });

        let cancel = CancellationToken::new();
        tokio::spawn(Self::event_loop(
            Arc::clone(&shared),
            cancel.clone(),
            events_rx,
        ));
        Self { shared, cancel }
    }

    async fn event_loop(
        shared: Arc<Shared>,
        cancel: CancellationToken,
        mut events_rx: mpsc::UnboundedReceiver<EncoderEvent>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                },
                Some(event) = events_rx.recv() => {
                    shared.handle_event(event).await;
                },
            }
        }
    }

    /// Starts a session, replacing any running one.
    ///
    /// Returns once the encoder has been launched; the session is `Starting`
    /// until the encoder reports in.
    pub async fn start(&self, request: StartRequest) -> Result<SessionHandle, SessionError> {
        let destinations = DestinationSet::new(request.destinations)?;
        let (mode, locator) = resolve_mode(request.source_locator.as_deref(), request.mode_hint)?;
        let plan = self
            .shared
            .plan_for(mode, locator.as_deref(), &destinations)?;

        let mut state = self.shared.state.lock().await;
        if let Some(mut previous) = state.active.take() {
            log::info!(
                "session {}: superseded by a new start request",
                previous.session.id
            );
            previous.session.status = SessionStatus::Stopping;
            self.shared.teardown(previous).await;
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (writer, reader) = match mode {
            SessionMode::Ingest => {
                let (writer, reader) = Conduit::bounded(self.shared.settings.conduit_depth);
                (Some(writer), Some(reader))
            }
            SessionMode::Relay => (None, None),
        };

        log::info!(
            "session {}: starting {} to {} destinations",
            id,
            mode,
            destinations.len()
        );
        for destination in destinations.iter() {
            // keys stay out of the logs
            log::debug!(
                "session {}: destination {} (stream key {})",
                id,
                destination.endpoint_url(),
                if destination.stream_key().is_some() {
                    "set"
                } else {
                    "none"
                }
            );
        }
        let supervisor = match EncoderSupervisor::launch(
            &id,
            self.shared.spawner.as_ref(),
            &self.shared.settings.program,
            &plan,
            reader,
            self.shared.events_tx.clone(),
        ) {
            Ok(supervisor) => supervisor,
            Err(e) => {
                log::error!("session {}: launch failed: {}", id, e);
                state.last_error = Some(e.to_string());
                self.shared.publish(&state);
                return Err(e.into());
            }
        };

        let stats = writer.as_ref().map(|w| w.stats());
        if let Some(writer) = writer {
            *self.shared.ingest_slot() = Some(IngestSlot {
                session_id: id.clone(),
                writer,
                warned_full: false,
            });
        }

        let session = BroadcastSession {
            id: id.clone(),
            mode,
            source_locator: locator,
            destinations,
            status: SessionStatus::Starting,
            started_at: Utc::now(),
        };
        let handle = SessionHandle {
            id,
            mode,
            status: session.status,
            started_at: session.started_at,
        };
        state.last_error = None;
        state.failed_at = None;
        state.active = Some(ActiveSession {
            session,
            supervisor,
            stats,
        });
        self.shared.publish(&state);
        Ok(handle)
    }

    /// Stops the running session. Returns `false` when there was none.
    pub async fn stop(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        let Some(active) = state.active.as_mut() else {
            log::info!("stop requested with no stream running");
            return false;
        };

        log::info!("session {}: stopping", active.session.id);
        active.session.status = SessionStatus::Stopping;
        self.shared.publish(&state);
        if let Some(active) = state.active.take() {
            self.shared.teardown(active).await;
        }
        self.shared.publish(&state);
        true
    }

    /// Hands one pushed chunk to the running ingest session. Never waits:
    /// without a session, in relay mode, or with a full conduit the chunk is
    /// dropped.
    pub fn push_chunk(&self, chunk: Bytes) -> PushOutcome {
        let mut slot = self.shared.ingest_slot();
        let Some(slot) = slot.as_mut() else {
            log::trace!("dropping {} byte chunk: no ingest session", chunk.len());
            return PushOutcome::NoSession;
        };

        match slot.writer.write(chunk) {
            WriteOutcome::Accepted => PushOutcome::Accepted,
            WriteOutcome::Full => {
                if !slot.warned_full {
                    slot.warned_full = true;
                    log::warn!(
                        "session {}: encoder input is behind, dropping chunks",
                        slot.session_id
                    );
                }
                log::trace!("session {}: conduit full, chunk dropped", slot.session_id);
                PushOutcome::Dropped
            }
            WriteOutcome::Closed => {
                log::trace!("session {}: conduit closed, chunk dropped", slot.session_id);
                PushOutcome::Dropped
            }
        }
    }

    /// Current state, with fresh chunk counters.
    pub async fn status(&self) -> SessionSnapshot {
        self.shared.state.lock().await.snapshot()
    }

    /// Every status transition from now on, in order, including the
    /// short-lived `Stopping` and `Failed` ones.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.shared.transitions.subscribe()
    }

    /// Stops the running session and the event loop.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.cancel.cancel();
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
