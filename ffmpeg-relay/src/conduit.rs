use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Result of a non-blocking write into the conduit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// The reader is behind and the buffer is full; the chunk was dropped.
    Full,
    /// The reader is gone; the chunk was dropped.
    Closed,
}

#[derive(Debug, Default)]
pub struct ConduitStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl ConduitStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Bounded single-writer, single-reader byte conduit feeding the encoder's
/// stdin. Writes never wait: when `depth` chunks are queued the newest chunk
/// is dropped.
pub struct Conduit;

impl Conduit {
    pub fn bounded(depth: usize) -> (ConduitWriter, ConduitReader) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let stats = Arc::new(ConduitStats::default());
        (
            ConduitWriter {
                tx,
                stats: Arc::clone(&stats),
            },
            ConduitReader { rx, stats },
        )
    }
}

pub struct ConduitWriter {
    tx: mpsc::Sender<Bytes>,
    stats: Arc<ConduitStats>,
}

impl ConduitWriter {
    pub fn write(&self, chunk: Bytes) -> WriteOutcome {
        match self.tx.try_send(chunk) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                WriteOutcome::Accepted
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                WriteOutcome::Full
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                WriteOutcome::Closed
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn stats(&self) -> Arc<ConduitStats> {
        Arc::clone(&self.stats)
    }

    /// Signals end-of-input. Chunks already queued are still delivered.
    pub fn close(self) {
        drop(self);
    }
}

pub struct ConduitReader {
    rx: mpsc::Receiver<Bytes>,
    stats: Arc<ConduitStats>,
}

impl ConduitReader {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn stats(&self) -> Arc<ConduitStats> {
        Arc::clone(&self.stats)
    }
}

impl Stream for ConduitReader {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
