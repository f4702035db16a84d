//! Serialized playback queue
//!
//! A single worker drains audio segments into the voice channel, so at
//! most one segment is ever audible. Enqueues are safe from any task;
//! `clear` drops everything queued and stops the current segment.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::platform::VoicePlatform;

/// Estimated playable bytes per second for encoded speech audio
const ENCODED_BYTES_PER_SEC: u64 = 4000;

/// Hard cap on waiting for a single segment
const MAX_SEGMENT_WAIT: Duration = Duration::from_secs(60);

/// One playable audio artifact, the synthesis of exactly one sentence
#[derive(Debug, Clone)]
pub struct Segment {
    /// Task that produced this segment; 0 for system segments (acks,
    /// confirmations, briefings)
    pub task_id: u64,
    /// Encoded audio blob
    pub audio: Vec<u8>,
    /// Source sentence, for logging
    pub text: String,
}

/// Shared handle to the playback queue
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<Inner>,
}

struct Inner {
    player: Arc<dyn VoicePlatform>,
    queue: Mutex<VecDeque<Segment>>,
    notify: Notify,
    playing_tx: watch::Sender<bool>,
    barge_in: AtomicBool,
    current_stop: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl PlaybackQueue {
    /// Create the queue and start its worker
    #[must_use]
    pub fn new(player: Arc<dyn VoicePlatform>) -> Self {
        let (playing_tx, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            player,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            playing_tx,
            barge_in: AtomicBool::new(false),
            current_stop: Mutex::new(None),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(worker(Arc::clone(&inner)));
        Self { inner }
    }

    /// Append a segment; the worker picks it up in order
    pub fn enqueue(&self, segment: Segment) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        tracing::debug!(
            task = segment.task_id,
            bytes = segment.audio.len(),
            text = %segment.text,
            "segment enqueued"
        );
        self.inner
            .queue
            .lock()
            .expect("playback lock poisoned")
            .push_back(segment);
        self.inner.notify.notify_one();
    }

    /// Drop all queued segments and stop the current one
    pub fn clear(&self) {
        let dropped = {
            let mut queue = self.inner.queue.lock().expect("playback lock poisoned");
            let n = queue.len();
            queue.clear();
            n
        };
        if let Ok(stop) = self.inner.current_stop.lock() {
            if let Some(token) = stop.as_ref() {
                token.cancel();
            }
        }
        tracing::info!(dropped, "playback cleared");
    }

    /// Mark that a barge-in drove the next stop, so the worker does not
    /// mistake it for a premature platform idle
    pub fn flag_barge_in(&self) {
        self.inner.barge_in.store(true, Ordering::SeqCst);
    }

    /// Whether a segment is currently audible
    #[must_use]
    pub fn is_playing(&self) -> bool {
        *self.inner.playing_tx.borrow()
    }

    /// Number of queued (not yet playing) segments
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.inner.queue.lock().expect("playback lock poisoned").len()
    }

    /// Watch playing-state transitions; used for idle-triggered briefings
    #[must_use]
    pub fn watch_playing(&self) -> watch::Receiver<bool> {
        self.inner.playing_tx.subscribe()
    }

    /// Stop the worker permanently (shutdown)
    pub fn close(&self) {
        self.clear();
        self.inner.shutdown.cancel();
        self.inner.notify.notify_one();
    }
}

/// Timeout for one segment, proportional to its estimated duration
fn segment_wait(audio_len: usize) -> (Duration, Duration) {
    let estimate = Duration::from_millis(
        (audio_len as u64 * 1000 / ENCODED_BYTES_PER_SEC).max(500),
    );
    let bound = (estimate * 2 + Duration::from_secs(1)).min(MAX_SEGMENT_WAIT);
    (estimate, bound)
}

async fn worker(inner: Arc<Inner>) {
    loop {
        let segment = {
            let mut queue = inner.queue.lock().expect("playback lock poisoned");
            queue.pop_front()
        };

        let Some(segment) = segment else {
            let _ = inner.playing_tx.send(false);
            inner.barge_in.store(false, Ordering::SeqCst);
            tokio::select! {
                () = inner.shutdown.cancelled() => return,
                () = inner.notify.notified() => continue,
            }
        };

        let _ = inner.playing_tx.send(true);
        let stop = CancellationToken::new();
        if let Ok(mut current) = inner.current_stop.lock() {
            *current = Some(stop.clone());
        }

        let (estimate, bound) = segment_wait(segment.audio.len());
        let started = Instant::now();

        let result =
            tokio::time::timeout(bound, inner.player.play(segment.audio.clone(), &stop)).await;

        match result {
            Ok(Ok(())) => {
                let elapsed = started.elapsed();
                // Premature idle with no barge-in: the platform reported
                // done far too early; honor the estimated duration instead.
                // Only meaningful for segments long enough to estimate.
                if !stop.is_cancelled()
                    && !inner.barge_in.load(Ordering::SeqCst)
                    && estimate >= Duration::from_secs(2)
                    && elapsed < estimate / 4
                {
                    tracing::debug!(?elapsed, ?estimate, "premature idle, re-arming wait");
                    tokio::select! {
                        () = tokio::time::sleep(estimate - elapsed) => {}
                        () = stop.cancelled() => {}
                        () = inner.shutdown.cancelled() => {}
                    }
                }
                tracing::debug!(task = segment.task_id, "segment finished");
            }
            Ok(Err(e)) => {
                tracing::warn!(task = segment.task_id, error = %e, "segment playback failed");
            }
            Err(_) => {
                tracing::warn!(task = segment.task_id, "segment playback timed out");
                stop.cancel();
            }
        }

        if let Ok(mut current) = inner.current_stop.lock() {
            *current = None;
        }

        if inner.shutdown.is_cancelled() {
            let _ = inner.playing_tx.send(false);
            return;
        }
    }
}
