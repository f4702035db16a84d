//! In-flight brain task management
//!
//! Each admitted transcript becomes one task: a background worker that
//! streams the brain reply, synthesizes sentences as they arrive, and
//! feeds the playback queue. Any number of tasks may be in flight; the
//! first ready answer speaks first. Every task hangs off one cancellation
//! root so an interrupt can tear all of them down at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::brain::Brain;
use crate::gate::WakeGate;
use crate::handoff::HandoffRouter;
use crate::history::ConversationStore;
use crate::playback::{PlaybackQueue, Segment};
use crate::synth::Synthesizer;

/// Spoken acknowledgment when a dispatch lands while work is in flight
const BUSY_ACK: &str = "On it.";

/// Buffered sentences between the brain stream and the synth consumer
const SENTENCE_BUFFER: usize = 16;

/// One live task's bookkeeping
struct RunningTask {
    cancel: CancellationToken,
}

/// Owns the active-task map and per-speaker conversation state
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

struct Inner {
    brain: Arc<dyn Brain>,
    synth: Arc<Synthesizer>,
    playback: PlaybackQueue,
    handoff: HandoffRouter,
    history: Arc<ConversationStore>,
    gate: Arc<WakeGate>,
    streaming_tts: bool,
    tasks: Mutex<HashMap<u64, RunningTask>>,
    next_id: AtomicU64,
    root: CancellationToken,
}

impl TaskManager {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        brain: Arc<dyn Brain>,
        synth: Arc<Synthesizer>,
        playback: PlaybackQueue,
        handoff: HandoffRouter,
        history: Arc<ConversationStore>,
        gate: Arc<WakeGate>,
        streaming_tts: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                brain,
                synth,
                playback,
                handoff,
                history,
                gate,
                streaming_tts,
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Dispatch a brain task for an admitted transcript. Appends the user
    /// turn, snapshots history, spawns the worker, and returns immediately.
    pub fn dispatch(&self, speaker: u64, transcript: &str) -> u64 {
        let inner = &self.inner;
        let snapshot = inner.history.append_user_and_snapshot(speaker, transcript);

        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = inner.root.child_token();

        let already_busy = {
            let mut tasks = inner.tasks.lock().expect("task lock poisoned");
            let busy = !tasks.is_empty();
            tasks.insert(id, RunningTask { cancel: cancel.clone() });
            busy
        };

        tracing::info!(task = id, speaker, transcript, "task dispatched");

        let worker_inner = Arc::clone(inner);
        let transcript = transcript.to_string();
        tokio::spawn(async move {
            run_task(worker_inner, id, speaker, transcript, snapshot, cancel, already_busy).await;
        });

        id
    }

    /// Cancel every live task and clear playback; returns the count
    pub fn cancel_all(&self) -> usize {
        let cancelled = {
            let mut tasks = self.inner.tasks.lock().expect("task lock poisoned");
            for task in tasks.values() {
                task.cancel.cancel();
            }
            let n = tasks.len();
            tasks.clear();
            n
        };
        self.inner.playback.clear();
        if cancelled > 0 {
            tracing::info!(cancelled, "all tasks cancelled");
        }
        cancelled
    }

    /// Number of tasks currently in flight
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.tasks.lock().expect("task lock poisoned").len()
    }

    /// Synthesize and enqueue a system phrase (ack, confirmation,
    /// briefing) outside any task
    pub async fn speak_system(&self, text: &str) {
        speak(&self.inner, 0, text).await;
    }
}

/// Synthesize one phrase and enqueue it, honoring the handoff flag
async fn speak(inner: &Inner, task_id: u64, text: &str) {
    if !inner.handoff.is_present() && task_id != 0 {
        inner.handoff.post_handoff(text).await;
        return;
    }

    match inner.synth.synthesize(text).await {
        Ok(Some(audio)) => {
            inner.playback.enqueue(Segment {
                task_id,
                audio,
                text: text.to_string(),
            });
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(task = task_id, error = %e, "sentence synthesis failed, skipping");
        }
    }
}

/// One task's full run: brain stream, per-sentence synthesis, history
async fn run_task(
    inner: Arc<Inner>,
    id: u64,
    speaker: u64,
    transcript: String,
    snapshot: Vec<crate::history::Turn>,
    cancel: CancellationToken,
    already_busy: bool,
) {
    if already_busy {
        speak(&inner, id, BUSY_ACK).await;
    }

    let (sentence_tx, mut sentence_rx) = mpsc::channel::<String>(SENTENCE_BUFFER);

    let brain_fut = inner
        .brain
        .stream_reply(&transcript, &snapshot, &cancel, sentence_tx);

    let streaming = inner.streaming_tts;
    let consumer = async {
        while let Some(sentence) = sentence_rx.recv().await {
            if !streaming || cancel.is_cancelled() {
                // Non-streaming mode speaks the full reply at the end;
                // a cancelled task drains without synthesizing
                continue;
            }
            if inner.handoff.is_present() {
                match inner.synth.synthesize(&sentence).await {
                    Ok(Some(audio)) => {
                        // Synthesis may have outlived a cancellation
                        if cancel.is_cancelled() {
                            continue;
                        }
                        inner.playback.enqueue(Segment {
                            task_id: id,
                            audio,
                            text: sentence,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(task = id, error = %e, "sentence synthesis failed, skipping");
                    }
                }
            } else {
                inner.handoff.post_handoff(&sentence).await;
            }
        }
    };

    let (outcome, ()) = tokio::join!(brain_fut, consumer);

    if !streaming && !outcome.aborted && !outcome.text.is_empty() && !cancel.is_cancelled() {
        speak(&inner, id, &outcome.text).await;
    }

    if outcome.completed() {
        if !outcome.text.is_empty() {
            inner.history.append_assistant(speaker, &outcome.text);
        }
        tracing::info!(task = id, chars = outcome.text.len(), "task completed");
    } else {
        tracing::info!(
            task = id,
            aborted = outcome.aborted,
            errored = outcome.errored,
            "task ended without history append"
        );
    }

    // Any response, error apologies included, restarts the conversation
    // window for the speaker
    if !outcome.aborted {
        inner.gate.mark_responded(speaker);
    }

    inner
        .tasks
        .lock()
        .expect("task lock poisoned")
        .remove(&id);
}
