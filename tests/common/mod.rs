//! Shared test doubles for pipeline tests
//!
//! The mock TTS encodes the sentence text as the audio bytes, so the mock
//! platform can record exactly which sentences reached the player and in
//! what order.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chorus_bridge::brain::{Brain, BrainOutcome};
use chorus_bridge::commands::CommandRouter;
use chorus_bridge::gate::WakeGate;
use chorus_bridge::handoff::HandoffRouter;
use chorus_bridge::history::{ConversationStore, Turn};
use chorus_bridge::platform::VoicePlatform;
use chorus_bridge::playback::PlaybackQueue;
use chorus_bridge::sentence::{clean_for_speech, SentenceSplitter};
use chorus_bridge::synth::{Synthesizer, TextToSpeech};
use chorus_bridge::tasks::TaskManager;
use chorus_bridge::Result;

/// Default speaker id used across scenarios
pub const SPEAKER: u64 = 42;

/// Records played audio (as text) and posted messages
pub struct MockPlatform {
    pub played: Mutex<Vec<String>>,
    pub posts: Mutex<Vec<String>>,
    hold: Duration,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            played: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
            hold: Duration::from_millis(30),
        })
    }

    pub fn played_texts(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn posted_texts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoicePlatform for MockPlatform {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn play(&self, audio: Vec<u8>, stop: &CancellationToken) -> Result<()> {
        self.played
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&audio).into_owned());
        tokio::select! {
            () = tokio::time::sleep(self.hold) => {}
            () = stop.cancelled() => {}
        }
        Ok(())
    }

    async fn post_text(&self, content: &str) -> Result<()> {
        self.posts.lock().unwrap().push(content.to_string());
        Ok(())
    }

    async fn dm_user(&self, _user: u64, content: &str) -> Result<()> {
        self.posts.lock().unwrap().push(content.to_string());
        Ok(())
    }
}

/// TTS double that emits the sentence text as the audio bytes
pub struct EchoTts;

#[async_trait]
impl TextToSpeech for EchoTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Scripted brain: per-transcript reply and delay, streamed through the
/// real sentence splitter
pub struct ScriptedBrain {
    script: Mutex<HashMap<String, (Duration, String)>>,
    pub calls: AtomicUsize,
}

impl ScriptedBrain {
    #[must_use]
    pub fn new(entries: &[(&str, u64, &str)]) -> Arc<Self> {
        let script = entries
            .iter()
            .map(|(transcript, delay_ms, reply)| {
                (
                    (*transcript).to_string(),
                    (Duration::from_millis(*delay_ms), (*reply).to_string()),
                )
            })
            .collect();
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Brain for ScriptedBrain {
    async fn stream_reply(
        &self,
        transcript: &str,
        _history: &[Turn],
        cancel: &CancellationToken,
        sentences: mpsc::Sender<String>,
    ) -> BrainOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (delay, reply) = self
            .script
            .lock()
            .unwrap()
            .get(transcript)
            .cloned()
            .unwrap_or((Duration::from_millis(5), "Okay.".to_string()));

        tokio::select! {
            () = cancel.cancelled() => {
                return BrainOutcome {
                    text: String::new(),
                    aborted: true,
                    errored: false,
                };
            }
            () = tokio::time::sleep(delay) => {}
        }

        let mut splitter = SentenceSplitter::new();
        for sentence in splitter.push(&reply) {
            if sentences.send(sentence).await.is_err() {
                break;
            }
        }
        if let Some(rest) = splitter.flush() {
            let _ = sentences.send(rest).await;
        }

        BrainOutcome {
            text: clean_for_speech(&reply),
            aborted: false,
            errored: false,
        }
    }
}

/// Fully-wired pipeline against mocks
pub struct Harness {
    pub platform: Arc<MockPlatform>,
    pub playback: PlaybackQueue,
    pub handoff: HandoffRouter,
    pub history: Arc<ConversationStore>,
    pub gate: Arc<WakeGate>,
    pub router: CommandRouter,
    pub tasks: TaskManager,
    pub brain: Arc<ScriptedBrain>,
}

/// Build a harness with the given brain script. Wake gating starts
/// disabled; the designated speaker starts present.
pub async fn harness(script: &[(&str, u64, &str)]) -> Harness {
    harness_with_gate(script, false, &[]).await
}

/// Harness variant with wake-word gating configured
pub async fn harness_with_gate(
    script: &[(&str, u64, &str)],
    wake_enabled: bool,
    wake_phrases: &[&str],
) -> Harness {
    let platform = MockPlatform::new();
    let playback = PlaybackQueue::new(Arc::clone(&platform) as Arc<dyn VoicePlatform>);
    let handoff = HandoffRouter::new(Arc::clone(&platform) as Arc<dyn VoicePlatform>);
    let history = Arc::new(ConversationStore::new(40, Duration::from_secs(1800)));
    let gate = Arc::new(WakeGate::new(
        wake_enabled,
        wake_phrases.iter().map(|s| (*s).to_string()).collect(),
        Duration::from_secs(60),
    ));
    let router = CommandRouter::new(wake_phrases.iter().map(|s| (*s).to_string()).collect());
    let brain = ScriptedBrain::new(script);
    let synth = Arc::new(Synthesizer::new(vec![Box::new(EchoTts)]));

    let tasks = TaskManager::new(
        Arc::clone(&brain) as Arc<dyn Brain>,
        synth,
        playback.clone(),
        handoff.clone(),
        Arc::clone(&history),
        Arc::clone(&gate),
        true,
    );

    // The designated speaker is in the channel unless a test says otherwise
    handoff.on_presence_change(true, SPEAKER, true, &history).await;

    Harness {
        platform,
        playback,
        handoff,
        history,
        gate,
        router,
        tasks,
        brain,
    }
}

/// Poll a condition until it holds or the timeout expires
pub async fn wait_until<F: Fn() -> bool>(what: &str, timeout: Duration, cond: F) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for all tasks to finish and playback to drain
pub async fn wait_quiescent(h: &Harness) {
    wait_until("tasks to finish", Duration::from_secs(5), || {
        h.tasks.active_count() == 0
    })
    .await;
    wait_until("playback to drain", Duration::from_secs(5), || {
        !h.playback.is_playing() && h.playback.queued_len() == 0
    })
    .await;
}
