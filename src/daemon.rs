//! Daemon - the voice bridge service
//!
//! Wires the platform event stream through segmentation, transcription,
//! gating, and command routing into the task manager, and owns the
//! reconnect and shutdown paths.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::alerts::{briefing_text, AlertInbox, AlertServerState};
use crate::audio::{pcm_to_wav, AudioSegmenter, SegmenterConfig, SegmenterOutput, Utterance};
use crate::brain::{Brain, BrainClient};
use crate::commands::{CommandRouter, RoutedCommand};
use crate::config::Config;
use crate::gate::WakeGate;
use crate::handoff::HandoffRouter;
use crate::history::ConversationStore;
use crate::platform::{DiscordPlatform, PlatformEvent, VoicePlatform};
use crate::playback::PlaybackQueue;
use crate::stt::Transcriber;
use crate::synth::Synthesizer;
use crate::tasks::TaskManager;
use crate::Result;

/// Spoken confirmation after an interrupt
const STOP_CONFIRMATION: &str = "Stopped.";

/// Spoken acknowledgment for a bare wake word
const WAKE_ACK: &str = "Yes?";

/// Reconnect backoff bounds
const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// Conversation prune sweep interval
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Sweep for alerts that became deliverable without a transition
const BRIEFING_SWEEP: Duration = Duration::from_secs(5);

/// The chorus daemon - owns the whole pipeline
pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns an error on fatal startup failure: bad provider config or
    /// an unreachable voice channel.
    #[allow(clippy::too_many_lines)]
    pub async fn run(self) -> Result<()> {
        let config = self.config;

        let transcriber = Arc::new(Transcriber::from_config(&config.stt)?);
        let synth = Arc::new(Synthesizer::from_config(&config.tts)?);
        let brain: Arc<dyn Brain> = Arc::new(BrainClient::new(config.brain.clone()));

        let (platform, mut events) = DiscordPlatform::with_receiver(
            config.platform_token.clone(),
            config.server_id,
            config.voice_channel_id,
            config.text_channel_id,
        );
        let platform: Arc<dyn VoicePlatform> = platform;

        // Voice channel must come up before anything else runs
        platform.connect().await?;

        let playback = PlaybackQueue::new(Arc::clone(&platform));
        let handoff = HandoffRouter::new(Arc::clone(&platform));
        let history = Arc::new(ConversationStore::new(
            config.history_cap,
            config.conversation_idle_ttl,
        ));
        let gate = Arc::new(WakeGate::new(
            config.wake.enabled,
            config.wake.phrases.clone(),
            config.wake.window,
        ));
        let router = Arc::new(CommandRouter::new(config.wake.phrases.clone()));
        let inbox = Arc::new(AlertInbox::default());

        let tasks = TaskManager::new(
            brain,
            Arc::clone(&synth),
            playback.clone(),
            handoff.clone(),
            Arc::clone(&history),
            Arc::clone(&gate),
            config.streaming_tts,
        );

        let shutdown = shutdown_token();

        // Alert ingress on the private interface
        {
            let state = AlertServerState {
                inbox: Arc::clone(&inbox),
                token: config.alert.token.clone(),
                user_in_voice: handoff.presence_flag(),
            };
            let bind = config.alert.bind_address.clone();
            let port = config.alert.port;
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::alerts::serve(state, &bind, port, shutdown).await {
                    tracing::error!(error = %e, "alert ingress stopped");
                }
            });
        }

        let mut segmenter = AudioSegmenter::new(
            SegmenterConfig::default(),
            config.allowed_users.iter().copied(),
        );
        let designated = config.designated_speaker();

        let mut playing_watch = playback.watch_playing();
        let mut prune_timer = tokio::time::interval(PRUNE_INTERVAL);
        let mut briefing_timer = tokio::time::interval(BRIEFING_SWEEP);

        tracing::info!(designated, "chorus bridge running");

        loop {
            let segment_deadline = segmenter.next_deadline();

            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                    break;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::error!("platform event stream closed");
                        break;
                    };
                    match event {
                        PlatformEvent::Ready => {
                            tracing::info!("voice session ready");
                        }
                        PlatformEvent::SpeakingStart { speaker } => {
                            segmenter.on_speaking_start(
                                speaker,
                                Instant::now(),
                                playback.is_playing(),
                            );
                        }
                        PlatformEvent::SpeakingEnd { speaker } => {
                            segmenter.on_speaking_end(speaker, Instant::now());
                        }
                        PlatformEvent::VoiceFrame { speaker, pcm } => {
                            segmenter.on_frame(speaker, &pcm);
                        }
                        PlatformEvent::Presence { user, joined } => {
                            if user == designated {
                                handoff
                                    .on_presence_change(
                                        joined,
                                        user,
                                        tasks.active_count() == 0,
                                        &history,
                                    )
                                    .await;
                                if joined {
                                    try_briefing(&tasks, &playback, &handoff, &inbox).await;
                                }
                            }
                        }
                        PlatformEvent::Disconnected => {
                            segmenter.reset();
                            if !reconnect(&platform, &shutdown).await {
                                break;
                            }
                        }
                    }
                }

                () = deadline_sleep(segment_deadline) => {
                    for output in segmenter.poll(Instant::now()) {
                        match output {
                            SegmenterOutput::BargeIn { speaker } => {
                                tracing::info!(speaker, "barge-in, clearing playback");
                                playback.flag_barge_in();
                                playback.clear();
                            }
                            SegmenterOutput::Utterance(utterance) => {
                                spawn_utterance(
                                    utterance,
                                    Arc::clone(&transcriber),
                                    Arc::clone(&gate),
                                    Arc::clone(&router),
                                    tasks.clone(),
                                );
                            }
                        }
                    }
                }

                changed = playing_watch.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*playing_watch.borrow() {
                        try_briefing(&tasks, &playback, &handoff, &inbox).await;
                    }
                }

                _ = prune_timer.tick() => {
                    history.prune_idle();
                }

                _ = briefing_timer.tick() => {
                    try_briefing(&tasks, &playback, &handoff, &inbox).await;
                }
            }
        }

        // Graceful teardown: cancel tasks, stop audio, leave voice
        tasks.cancel_all();
        playback.close();
        if let Err(e) = platform.disconnect().await {
            tracing::warn!(error = %e, "voice detach failed");
        }
        shutdown.cancel();

        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Token cancelled on SIGINT or SIGTERM
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {}
            () = terminate => {}
        }
        signal_token.cancel();
    });
    token
}

/// Sleep until a segmenter deadline, or forever when none is pending
async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// Reconnect with exponential backoff; false means shutdown interrupted it
async fn reconnect(platform: &Arc<dyn VoicePlatform>, shutdown: &CancellationToken) -> bool {
    let mut delay = RECONNECT_BASE;
    loop {
        tracing::warn!(?delay, "voice disconnected, reconnecting");
        tokio::select! {
            () = shutdown.cancelled() => return false,
            () = tokio::time::sleep(delay) => {}
        }

        match platform.connect().await {
            Ok(()) => {
                tracing::info!("voice reconnected");
                return true;
            }
            Err(e) => {
                tracing::error!(error = %e, "reconnect attempt failed");
                delay = (delay * 2).min(RECONNECT_CAP);
            }
        }
    }
}

/// Deliver a briefing if the floor is free: speaker present, nothing
/// playing, no tasks in flight, alerts pending
async fn try_briefing(
    tasks: &TaskManager,
    playback: &PlaybackQueue,
    handoff: &HandoffRouter,
    inbox: &AlertInbox,
) {
    if !handoff.is_present()
        || playback.is_playing()
        || tasks.active_count() > 0
        || inbox.is_empty()
    {
        return;
    }

    let batch = inbox.drain_for_briefing();
    if batch.is_empty() {
        return;
    }
    let text = briefing_text(&batch);
    tracing::info!(alerts = batch.len(), "delivering alert briefing");
    tasks.speak_system(&text).await;
}

/// Run one utterance through transcription, gating, and routing
fn spawn_utterance(
    utterance: Utterance,
    transcriber: Arc<Transcriber>,
    gate: Arc<WakeGate>,
    router: Arc<CommandRouter>,
    tasks: TaskManager,
) {
    tokio::spawn(async move {
        let speaker = utterance.speaker;
        let wav = match pcm_to_wav(&utterance.pcm, utterance.sample_rate) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(speaker, error = %e, "wav encode failed, utterance dropped");
                return;
            }
        };
        // The PCM buffer is consumed here; nothing downstream sees it
        drop(utterance);

        let transcript = match transcriber.transcribe(&wav).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::debug!(speaker, "empty transcript, utterance dropped");
                return;
            }
            Err(e) => {
                tracing::warn!(speaker, error = %e, "transcription failed, utterance dropped");
                return;
            }
        };

        tracing::info!(speaker, transcript, "utterance transcribed");

        let decision = gate.evaluate(&transcript, speaker, Instant::now());
        if !decision.admit {
            return;
        }

        match router.route(&decision.transcript) {
            RoutedCommand::Stop => {
                let cancelled = tasks.cancel_all();
                tracing::info!(speaker, cancelled, "stop command");
                tasks.speak_system(STOP_CONFIRMATION).await;
                gate.mark_responded(speaker);
            }
            RoutedCommand::WakeOnly => {
                tracing::debug!(speaker, "wake-only utterance");
                tasks.speak_system(WAKE_ACK).await;
                gate.mark_responded(speaker);
            }
            RoutedCommand::Dispatch(text) => {
                tasks.dispatch(speaker, &text);
            }
        }
    });
}
