//! Discord adapter using serenity and songbird
//!
//! Serenity drives the gateway and text channels; songbird carries the
//! voice session. Decoded 20 ms voice ticks are mapped from SSRC to user
//! and forwarded as [`PlatformEvent`]s; playback goes through songbird's
//! in-memory input with a track-end wait.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::{ChannelId, GatewayIntents, GuildId, Ready, UserId, VoiceState};
use serenity::client::{Client, Context, EventHandler};
use songbird::events::context_data::VoiceTick;
use songbird::{Call, CoreEvent, Event, EventContext, SerenityInit as _, Songbird, TrackEvent};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{PlatformEvent, VoicePlatform};
use crate::{Error, Result};

/// Voice session readiness wait
const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered platform events; voice ticks arrive every 20 ms
const EVENT_BUFFER: usize = 256;

/// Discord voice platform adapter
pub struct DiscordPlatform {
    token: String,
    server_id: u64,
    voice_channel_id: u64,
    text_channel_id: u64,
    songbird: Arc<Songbird>,
    http: Mutex<Option<Arc<serenity::http::Http>>>,
    event_tx: mpsc::Sender<PlatformEvent>,
    ready_rx: watch::Receiver<bool>,
    ready_tx: watch::Sender<bool>,
    gateway_started: AtomicBool,
    handlers_registered: Arc<AtomicBool>,
}

impl DiscordPlatform {
    /// Create the adapter and the receiver for its platform events
    #[must_use]
    pub fn with_receiver(
        token: String,
        server_id: u64,
        voice_channel_id: u64,
        text_channel_id: u64,
    ) -> (Arc<Self>, mpsc::Receiver<PlatformEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (ready_tx, ready_rx) = watch::channel(false);

        let config = songbird::Config::default().decode_mode(songbird::driver::DecodeMode::Decode);
        let platform = Arc::new(Self {
            token,
            server_id,
            voice_channel_id,
            text_channel_id,
            songbird: Songbird::serenity_from_config(config),
            http: Mutex::new(None),
            event_tx,
            ready_rx,
            ready_tx,
            gateway_started: AtomicBool::new(false),
            handlers_registered: Arc::new(AtomicBool::new(false)),
        });
        (platform, event_rx)
    }

    fn http(&self) -> Result<Arc<serenity::http::Http>> {
        self.http
            .lock()
            .ok()
            .and_then(|h| h.clone())
            .ok_or_else(|| Error::Platform("gateway not connected".to_string()))
    }

    /// Join the voice channel and wire driver event handlers
    async fn join_voice(&self) -> Result<()> {
        let guild = GuildId::new(self.server_id);
        let channel = ChannelId::new(self.voice_channel_id);

        let call_lock = self
            .songbird
            .join(guild, channel)
            .await
            .map_err(|e| Error::Platform(format!("voice join failed: {e}")))?;

        if !self.handlers_registered.swap(true, Ordering::SeqCst) {
            let mut call = call_lock.lock().await;
            register_driver_handlers(&mut call, self.event_tx.clone());
        }

        tracing::info!(
            server = self.server_id,
            channel = self.voice_channel_id,
            "voice channel joined"
        );
        Ok(())
    }

    async fn start_gateway(&self) -> Result<()> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_VOICE_STATES
            | GatewayIntents::GUILD_MESSAGES;

        let handler = GatewayHandler {
            songbird: Arc::clone(&self.songbird),
            server_id: self.server_id,
            voice_channel_id: self.voice_channel_id,
            event_tx: self.event_tx.clone(),
            ready_tx: self.ready_tx.clone(),
            handlers_registered: Arc::clone(&self.handlers_registered),
        };

        let client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .register_songbird_with(Arc::clone(&self.songbird))
            .await
            .map_err(|e| Error::Platform(format!("gateway client: {e}")))?;

        if let Ok(mut http) = self.http.lock() {
            *http = Some(Arc::clone(&client.http));
        }

        let mut runner = client;
        tokio::spawn(async move {
            if let Err(e) = runner.start().await {
                tracing::error!(error = %e, "gateway client stopped");
            }
        });

        Ok(())
    }
}

#[async_trait]
impl VoicePlatform for DiscordPlatform {
    async fn connect(&self) -> Result<()> {
        if self.gateway_started.swap(true, Ordering::SeqCst) {
            // Gateway already up: this is a voice-session reconnect
            return self.join_voice().await;
        }

        self.start_gateway().await?;

        // The ready handler joins voice and flips the watch
        let mut ready = self.ready_rx.clone();
        let wait = async {
            while !*ready.borrow() {
                ready
                    .changed()
                    .await
                    .map_err(|_| Error::Platform("gateway dropped before ready".to_string()))?;
            }
            Ok::<(), Error>(())
        };
        tokio::time::timeout(READY_TIMEOUT, wait)
            .await
            .map_err(|_| Error::Platform("voice channel not ready within 30s".to_string()))??;

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let guild = GuildId::new(self.server_id);
        if let Err(e) = self.songbird.remove(guild).await {
            tracing::debug!(error = %e, "voice leave failed");
        }
        tracing::info!("voice channel left");
        Ok(())
    }

    async fn play(&self, audio: Vec<u8>, stop: &CancellationToken) -> Result<()> {
        let guild = GuildId::new(self.server_id);
        let call_lock = self
            .songbird
            .get(guild)
            .ok_or_else(|| Error::Playback("not in a voice channel".to_string()))?;

        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        let handle = {
            let mut call = call_lock.lock().await;
            call.play_input(audio.into())
        };
        handle
            .add_event(Event::Track(TrackEvent::End), TrackEndNotifier { done_tx: done_tx.clone() })
            .map_err(|e| Error::Playback(format!("track event: {e}")))?;
        handle
            .add_event(Event::Track(TrackEvent::Error), TrackEndNotifier { done_tx })
            .map_err(|e| Error::Playback(format!("track event: {e}")))?;

        tokio::select! {
            _ = done_rx.recv() => Ok(()),
            () = stop.cancelled() => {
                if let Err(e) = handle.stop() {
                    tracing::debug!(error = %e, "track stop failed");
                }
                Ok(())
            }
        }
    }

    async fn post_text(&self, content: &str) -> Result<()> {
        let http = self.http()?;
        ChannelId::new(self.text_channel_id)
            .say(&http, content)
            .await
            .map_err(|e| Error::Platform(format!("text post failed: {e}")))?;
        tracing::debug!(channel = self.text_channel_id, "text posted");
        Ok(())
    }

    async fn dm_user(&self, user: u64, content: &str) -> Result<()> {
        let http = self.http()?;
        let channel = UserId::new(user)
            .create_dm_channel(&http)
            .await
            .map_err(|e| Error::Platform(format!("dm open failed: {e}")))?;
        channel
            .id
            .say(&http, content)
            .await
            .map_err(|e| Error::Platform(format!("dm send failed: {e}")))?;
        Ok(())
    }
}

/// Serenity gateway handler: voice join on ready, presence transitions
struct GatewayHandler {
    songbird: Arc<Songbird>,
    server_id: u64,
    voice_channel_id: u64,
    event_tx: mpsc::Sender<PlatformEvent>,
    ready_tx: watch::Sender<bool>,
    handlers_registered: Arc<AtomicBool>,
}

#[async_trait]
impl EventHandler for GatewayHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, "gateway ready");

        let guild = GuildId::new(self.server_id);
        let channel = ChannelId::new(self.voice_channel_id);

        match self.songbird.join(guild, channel).await {
            Ok(call_lock) => {
                if !self.handlers_registered.swap(true, Ordering::SeqCst) {
                    let mut call = call_lock.lock().await;
                    register_driver_handlers(&mut call, self.event_tx.clone());
                }
                let _ = self.ready_tx.send(true);
                let _ = self.event_tx.send(PlatformEvent::Ready).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "voice join on ready failed");
            }
        }
    }

    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let watched = ChannelId::new(self.voice_channel_id);
        let user = new.user_id.get();

        let was_in = old
            .as_ref()
            .is_some_and(|s| s.channel_id == Some(watched));
        let now_in = new.channel_id == Some(watched);

        if was_in == now_in {
            return;
        }

        tracing::info!(user, joined = now_in, "voice presence changed");
        let _ = self
            .event_tx
            .send(PlatformEvent::Presence { user, joined: now_in })
            .await;
    }
}

/// Register songbird driver handlers for voice RX and disconnects
fn register_driver_handlers(call: &mut Call, event_tx: mpsc::Sender<PlatformEvent>) {
    let receiver = Arc::new(VoiceReceiver {
        event_tx,
        ssrc_users: Mutex::new(HashMap::new()),
        talking: Mutex::new(HashSet::new()),
    });

    call.add_global_event(
        Event::Core(CoreEvent::SpeakingStateUpdate),
        ReceiverHandle(Arc::clone(&receiver)),
    );
    call.add_global_event(
        Event::Core(CoreEvent::VoiceTick),
        ReceiverHandle(Arc::clone(&receiver)),
    );
    call.add_global_event(
        Event::Core(CoreEvent::DriverDisconnect),
        ReceiverHandle(receiver),
    );
}

/// Voice RX state: SSRC to user mapping and who is currently talking
struct VoiceReceiver {
    event_tx: mpsc::Sender<PlatformEvent>,
    ssrc_users: Mutex<HashMap<u32, u64>>,
    talking: Mutex<HashSet<u32>>,
}

impl VoiceReceiver {
    fn user_for(&self, ssrc: u32) -> Option<u64> {
        self.ssrc_users.lock().ok()?.get(&ssrc).copied()
    }

    /// Non-blocking forward; a full buffer drops the event rather than
    /// stalling the voice driver
    fn forward(&self, event: PlatformEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::trace!(error = %e, "platform event dropped");
        }
    }

    fn on_tick(&self, tick: &VoiceTick) {
        let mut talking = match self.talking.lock() {
            Ok(t) => t,
            Err(_) => return,
        };

        for (&ssrc, data) in &tick.speaking {
            if talking.insert(ssrc) {
                if let Some(speaker) = self.user_for(ssrc) {
                    self.forward(PlatformEvent::SpeakingStart { speaker });
                }
            }
            if let Some(decoded) = &data.decoded_voice {
                if let Some(speaker) = self.user_for(ssrc) {
                    self.forward(PlatformEvent::VoiceFrame {
                        speaker,
                        pcm: stereo_to_mono(decoded),
                    });
                }
            }
        }

        for &ssrc in &tick.silent {
            if talking.remove(&ssrc) {
                if let Some(speaker) = self.user_for(ssrc) {
                    self.forward(PlatformEvent::SpeakingEnd { speaker });
                }
            }
        }
    }
}

/// Shared handler registered for each driver event kind
struct ReceiverHandle(Arc<VoiceReceiver>);

#[async_trait]
impl songbird::EventHandler for ReceiverHandle {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::SpeakingStateUpdate(state) => {
                if let Some(user) = state.user_id {
                    if let Ok(mut map) = self.0.ssrc_users.lock() {
                        map.insert(state.ssrc, user.0);
                    }
                }
            }
            EventContext::VoiceTick(tick) => {
                self.0.on_tick(tick);
            }
            EventContext::DriverDisconnect(_) => {
                tracing::warn!("voice driver disconnected");
                if let Ok(mut talking) = self.0.talking.lock() {
                    talking.clear();
                }
                self.0.forward(PlatformEvent::Disconnected);
            }
            _ => {}
        }
        None
    }
}

/// Track-end notifier used to resolve a play call
struct TrackEndNotifier {
    done_tx: mpsc::Sender<()>,
}

#[async_trait]
impl songbird::EventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let _ = self.done_tx.try_send(());
        None
    }
}

/// Average interleaved stereo samples down to mono
fn stereo_to_mono(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks(2)
        .map(|pair| {
            let sum: i32 = pair.iter().map(|&s| i32::from(s)).sum();
            (sum / pair.len() as i32) as i16
        })
        .collect()
}
