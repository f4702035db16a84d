//! Voice platform seam
//!
//! The bridge consumes a narrow interface from whatever client talks to the
//! voice service: join a channel, receive per-speaker voice frames with
//! speaking signals, play audio, observe presence, post text. Everything
//! behind this trait is replaceable; the Discord adapter lives in
//! [`discord`].

pub mod discord;

pub use discord::DiscordPlatform;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Events emitted by the platform client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Voice channel joined and ready
    Ready,
    /// A speaker started talking
    SpeakingStart { speaker: u64 },
    /// A speaker stopped talking
    SpeakingEnd { speaker: u64 },
    /// Decoded mono 48 kHz PCM for a speaker (~20 ms per frame)
    VoiceFrame { speaker: u64, pcm: Vec<i16> },
    /// A user joined or left the watched voice channel
    Presence { user: u64, joined: bool },
    /// Voice connection lost; the caller should reconnect
    Disconnected,
}

/// Narrow interface over the voice platform client
#[async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Connect the gateway and join the configured voice channel.
    /// Resolves once the voice session is ready. Safe to call again after
    /// a disconnect.
    async fn connect(&self) -> Result<()>;

    /// Leave the voice channel and shut the gateway down
    async fn disconnect(&self) -> Result<()>;

    /// Play an encoded audio blob into the voice channel, resolving when
    /// the platform reports the track finished. Cancelling `stop` tears the
    /// track down early.
    async fn play(&self, audio: Vec<u8>, stop: &CancellationToken) -> Result<()>;

    /// Post a message to the configured text channel
    async fn post_text(&self, content: &str) -> Result<()>;

    /// Direct-message a user
    async fn dm_user(&self, user: u64, content: &str) -> Result<()>;
}
