//! Configuration from environment variables
//!
//! All settings come from the process environment (see the README for the
//! full list). `Config::from_env` validates required values and applies
//! defaults for the rest; startup fails fast on anything malformed.

use std::collections::HashMap;
use std::time::Duration;

use crate::{Error, Result};

/// Default conversation window after an assistant response (ms)
const DEFAULT_CONVERSATION_WINDOW_MS: u64 = 60_000;

/// Default per-speaker history capacity (turns)
const DEFAULT_HISTORY_CAP: usize = 40;

/// Default idle TTL before a conversation is pruned (ms)
const DEFAULT_CONVERSATION_IDLE_TTL_MS: u64 = 1_800_000;

/// Default alert webhook port
const DEFAULT_ALERT_PORT: u16 = 18990;

/// Default alert webhook bind address (private interface)
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Voice platform bot token
    pub platform_token: String,

    /// Target server (guild) id
    pub server_id: u64,

    /// Voice channel to attach to
    pub voice_channel_id: u64,

    /// Text channel for handoff posts and session notes
    pub text_channel_id: u64,

    /// Users whose speech is captured; the first entry is the designated
    /// speaker whose presence drives handoff and alert briefings
    pub allowed_users: Vec<u64>,

    /// Brain endpoint settings
    pub brain: BrainConfig,

    /// STT provider settings
    pub stt: SttConfig,

    /// TTS provider settings
    pub tts: TtsConfig,

    /// Wake-word gate settings
    pub wake: WakeConfig,

    /// Sentence-level streaming TTS on/off
    pub streaming_tts: bool,

    /// Alert webhook server settings
    pub alert: AlertConfig,

    /// Per-speaker history capacity (turns)
    pub history_cap: usize,

    /// Conversation idle TTL before pruning
    pub conversation_idle_ttl: Duration,
}

/// Brain (chat-completions endpoint) settings
#[derive(Debug, Clone)]
pub struct BrainConfig {
    /// Base URL, e.g. `https://brain.internal:8443`
    pub url: String,

    /// Bearer token
    pub token: String,

    /// Model identifier
    pub model: String,

    /// Stable session key sent in the `user` field
    pub session_user: String,
}

/// Supported STT providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

/// STT settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Primary provider; the other becomes the fallback when its key is set
    pub provider: SttProvider,

    /// `OpenAI` API key (Whisper)
    pub openai_key: Option<String>,

    /// Deepgram API key
    pub deepgram_key: Option<String>,

    /// Case-insensitive token substitutions applied to transcripts,
    /// `from=to` pairs
    pub vocab_fixes: Vec<(String, String)>,
}

/// Supported TTS providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAi,
    ElevenLabs,
}

/// TTS settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Primary provider; the other becomes the fallback when its key is set
    pub provider: TtsProvider,

    /// `OpenAI` API key
    pub openai_key: Option<String>,

    /// `ElevenLabs` API key
    pub elevenlabs_key: Option<String>,

    /// Voice identifier (OpenAI voice name or ElevenLabs voice id)
    pub voice: String,
}

/// Wake-word gate settings
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Whether the gate is active at all
    pub enabled: bool,

    /// Wake phrases, matched case-insensitively at the start of a transcript
    pub phrases: Vec<String>,

    /// Conversation window after an assistant response
    pub window: Duration,
}

/// Alert webhook server settings
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Listen port
    pub port: u16,

    /// Bearer token required on `POST /alert`
    pub token: String,

    /// Bind address
    pub bind_address: String,
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a required variable is missing or a
    /// value fails to parse.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from an explicit variable map
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a required variable is missing or a
    /// value fails to parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let platform_token = require(vars, "VOICE_PLATFORM_TOKEN")?;
        let server_id = parse_id(vars, "SERVER_ID")?;
        let voice_channel_id = parse_id(vars, "VOICE_CHANNEL_ID")?;
        let text_channel_id = parse_id(vars, "TEXT_CHANNEL_ID")?;

        let allowed_users = require(vars, "ALLOWED_USERS")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| Error::Config(format!("ALLOWED_USERS entry not an id: {s}")))
            })
            .collect::<Result<Vec<u64>>>()?;
        if allowed_users.is_empty() {
            return Err(Error::Config("ALLOWED_USERS must list at least one user".into()));
        }

        let brain = BrainConfig {
            url: require(vars, "BRAIN_URL")?,
            token: require(vars, "BRAIN_TOKEN")?,
            model: require(vars, "BRAIN_MODEL")?,
            session_user: optional(vars, "SESSION_USER")
                .unwrap_or_else(|| "chorus-voice".to_string()),
        };

        let stt = SttConfig {
            provider: match optional(vars, "STT_PROVIDER").as_deref() {
                None | Some("whisper") => SttProvider::Whisper,
                Some("deepgram") => SttProvider::Deepgram,
                Some(other) => {
                    return Err(Error::Config(format!("unknown STT_PROVIDER: {other}")));
                }
            },
            openai_key: optional(vars, "OPENAI_API_KEY"),
            deepgram_key: optional(vars, "DEEPGRAM_API_KEY"),
            vocab_fixes: parse_vocab(optional(vars, "STT_VOCAB_FIXES").as_deref())?,
        };

        let tts = TtsConfig {
            provider: match optional(vars, "TTS_PROVIDER").as_deref() {
                None | Some("openai") => TtsProvider::OpenAi,
                Some("elevenlabs") => TtsProvider::ElevenLabs,
                Some(other) => {
                    return Err(Error::Config(format!("unknown TTS_PROVIDER: {other}")));
                }
            },
            openai_key: optional(vars, "OPENAI_API_KEY"),
            elevenlabs_key: optional(vars, "ELEVENLABS_API_KEY"),
            voice: optional(vars, "TTS_VOICE").unwrap_or_else(|| "alloy".to_string()),
        };

        let wake = WakeConfig {
            enabled: parse_bool(vars, "WAKE_WORD_ENABLED", false)?,
            phrases: optional(vars, "WAKE_WORD_PHRASES")
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_lowercase())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            window: Duration::from_millis(parse_u64(
                vars,
                "CONVERSATION_WINDOW_MS",
                DEFAULT_CONVERSATION_WINDOW_MS,
            )?),
        };

        if wake.enabled && wake.phrases.is_empty() {
            return Err(Error::Config(
                "WAKE_WORD_ENABLED requires WAKE_WORD_PHRASES".into(),
            ));
        }

        let alert = AlertConfig {
            port: parse_u64(vars, "ALERT_WEBHOOK_PORT", u64::from(DEFAULT_ALERT_PORT))?
                .try_into()
                .map_err(|_| Error::Config("ALERT_WEBHOOK_PORT out of range".into()))?,
            token: require(vars, "ALERT_WEBHOOK_TOKEN")?,
            bind_address: optional(vars, "BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
        };

        Ok(Self {
            platform_token,
            server_id,
            voice_channel_id,
            text_channel_id,
            allowed_users,
            brain,
            stt,
            tts,
            wake,
            streaming_tts: parse_bool(vars, "STREAMING_TTS_ENABLED", true)?,
            alert,
            history_cap: parse_u64(vars, "HISTORY_CAP", DEFAULT_HISTORY_CAP as u64)? as usize,
            conversation_idle_ttl: Duration::from_millis(parse_u64(
                vars,
                "CONVERSATION_IDLE_TTL_MS",
                DEFAULT_CONVERSATION_IDLE_TTL_MS,
            )?),
        })
    }

    /// The designated speaker: presence transitions of this user drive
    /// handoff routing and alert briefings
    #[must_use]
    pub fn designated_speaker(&self) -> u64 {
        self.allowed_users[0]
    }
}

fn require(vars: &HashMap<String, String>, key: &str) -> Result<String> {
    vars.get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Config(format!("{key} is required")))
}

fn optional(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_id(vars: &HashMap<String, String>, key: &str) -> Result<u64> {
    require(vars, key)?
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{key} is not a numeric id")))
}

fn parse_u64(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64> {
    match optional(vars, key) {
        None => Ok(default),
        Some(s) => s
            .parse::<u64>()
            .map_err(|_| Error::Config(format!("{key} is not a number: {s}"))),
    }
}

fn parse_bool(vars: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match optional(vars, key).as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(Error::Config(format!("{key} is not a boolean: {other}"))),
    }
}

/// Parse `from=to` comma pairs for transcript vocabulary correction
fn parse_vocab(raw: Option<&str>) -> Result<Vec<(String, String)>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(from, to)| (from.trim().to_lowercase(), to.trim().to_string()))
                .filter(|(from, _)| !from.is_empty())
                .ok_or_else(|| Error::Config(format!("STT_VOCAB_FIXES entry not from=to: {pair}")))
        })
        .collect()
}
