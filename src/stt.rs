//! Speech-to-text with provider cascade
//!
//! Each utterance is uploaded as WAV to the primary provider; on failure
//! the configured fallbacks are tried in order. A vocabulary-correction
//! pass fixes recurring mishearings before the transcript moves on.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{SttConfig, SttProvider};
use crate::{Error, Result};

/// Whisper transcription endpoint
const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Whisper model used for uploads
const WHISPER_MODEL: &str = "whisper-1";

/// Deepgram prerecorded-audio endpoint; options go in the query string
const DEEPGRAM_URL: &str = "https://api.deepgram.com/v1/listen";

/// Deepgram model
const DEEPGRAM_MODEL: &str = "nova-2";

/// Provider connection must come up this fast or the cascade moves on
const STT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on one whole transcription request
const STT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn stt_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(STT_CONNECT_TIMEOUT)
        .timeout(STT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Stt(format!("client build: {e}")))
}

/// A single STT backend
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe WAV audio to text (possibly empty)
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;

    /// Provider label for logging
    fn name(&self) -> &'static str;
}

/// `OpenAI` Whisper backend
pub struct WhisperStt {
    client: reqwest::Client,
    api_key: String,
}

impl WhisperStt {
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OPENAI_API_KEY is required for the whisper provider".to_string(),
            ));
        }
        Ok(Self {
            client: stt_client()?,
            api_key,
        })
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        let audio = reqwest::multipart::Part::bytes(wav.to_vec())
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(format!("audio part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("model", WHISPER_MODEL)
            .text("response_format", "json")
            .part("file", audio);

        let response = self
            .client
            .post(WHISPER_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %detail, "whisper rejected the upload");
            return Err(Error::Stt(format!("whisper returned {status}")));
        }

        let body: serde_json::Value = response.json().await?;
        let text = body["text"].as_str().unwrap_or_default().to_string();
        tracing::debug!(chars = text.len(), "whisper transcript received");
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

/// Deepgram backend
pub struct DeepgramStt {
    client: reqwest::Client,
    api_key: String,
}

impl DeepgramStt {
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "DEEPGRAM_API_KEY is required for the deepgram provider".to_string(),
            ));
        }
        Ok(Self {
            client: stt_client()?,
            api_key,
        })
    }
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        let response = self
            .client
            .post(DEEPGRAM_URL)
            .query(&[
                ("model", DEEPGRAM_MODEL),
                ("punctuate", "true"),
                ("smart_format", "true"),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %detail, "deepgram rejected the audio");
            return Err(Error::Stt(format!("deepgram returned {status}")));
        }

        // The transcript sits deep in the channel/alternative tree; only
        // the best alternative of the first channel matters here
        let body: serde_json::Value = response.json().await?;
        let text = body
            .pointer("/results/channels/0/alternatives/0/transcript")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        tracing::debug!(chars = text.len(), "deepgram transcript received");
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "deepgram"
    }
}

/// Cascading transcriber with vocabulary correction
pub struct Transcriber {
    providers: Vec<Box<dyn SpeechToText>>,
    vocab_fixes: Vec<(String, String)>,
}

impl Transcriber {
    /// Build the provider cascade from configuration: the selected
    /// provider first, any other keyed provider as fallback
    ///
    /// # Errors
    ///
    /// Returns error if no provider has a key configured.
    pub fn from_config(config: &SttConfig) -> Result<Self> {
        let mut providers: Vec<Box<dyn SpeechToText>> = Vec::new();

        let order = match config.provider {
            SttProvider::Whisper => [SttProvider::Whisper, SttProvider::Deepgram],
            SttProvider::Deepgram => [SttProvider::Deepgram, SttProvider::Whisper],
        };
        for provider in order {
            match provider {
                SttProvider::Whisper => {
                    if let Some(key) = &config.openai_key {
                        providers.push(Box::new(WhisperStt::new(key.clone())?));
                    }
                }
                SttProvider::Deepgram => {
                    if let Some(key) = &config.deepgram_key {
                        providers.push(Box::new(DeepgramStt::new(key.clone())?));
                    }
                }
            }
        }

        if providers.is_empty() {
            return Err(Error::Config("no STT provider has an API key".to_string()));
        }

        Ok(Self {
            providers,
            vocab_fixes: config.vocab_fixes.clone(),
        })
    }

    /// Build from explicit providers (tests, custom backends)
    #[must_use]
    pub fn new(providers: Vec<Box<dyn SpeechToText>>, vocab_fixes: Vec<(String, String)>) -> Self {
        Self {
            providers,
            vocab_fixes,
        }
    }

    /// Transcribe a WAV blob, cascading through providers
    ///
    /// Returns `None` for empty or whitespace-only results: the utterance
    /// carries no usable speech.
    ///
    /// # Errors
    ///
    /// Returns the last provider error when every provider fails.
    pub async fn transcribe(&self, wav: &[u8]) -> Result<Option<String>> {
        let mut last_err = None;

        for provider in &self.providers {
            match provider.transcribe(wav).await {
                Ok(text) => {
                    let corrected = apply_vocab_fixes(&text, &self.vocab_fixes);
                    let trimmed = corrected.trim();
                    if trimmed.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(trimmed.to_string()));
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "STT provider failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Stt("no STT providers configured".to_string())))
    }
}

/// Case-insensitive whole-token substitutions
fn apply_vocab_fixes(text: &str, fixes: &[(String, String)]) -> String {
    if fixes.is_empty() {
        return text.to_string();
    }

    text.split_whitespace()
        .map(|token| {
            let core = token.trim_matches(|c: char| !c.is_alphanumeric());
            let fix = fixes
                .iter()
                .find(|(from, _)| core.eq_ignore_ascii_case(from));
            match fix {
                Some((_, to)) if !core.is_empty() => token.replacen(core, to, 1),
                _ => token.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
