//! Sentence synthesis
//!
//! Turns each emitted sentence into a playable audio blob via the TTS
//! provider cascade. Text is sanitized first; a sentence that is nothing
//! but punctuation after sanitation skips synthesis entirely.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{TtsConfig, TtsProvider};
use crate::{Error, Result};

/// `OpenAI` speech endpoint
const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// `OpenAI` speech model
const OPENAI_TTS_MODEL: &str = "tts-1";

/// `ElevenLabs` API root; the voice id goes in the path
const ELEVENLABS_API: &str = "https://api.elevenlabs.io/v1";

/// `ElevenLabs` low-latency model
const ELEVENLABS_MODEL: &str = "eleven_turbo_v2";

/// Provider connection must come up this fast or the cascade moves on
const TTS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on one whole synthesis request
const TTS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn tts_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(TTS_CONNECT_TIMEOUT)
        .timeout(TTS_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Tts(format!("client build: {e}")))
}

/// A single TTS backend
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize text into an encoded audio blob (MP3)
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Provider label for logging
    fn name(&self) -> &'static str;
}

/// `OpenAI` TTS backend
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: String,
    voice: String,
}

impl OpenAiTts {
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String, voice: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OPENAI_API_KEY is required for the openai voice".to_string(),
            ));
        }
        Ok(Self {
            client: tts_client()?,
            api_key,
            voice,
        })
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "model": OPENAI_TTS_MODEL,
            "voice": self.voice,
            "input": text,
            "response_format": "mp3",
        });

        let response = self
            .client
            .post(OPENAI_SPEECH_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %detail, "openai speech request rejected");
            return Err(Error::Tts(format!("openai speech returned {status}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "openai speech synthesized");
        Ok(audio.to_vec())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// `ElevenLabs` TTS backend
pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
}

impl ElevenLabsTts {
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String, voice_id: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ELEVENLABS_API_KEY is required for the elevenlabs voice".to_string(),
            ));
        }
        Ok(Self {
            client: tts_client()?,
            api_key,
            voice_id,
        })
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{ELEVENLABS_API}/text-to-speech/{}", self.voice_id);
        let body = serde_json::json!({
            "text": text,
            "model_id": ELEVENLABS_MODEL,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
            },
        });

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %detail, "elevenlabs request rejected");
            return Err(Error::Tts(format!("elevenlabs returned {status}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "elevenlabs speech synthesized");
        Ok(audio.to_vec())
    }

    fn name(&self) -> &'static str {
        "elevenlabs"
    }
}

/// Cascading synthesizer with input sanitation
pub struct Synthesizer {
    providers: Vec<Box<dyn TextToSpeech>>,
}

impl Synthesizer {
    /// Build the provider cascade from configuration: the selected
    /// provider first, any other keyed provider as fallback
    ///
    /// # Errors
    ///
    /// Returns error if no provider has a key configured.
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        let mut providers: Vec<Box<dyn TextToSpeech>> = Vec::new();

        let order = match config.provider {
            TtsProvider::OpenAi => [TtsProvider::OpenAi, TtsProvider::ElevenLabs],
            TtsProvider::ElevenLabs => [TtsProvider::ElevenLabs, TtsProvider::OpenAi],
        };
        for provider in order {
            match provider {
                TtsProvider::OpenAi => {
                    if let Some(key) = &config.openai_key {
                        providers.push(Box::new(OpenAiTts::new(key.clone(), config.voice.clone())?));
                    }
                }
                TtsProvider::ElevenLabs => {
                    if let Some(key) = &config.elevenlabs_key {
                        providers.push(Box::new(ElevenLabsTts::new(
                            key.clone(),
                            config.voice.clone(),
                        )?));
                    }
                }
            }
        }

        if providers.is_empty() {
            return Err(Error::Config("no TTS provider has an API key".to_string()));
        }

        Ok(Self { providers })
    }

    /// Build from explicit providers (tests, custom backends)
    #[must_use]
    pub fn new(providers: Vec<Box<dyn TextToSpeech>>) -> Self {
        Self { providers }
    }

    /// Synthesize a sentence, cascading through providers
    ///
    /// Returns `None` when the sanitized text contains nothing speakable.
    ///
    /// # Errors
    ///
    /// Returns the last provider error when every provider fails.
    pub async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>> {
        let sanitized = sanitize(text);
        if sanitized.chars().all(|c| !c.is_alphanumeric()) {
            tracing::debug!(text, "nothing speakable after sanitation, skipping synthesis");
            return Ok(None);
        }

        let mut last_err = None;
        for provider in &self.providers {
            match provider.synthesize(&sanitized).await {
                Ok(audio) => return Ok(Some(audio)),
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "TTS provider failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Tts("no TTS providers configured".to_string())))
    }
}

/// Strip control characters, zero-width characters, and soft hyphens
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            !c.is_control()
                && !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}' | '\u{00AD}' | '\u{2060}')
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTts(Result<Vec<u8>>);

    #[async_trait]
    impl TextToSpeech for FixedTts {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            match &self.0 {
                Ok(b) => Ok(b.clone()),
                Err(_) => Err(Error::Tts("provider down".to_string())),
            }
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn punctuation_only_skips_synthesis() {
        let synth = Synthesizer::new(vec![Box::new(FixedTts(Ok(vec![1])))]);
        assert_eq!(synth.synthesize("...!?").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_width_characters_are_stripped() {
        assert_eq!(sanitize("he\u{200B}llo\u{00AD} there\u{FEFF}"), "hello there");
    }

    #[tokio::test]
    async fn cascade_falls_through_on_error() {
        let synth = Synthesizer::new(vec![
            Box::new(FixedTts(Err(Error::Tts("down".to_string())))),
            Box::new(FixedTts(Ok(vec![7, 7]))),
        ]);

        assert_eq!(synth.synthesize("say this").await.unwrap(), Some(vec![7, 7]));
    }

    #[tokio::test]
    async fn all_providers_failing_is_an_error() {
        let synth = Synthesizer::new(vec![Box::new(FixedTts(Err(Error::Tts("down".to_string()))))]);
        assert!(synth.synthesize("say this").await.is_err());
    }
}
