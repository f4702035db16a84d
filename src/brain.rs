//! Streaming brain client
//!
//! Opens a chat-completions stream against the external agent and emits
//! complete sentences as they form, so synthesis can start before the
//! reply finishes. Cancellation tears down the HTTP stream; partial
//! sentences already emitted stay emitted.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::BrainConfig;
use crate::history::{Role, Turn};
use crate::sentence::{clean_for_speech, SentenceSplitter};

/// History entries sent with each request
const HISTORY_WINDOW: usize = 6;

/// Completion token bound
const MAX_TOKENS: u32 = 8192;

/// Wall-clock limit for one streamed reply
const BRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Spoken-output instruction prefixed to the user turn
const VOICE_TAG: &str = "[voice] Respond for spoken output: no markdown, bullets, \
    or code blocks; natural conversational speech. Keep it brief unless asked \
    for detail. ";

/// Spoken fallback for transport failures
const CONNECT_FALLBACK: &str = "I'm having trouble connecting right now. Try again?";

/// Spoken fallback for timeouts and mid-stream failures
const STREAM_FALLBACK: &str = "I had trouble with that one. Try again?";

/// Result of one brain exchange
#[derive(Debug, Clone, Default)]
pub struct BrainOutcome {
    /// Accumulated reply text, cleaned for history storage
    pub text: String,
    /// The cancellation token fired before the stream finished
    pub aborted: bool,
    /// Transport or protocol failure; `text` holds whatever was salvaged
    pub errored: bool,
}

impl BrainOutcome {
    /// True when the reply completed and history should record it
    #[must_use]
    pub fn completed(&self) -> bool {
        !self.aborted && !self.errored
    }
}

/// Seam for the external conversational agent
#[async_trait]
pub trait Brain: Send + Sync {
    /// Stream a reply, emitting complete sentences through `sentences` as
    /// they form. Never fails outright: transport errors surface as a
    /// spoken fallback sentence plus an errored outcome.
    async fn stream_reply(
        &self,
        transcript: &str,
        history: &[Turn],
        cancel: &CancellationToken,
        sentences: mpsc::Sender<String>,
    ) -> BrainOutcome;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    user: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

/// HTTP chat-completions brain client
pub struct BrainClient {
    client: reqwest::Client,
    config: BrainConfig,
}

impl BrainClient {
    #[must_use]
    pub fn new(config: BrainConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn build_messages(&self, transcript: &str, history: &[Turn]) -> Vec<WireMessage> {
        let window_start = history.len().saturating_sub(HISTORY_WINDOW);
        let mut messages: Vec<WireMessage> = history[window_start..]
            .iter()
            .map(|turn| WireMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.content.clone(),
            })
            .collect();

        messages.push(WireMessage {
            role: "user",
            content: format!("{VOICE_TAG}{transcript}"),
        });
        messages
    }
}

#[async_trait]
impl Brain for BrainClient {
    async fn stream_reply(
        &self,
        transcript: &str,
        history: &[Turn],
        cancel: &CancellationToken,
        sentences: mpsc::Sender<String>,
    ) -> BrainOutcome {
        if cancel.is_cancelled() {
            return BrainOutcome {
                aborted: true,
                ..BrainOutcome::default()
            };
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: self.build_messages(transcript, history),
            max_tokens: MAX_TOKENS,
            user: &self.config.session_user,
            stream: true,
        };
        let url = format!(
            "{}/v1/chat/completions",
            self.config.url.trim_end_matches('/')
        );

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.token))
            .json(&request)
            .send();

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return BrainOutcome { aborted: true, ..BrainOutcome::default() };
            }
            result = tokio::time::timeout(BRAIN_TIMEOUT, send) => match result {
                Err(_) => {
                    tracing::warn!("brain request timed out before response");
                    let _ = sentences.send(STREAM_FALLBACK.to_string()).await;
                    return BrainOutcome {
                        text: STREAM_FALLBACK.to_string(),
                        errored: true,
                        ..BrainOutcome::default()
                    };
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "brain request failed");
                    let _ = sentences.send(CONNECT_FALLBACK.to_string()).await;
                    return BrainOutcome {
                        text: CONNECT_FALLBACK.to_string(),
                        errored: true,
                        ..BrainOutcome::default()
                    };
                }
                Ok(Ok(response)) => response,
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(%status, "brain returned non-success");
            let _ = sentences.send(CONNECT_FALLBACK.to_string()).await;
            return BrainOutcome {
                text: CONNECT_FALLBACK.to_string(),
                errored: true,
                ..BrainOutcome::default()
            };
        }

        // Stream SSE lines, feeding the sentence splitter as deltas arrive
        let deadline = tokio::time::Instant::now() + BRAIN_TIMEOUT;
        let mut stream = response.bytes_stream();
        let mut line_buffer = String::new();
        let mut full_text = String::new();
        let mut splitter = SentenceSplitter::new();

        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("brain stream aborted");
                    return BrainOutcome {
                        text: clean_for_speech(&full_text),
                        aborted: true,
                        errored: false,
                    };
                }
                next = tokio::time::timeout_at(deadline, stream.next()) => match next {
                    Err(_) => {
                        tracing::warn!("brain stream timed out");
                        let _ = sentences.send(STREAM_FALLBACK.to_string()).await;
                        return BrainOutcome {
                            text: clean_for_speech(&full_text),
                            aborted: false,
                            errored: true,
                        };
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        tracing::warn!(error = %e, "brain stream error");
                        let _ = sentences.send(STREAM_FALLBACK.to_string()).await;
                        return BrainOutcome {
                            text: clean_for_speech(&full_text),
                            aborted: false,
                            errored: true,
                        };
                    }
                    Ok(Some(Ok(chunk))) => chunk,
                }
            };

            line_buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = line_buffer.find('\n') {
                let line = line_buffer[..line_end].trim().to_string();
                line_buffer.drain(..=line_end);

                let Some(delta) = parse_sse_line(&line) else {
                    continue;
                };

                full_text.push_str(&delta);
                for sentence in splitter.push(&delta) {
                    if sentences.send(sentence).await.is_err() {
                        // Consumer gone; nothing downstream wants the rest
                        return BrainOutcome {
                            text: clean_for_speech(&full_text),
                            aborted: true,
                            errored: false,
                        };
                    }
                }
            }
        }

        if let Some(rest) = splitter.flush() {
            let _ = sentences.send(rest).await;
        }

        let text = clean_for_speech(&full_text);
        tracing::debug!(chars = text.len(), "brain reply complete");
        BrainOutcome {
            text,
            aborted: false,
            errored: false,
        }
    }
}

/// Extract the content delta from one SSE line, if it carries one
fn parse_sse_line(line: &str) -> Option<String> {
    if line.is_empty() || line == "data: [DONE]" {
        return None;
    }
    let json_str = line.strip_prefix("data: ")?;
    let chunk: StreamChunk = serde_json::from_str(json_str).ok()?;
    chunk
        .choices
        .first()
        .and_then(|c| c.delta.content.clone())
        .filter(|c| !c.is_empty())
}
