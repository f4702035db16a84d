//! Handoff routing for an absent speaker
//!
//! When the designated speaker leaves the voice channel mid-stream, the
//! reply they were owed should not evaporate: every sentence produced
//! after the transition is posted to the text channel instead of being
//! synthesized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::history::ConversationStore;
use crate::platform::VoicePlatform;

/// Prefix marking redirected voice output in the text channel
const HANDOFF_MARKER: &str = "🔇 (voice handoff)";

/// A "session ended" note is only worth posting if the last exchange was
/// this recent
const RECENT_SESSION_WINDOW: Duration = Duration::from_secs(120);

/// Routes produced sentences to voice or text based on presence
#[derive(Clone)]
pub struct HandoffRouter {
    platform: Arc<dyn VoicePlatform>,
    present: Arc<AtomicBool>,
}

impl HandoffRouter {
    #[must_use]
    pub fn new(platform: Arc<dyn VoicePlatform>) -> Self {
        Self {
            platform,
            present: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared presence flag, also surfaced by the alert ingress response
    #[must_use]
    pub fn presence_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.present)
    }

    /// Whether the designated speaker is currently in the voice channel
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    /// Record a presence transition. On departure with a recent exchange
    /// and no in-flight work, posts a short session-ended note.
    pub async fn on_presence_change(
        &self,
        joined: bool,
        speaker: u64,
        quiescent: bool,
        history: &ConversationStore,
    ) {
        let was_present = self.present.swap(joined, Ordering::SeqCst);
        if was_present == joined {
            return;
        }

        tracing::info!(speaker, joined, "designated speaker presence changed");

        if !joined && quiescent {
            if let Some((last, age)) = history.last_user_turn(speaker) {
                if age < RECENT_SESSION_WINDOW {
                    let note = format!("Session ended — last topic: \"{last}\"");
                    if let Err(e) = self.platform.post_text(&note).await {
                        tracing::warn!(error = %e, "session-ended note failed");
                    }
                }
            }
        }
    }

    /// Post a redirected sentence to the text channel
    pub async fn post_handoff(&self, text: &str) {
        let content = format!("{HANDOFF_MARKER} {text}");
        if let Err(e) = self.platform.post_text(&content).await {
            tracing::warn!(error = %e, "handoff post failed");
        }
    }
}
