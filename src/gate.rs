//! Wake-word and conversation-window gating
//!
//! Decides whether a transcript is addressed to the assistant. After the
//! assistant responds, a per-speaker conversation window stays open so
//! follow-ups need no wake phrase.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How many leading tokens are scanned for a wake phrase, tolerating STT
/// noise before the phrase itself
const WAKE_SCAN_TOKENS: usize = 5;

/// Outcome of gating a transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    /// Whether the transcript should proceed downstream
    pub admit: bool,
    /// Transcript with any matched wake phrase stripped
    pub transcript: String,
    /// True when admission came from the open conversation window rather
    /// than a wake phrase
    pub via_window: bool,
}

impl GateDecision {
    fn reject() -> Self {
        Self {
            admit: false,
            transcript: String::new(),
            via_window: false,
        }
    }
}

/// Gates transcripts on wake phrases and the conversation window
pub struct WakeGate {
    enabled: bool,
    phrases: Vec<String>,
    window: Duration,
    last_response: Mutex<HashMap<u64, Instant>>,
}

impl WakeGate {
    /// Create a gate. `phrases` are normalized to lowercase.
    #[must_use]
    pub fn new(enabled: bool, phrases: Vec<String>, window: Duration) -> Self {
        let phrases = phrases
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            enabled,
            phrases,
            window,
            last_response: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate a transcript for a speaker at time `now`
    ///
    /// With the gate disabled every transcript is admitted unchanged.
    #[must_use]
    pub fn evaluate(&self, transcript: &str, speaker: u64, now: Instant) -> GateDecision {
        if !self.enabled {
            return GateDecision {
                admit: true,
                transcript: transcript.to_string(),
                via_window: false,
            };
        }

        if self.window_open(speaker, now) {
            tracing::debug!(speaker, "conversation window open, admitting");
            return GateDecision {
                admit: true,
                transcript: transcript.to_string(),
                via_window: true,
            };
        }

        match self.match_wake_phrase(transcript) {
            Some(stripped) => {
                tracing::info!(speaker, transcript, "wake phrase detected");
                GateDecision {
                    admit: true,
                    transcript: stripped,
                    via_window: false,
                }
            }
            None => {
                tracing::debug!(speaker, "no wake phrase, dropping transcript");
                GateDecision::reject()
            }
        }
    }

    /// Record an assistant response so the window restarts for `speaker`.
    /// Error apologies count — a failed answer still leaves the user
    /// mid-conversation.
    pub fn mark_responded(&self, speaker: u64) {
        if let Ok(mut map) = self.last_response.lock() {
            map.insert(speaker, Instant::now());
        }
    }

    /// Whether the conversation window is open for `speaker` at `now`
    #[must_use]
    pub fn window_open(&self, speaker: u64, now: Instant) -> bool {
        self.last_response
            .lock()
            .ok()
            .and_then(|map| map.get(&speaker).copied())
            .is_some_and(|at| now.duration_since(at) < self.window)
    }

    /// Match a wake phrase within the first few tokens; returns the
    /// transcript with the phrase (and everything before it) stripped
    fn match_wake_phrase(&self, transcript: &str) -> Option<String> {
        let lowered = transcript.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();

        for phrase in &self.phrases {
            let phrase_tokens: Vec<&str> = phrase.split_whitespace().collect();
            if phrase_tokens.is_empty() {
                continue;
            }

            for start in 0..WAKE_SCAN_TOKENS.min(tokens.len()) {
                if tokens_match(&tokens[start..], &phrase_tokens) {
                    let stripped = tokens
                        .iter()
                        .skip(start + phrase_tokens.len())
                        .copied()
                        .collect::<Vec<_>>()
                        .join(" ");
                    return Some(stripped);
                }
            }
        }
        None
    }
}

/// Compare transcript tokens against phrase tokens, ignoring punctuation
/// stuck to transcript tokens ("jarvis," vs "jarvis")
fn tokens_match(tokens: &[&str], phrase: &[&str]) -> bool {
    if tokens.len() < phrase.len() {
        return false;
    }
    phrase
        .iter()
        .zip(tokens)
        .all(|(p, t)| t.trim_matches(|c: char| !c.is_alphanumeric()) == *p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> WakeGate {
        WakeGate::new(
            true,
            vec!["jarvis".to_string(), "hey jarvis".to_string()],
            Duration::from_secs(60),
        )
    }

    #[test]
    fn disabled_gate_admits_unchanged() {
        let gate = WakeGate::new(false, vec![], Duration::from_secs(60));
        let decision = gate.evaluate("whatever was said", 1, Instant::now());

        assert!(decision.admit);
        assert_eq!(decision.transcript, "whatever was said");
    }

    #[test]
    fn wake_phrase_admits_and_strips() {
        let decision = gate().evaluate("Jarvis, what time is it", 1, Instant::now());

        assert!(decision.admit);
        assert!(!decision.via_window);
        assert_eq!(decision.transcript, "what time is it");
    }

    #[test]
    fn multi_word_phrase_matches() {
        let decision = gate().evaluate("hey jarvis turn it down", 1, Instant::now());

        assert!(decision.admit);
        assert_eq!(decision.transcript, "turn it down");
    }

    #[test]
    fn phrase_within_leading_tokens_matches() {
        // STT noise ahead of the phrase is tolerated
        let decision = gate().evaluate("um so Jarvis what's up", 1, Instant::now());

        assert!(decision.admit);
        assert_eq!(decision.transcript, "what's up");
    }

    #[test]
    fn phrase_deep_in_sentence_does_not_match() {
        let decision = gate().evaluate(
            "I was telling my friend all about how jarvis works",
            1,
            Instant::now(),
        );

        assert!(!decision.admit);
    }

    #[test]
    fn no_phrase_rejects() {
        let decision = gate().evaluate("what time is it", 1, Instant::now());
        assert!(!decision.admit);
    }

    #[test]
    fn window_admits_without_phrase() {
        let gate = gate();
        gate.mark_responded(1);

        let decision = gate.evaluate("and tomorrow?", 1, Instant::now());
        assert!(decision.admit);
        assert!(decision.via_window);
        assert_eq!(decision.transcript, "and tomorrow?");
    }

    #[test]
    fn window_is_per_speaker() {
        let gate = gate();
        gate.mark_responded(1);

        assert!(!gate.evaluate("and tomorrow?", 2, Instant::now()).admit);
    }

    #[test]
    fn window_expires() {
        let gate = WakeGate::new(true, vec!["jarvis".to_string()], Duration::from_millis(0));
        gate.mark_responded(1);

        let later = Instant::now() + Duration::from_millis(5);
        assert!(!gate.evaluate("still there?", 1, later).admit);
    }
}
