//! Pre-brain command routing
//!
//! Recognizes short imperative interrupts and bare wake acknowledgments
//! before any brain dispatch happens. Stop matching is whole-utterance,
//! never substring, so a long sentence containing "stop" is not an
//! interrupt.

/// Stop patterns, matched case-insensitively against the whole transcript
/// after trailing punctuation is trimmed
const STOP_PATTERNS: &[&str] = &[
    "stop",
    "cancel",
    "stop talking",
    "that's enough",
    "thats enough",
    "be quiet",
    "shut up",
    "hold on",
    "wait",
    "never mind",
    "nevermind",
    "okay stop",
    "ok stop",
];

/// Routing outcome for an admitted transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedCommand {
    /// Interrupt: cancel tasks, clear playback, confirm briefly
    Stop,
    /// Bare wake with no content: acknowledge and open the window
    WakeOnly,
    /// Ordinary request: dispatch to the brain
    Dispatch(String),
}

/// Routes transcripts to fast paths or brain dispatch
pub struct CommandRouter {
    wake_phrases: Vec<String>,
}

impl CommandRouter {
    /// Create a router. Wake phrases are accepted as optional interrupt
    /// prefixes ("jarvis stop" is still a stop).
    #[must_use]
    pub fn new(wake_phrases: Vec<String>) -> Self {
        let wake_phrases = wake_phrases
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { wake_phrases }
    }

    /// Classify an admitted (already wake-stripped) transcript
    #[must_use]
    pub fn route(&self, transcript: &str) -> RoutedCommand {
        let trimmed = transcript
            .trim()
            .trim_end_matches(['.', '!', '?', ','])
            .trim();
        let lowered = trimmed.to_lowercase();

        // A residual wake prefix may still precede the command
        let command = self
            .wake_phrases
            .iter()
            .find_map(|p| {
                lowered
                    .strip_prefix(p.as_str())
                    .map(|rest| rest.trim_start_matches([',', ' ']).to_string())
            })
            .unwrap_or(lowered);

        if STOP_PATTERNS.contains(&command.as_str()) {
            return RoutedCommand::Stop;
        }

        let content_chars = command.chars().filter(|c| c.is_alphanumeric()).count();
        if content_chars < 2 {
            return RoutedCommand::WakeOnly;
        }

        // Punctuation was trimmed for matching only; dispatch the real text
        RoutedCommand::Dispatch(transcript.trim().to_string())
    }
}
