//! Chorus Bridge - real-time voice assistant bridge
//!
//! Bridges a group voice channel to an external conversational agent: the
//! bridge captures each allow-listed speaker's audio, transcribes it,
//! streams a reply from the agent's chat-completions endpoint, and speaks
//! the reply back sentence by sentence.
//!
//! # Architecture
//!
//! ```text
//! voice frames ─► Segmenter ─► Transcriber ─► Wake Gate ─► Command Router
//!                                                               │
//!                        ┌──────────────────────────────────────┤
//!                        ▼                                      ▼
//!                  fast paths (stop,                      Task Manager
//!                  wake ack ─► playback)          (N concurrent brain tasks)
//!                                                               │
//!                                             sentences ─► Synthesizer
//!                                                               │
//!                                            Playback Queue (single player)
//!                                                               │
//!                                                        voice channel
//! ```
//!
//! Conversation history lives in the task manager's store; the handoff
//! router diverts sentences to the text channel when the designated
//! speaker is absent; the alert inbox delivers pushed notifications as a
//! spoken briefing on their return.

pub mod alerts;
pub mod audio;
pub mod brain;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod gate;
pub mod handoff;
pub mod history;
pub mod platform;
pub mod playback;
pub mod sentence;
pub mod stt;
pub mod synth;
pub mod tasks;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
