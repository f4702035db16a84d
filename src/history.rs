//! Per-speaker conversation history
//!
//! In-process and best-effort by design: bounded, pruned on inactivity,
//! gone on restart. Appends are serialized per store lock and dispatch
//! snapshots are taken under that same lock, so a task always sees the
//! history as of its own dispatch.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Speaker role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One speaker's bounded conversation
#[derive(Debug)]
struct Conversation {
    turns: VecDeque<Turn>,
    last_activity: Instant,
}

impl Conversation {
    fn new() -> Self {
        Self {
            turns: VecDeque::new(),
            last_activity: Instant::now(),
        }
    }
}

/// Bounded per-speaker conversation store
pub struct ConversationStore {
    inner: Mutex<HashMap<u64, Conversation>>,
    cap: usize,
    idle_ttl: Duration,
}

impl ConversationStore {
    /// Create a store with the given per-speaker capacity and idle TTL
    #[must_use]
    pub fn new(cap: usize, idle_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            cap,
            idle_ttl,
        }
    }

    /// Append a user turn and return a read-only snapshot of the history
    /// including it, atomically
    pub fn append_user_and_snapshot(&self, speaker: u64, content: &str) -> Vec<Turn> {
        let mut map = self.inner.lock().expect("conversation lock poisoned");
        let conv = map.entry(speaker).or_insert_with(Conversation::new);
        push_bounded(&mut conv.turns, Turn::user(content), self.cap);
        conv.last_activity = Instant::now();
        conv.turns.iter().cloned().collect()
    }

    /// Append an assistant turn. Called at most once per task, after a
    /// non-aborted stream end.
    pub fn append_assistant(&self, speaker: u64, content: &str) {
        let mut map = self.inner.lock().expect("conversation lock poisoned");
        let conv = map.entry(speaker).or_insert_with(Conversation::new);
        push_bounded(&mut conv.turns, Turn::assistant(content), self.cap);
        conv.last_activity = Instant::now();
    }

    /// Current turn count for a speaker
    #[must_use]
    pub fn len(&self, speaker: u64) -> usize {
        self.inner
            .lock()
            .expect("conversation lock poisoned")
            .get(&speaker)
            .map_or(0, |c| c.turns.len())
    }

    /// Whether the speaker has no recorded history
    #[must_use]
    pub fn is_empty(&self, speaker: u64) -> bool {
        self.len(speaker) == 0
    }

    /// Most recent user turn for a speaker, with its age
    #[must_use]
    pub fn last_user_turn(&self, speaker: u64) -> Option<(String, Duration)> {
        let map = self.inner.lock().expect("conversation lock poisoned");
        let conv = map.get(&speaker)?;
        let turn = conv.turns.iter().rev().find(|t| t.role == Role::User)?;
        Some((turn.content.clone(), conv.last_activity.elapsed()))
    }

    /// Drop conversations idle past the TTL; returns how many were pruned
    pub fn prune_idle(&self) -> usize {
        let mut map = self.inner.lock().expect("conversation lock poisoned");
        let before = map.len();
        map.retain(|_, conv| conv.last_activity.elapsed() < self.idle_ttl);
        let pruned = before - map.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned idle conversations");
        }
        pruned
    }
}

/// Append with oldest-first eviction past `cap`
fn push_bounded(turns: &mut VecDeque<Turn>, turn: Turn, cap: usize) {
    turns.push_back(turn);
    while turns.len() > cap {
        turns.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(40, Duration::from_secs(1800))
    }

    #[test]
    fn snapshot_includes_the_appended_turn() {
        let store = store();
        let snapshot = store.append_user_and_snapshot(1, "hello");

        assert_eq!(snapshot, vec![Turn::user("hello")]);
    }

    #[test]
    fn snapshots_are_isolated_from_later_appends() {
        let store = store();
        let first = store.append_user_and_snapshot(1, "one");
        store.append_assistant(1, "reply");
        let second = store.append_user_and_snapshot(1, "two");

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn consecutive_dispatch_snapshots_differ_by_one_user_turn() {
        let store = store();
        let a = store.append_user_and_snapshot(1, "same thing");
        let b = store.append_user_and_snapshot(1, "same thing");

        assert_eq!(b.len() - a.len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let store = ConversationStore::new(3, Duration::from_secs(1800));
        for i in 0..5 {
            store.append_user_and_snapshot(1, &format!("turn {i}"));
        }

        let snapshot = store.append_user_and_snapshot(1, "last");
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].content, "turn 4");
        assert_eq!(snapshot[2].content, "last");
    }

    #[test]
    fn history_never_exceeds_cap() {
        let store = ConversationStore::new(4, Duration::from_secs(1800));
        for i in 0..20 {
            store.append_user_and_snapshot(1, &format!("u{i}"));
            store.append_assistant(1, &format!("a{i}"));
            assert!(store.len(1) <= 4);
        }
    }

    #[test]
    fn speakers_are_independent() {
        let store = store();
        store.append_user_and_snapshot(1, "from one");
        store.append_user_and_snapshot(2, "from two");

        assert_eq!(store.len(1), 1);
        assert_eq!(store.len(2), 1);
    }

    #[test]
    fn prune_drops_only_idle_conversations() {
        let store = ConversationStore::new(40, Duration::from_millis(0));
        store.append_user_and_snapshot(1, "old");

        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(store.prune_idle(), 1);
        assert!(store.is_empty(1));
    }

    #[test]
    fn last_user_turn_skips_assistant_turns() {
        let store = store();
        store.append_user_and_snapshot(1, "the question");
        store.append_assistant(1, "the answer");

        let (content, _age) = store.last_user_turn(1).unwrap();
        assert_eq!(content, "the question");
    }

    #[test]
    fn roles_serialize_lowercase() {
        let turn = Turn::user("hi");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
    }
}
