//! Single-writer, multi-reader broadcast snapshot.
//!
//! Completions publish here the moment they finish: publish-on-completion,
//! not publish-in-enqueue-order. A monotonic sequence guard at this single
//! point of truth prevents a stale job from overwriting a newer one that
//! already displayed; no reordering buffers anywhere.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// The value polled by listener clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSnapshot {
    /// Monotonically increasing; clients detect updates purely by increase.
    pub sequence: u64,
    /// Current translated display text.
    pub text: String,
    /// URL path of the synthesized audio, when available.
    pub audio_ref: Option<String>,
    /// Unix timestamp in milliseconds of the last accepted update.
    pub updated_at: u64,
}

impl ListenerSnapshot {
    fn empty() -> Self {
        Self {
            sequence: 0,
            text: String::new(),
            audio_ref: None,
            updated_at: 0,
        }
    }
}

/// Shared snapshot with a monotonic sequence guard.
///
/// The swap under the lock is the only critical section; readers clone the
/// current value and never hold the lock across I/O.
pub struct ListenerBroadcastState {
    inner: RwLock<ListenerSnapshot>,
}

impl ListenerBroadcastState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ListenerSnapshot::empty()),
        }
    }

    /// Publishes a completed translation.
    ///
    /// Accepted only when `sequence` is at or above the last published
    /// sequence; older completions return false and go nowhere (history
    /// still records them elsewhere). Equal sequence is allowed so a
    /// synthesis completion can enrich the line it belongs to.
    pub fn publish(&self, sequence: u64, text: String, audio_ref: Option<String>) -> bool {
        let mut snapshot = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if sequence < snapshot.sequence {
            debug!(
                sequence,
                published = snapshot.sequence,
                "stale completion, snapshot unchanged"
            );
            return false;
        }
        *snapshot = ListenerSnapshot {
            sequence,
            text,
            audio_ref,
            updated_at: unix_millis(),
        };
        true
    }

    /// Attaches synthesized audio to the currently published line.
    ///
    /// Refused when the snapshot has already moved past `sequence`; the
    /// audio belongs to a line listeners no longer see.
    pub fn attach_audio(&self, sequence: u64, audio_ref: String) -> bool {
        let mut snapshot = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if sequence != snapshot.sequence {
            return false;
        }
        snapshot.audio_ref = Some(audio_ref);
        snapshot.updated_at = unix_millis();
        true
    }

    /// Returns a copy of the current snapshot.
    pub fn snapshot(&self) -> ListenerSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl Default for ListenerBroadcastState {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_initial_snapshot_is_empty() {
        let state = ListenerBroadcastState::new();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.sequence, 0);
        assert!(snapshot.text.is_empty());
        assert!(snapshot.audio_ref.is_none());
    }

    #[test]
    fn test_publish_advances_sequence() {
        let state = ListenerBroadcastState::new();
        assert!(state.publish(1, "first".to_string(), None));
        assert!(state.publish(2, "second".to_string(), None));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.text, "second");
    }

    #[test]
    fn test_stale_completion_does_not_overwrite() {
        // Job 6 completes before job 5: snapshot takes 6, then refuses 5.
        let state = ListenerBroadcastState::new();
        assert!(state.publish(6, "six".to_string(), None));
        assert!(!state.publish(5, "five".to_string(), None));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.sequence, 6);
        assert_eq!(snapshot.text, "six");
    }

    #[test]
    fn test_equal_sequence_republish_allowed() {
        let state = ListenerBroadcastState::new();
        state.publish(3, "text".to_string(), None);
        assert!(state.publish(3, "text".to_string(), Some("/audio/3.mp3".to_string())));
        assert_eq!(
            state.snapshot().audio_ref.as_deref(),
            Some("/audio/3.mp3")
        );
    }

    #[test]
    fn test_attach_audio_to_current_line() {
        let state = ListenerBroadcastState::new();
        state.publish(4, "line".to_string(), None);

        assert!(state.attach_audio(4, "/audio/utterance_4.mp3".to_string()));
        assert_eq!(
            state.snapshot().audio_ref.as_deref(),
            Some("/audio/utterance_4.mp3")
        );
    }

    #[test]
    fn test_attach_audio_refused_for_superseded_line() {
        let state = ListenerBroadcastState::new();
        state.publish(4, "old".to_string(), None);
        state.publish(5, "new".to_string(), None);

        assert!(!state.attach_audio(4, "/audio/utterance_4.mp3".to_string()));
        assert!(state.snapshot().audio_ref.is_none());
    }

    #[test]
    fn test_sequence_non_decreasing_under_interleaving() {
        let state = Arc::new(ListenerBroadcastState::new());
        let mut handles = Vec::new();

        for seq in 1..=50u64 {
            let state = state.clone();
            handles.push(std::thread::spawn(move || {
                state.publish(seq, format!("line {}", seq), None);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Whatever the interleaving, the winner is the highest sequence.
        assert_eq!(state.snapshot().sequence, 50);
    }

    #[test]
    fn test_snapshot_serializes_to_listener_payload() {
        let state = ListenerBroadcastState::new();
        state.publish(7, "Dios es amor".to_string(), None);

        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["text"], "Dios es amor");
        assert!(json["audio_ref"].is_null());
        assert!(json["updated_at"].is_u64());
    }
}
