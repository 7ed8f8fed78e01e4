//! Per-sender method history and the recency rule.
//!
//! The history is append-only. The active method is a pure function of it:
//! the entry with the greatest `observed_at`, with ties going to the entry
//! inserted last. Processing order therefore never changes the answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ClassifiedMethod;

/// One observation of a sender's primary method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodHistoryEntry {
    pub method: ClassifiedMethod,
    pub source_message_id: String,
    /// Send time of the message the method came from.
    pub observed_at: DateTime<Utc>,
    /// Insertion counter, used only to break `observed_at` ties.
    pub sequence: u64,
}

impl MethodHistoryEntry {
    /// Whether this entry records the same observation as `other`.
    pub fn same_observation(&self, message_id: &str, observed_at: DateTime<Utc>) -> bool {
        self.source_message_id == message_id && self.observed_at == observed_at
    }
}

/// Result of [`MethodHistory::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Appended,
    Duplicate,
}

/// A sender's history, kept sorted by `observed_at` descending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodHistory {
    entries: Vec<MethodHistoryEntry>,
}

impl MethodHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored entries in any order.
    pub fn from_entries(mut entries: Vec<MethodHistoryEntry>) -> Self {
        entries.sort_by(|a, b| {
            (b.observed_at, b.sequence).cmp(&(a.observed_at, a.sequence))
        });
        Self { entries }
    }

    /// Record a primary method. Re-observing the same message and send time
    /// is a no-op.
    pub fn observe(
        &mut self,
        method: ClassifiedMethod,
        source_message_id: &str,
        observed_at: DateTime<Utc>,
    ) -> Observation {
        if self
            .entries
            .iter()
            .any(|e| e.same_observation(source_message_id, observed_at))
        {
            return Observation::Duplicate;
        }

        let sequence = self.next_sequence();
        let entry = MethodHistoryEntry {
            method,
            source_message_id: source_message_id.to_string(),
            observed_at,
            sequence,
        };
        // Newest first; an equal timestamp goes in front of its peers.
        let pos = self
            .entries
            .iter()
            .position(|e| e.observed_at <= observed_at)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
        Observation::Appended
    }

    /// Sequence number for the next insertion.
    pub fn next_sequence(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.sequence + 1)
            .max()
            .unwrap_or(0)
    }

    /// The authoritative method for this sender.
    pub fn active(&self) -> Option<&MethodHistoryEntry> {
        active_entry(&self.entries)
    }

    pub fn entries(&self) -> &[MethodHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Max by `(observed_at, sequence)` over any slice of entries.
pub fn active_entry(entries: &[MethodHistoryEntry]) -> Option<&MethodHistoryEntry> {
    entries.iter().max_by_key(|e| (e.observed_at, e.sequence))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::days(n - 1)
    }

    fn get(url: &str) -> ClassifiedMethod {
        ClassifiedMethod::HttpGet { url: url.into() }
    }

    fn reply(addr: &str) -> ClassifiedMethod {
        ClassifiedMethod::EmailReply {
            target: format!("mailto:{addr}"),
            recipient: addr.into(),
            subject: "Unsubscribe".into(),
            body: "Please unsubscribe me from this mailing list.".into(),
        }
    }

    #[test]
    fn newest_observation_wins_in_either_order() {
        let mut forward = MethodHistory::new();
        forward.observe(get("https://a.test/u"), "msg-a", day(1));
        forward.observe(reply("b@a.test"), "msg-b", day(5));

        let mut backward = MethodHistory::new();
        backward.observe(reply("b@a.test"), "msg-b", day(5));
        backward.observe(get("https://a.test/u"), "msg-a", day(1));

        assert_eq!(forward.active().unwrap().source_message_id, "msg-b");
        assert_eq!(backward.active().unwrap().source_message_id, "msg-b");
        assert_eq!(forward.entries()[0].source_message_id, "msg-b");
        assert_eq!(backward.entries()[0].source_message_id, "msg-b");
    }

    #[test]
    fn reobservation_is_idempotent() {
        let mut history = MethodHistory::new();
        assert_eq!(
            history.observe(get("https://a.test/1"), "m1", day(2)),
            Observation::Appended
        );
        let before = history.clone();
        assert_eq!(
            history.observe(get("https://a.test/1"), "m1", day(2)),
            Observation::Duplicate
        );
        assert_eq!(history, before);
    }

    #[test]
    fn same_message_different_time_is_a_new_entry() {
        let mut history = MethodHistory::new();
        history.observe(get("https://a.test/1"), "m1", day(2));
        history.observe(get("https://a.test/1"), "m1", day(3));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn tie_goes_to_later_insertion() {
        let mut history = MethodHistory::new();
        history.observe(get("https://a.test/first"), "m1", day(3));
        history.observe(get("https://a.test/second"), "m2", day(3));
        assert_eq!(history.active().unwrap().method.target(), "https://a.test/second");
        assert_eq!(history.entries()[0].source_message_id, "m2");
    }

    #[test]
    fn rebuild_from_unordered_entries() {
        let mut history = MethodHistory::new();
        history.observe(get("https://a.test/old"), "m1", day(1));
        history.observe(get("https://a.test/new"), "m2", day(9));
        history.observe(get("https://a.test/mid"), "m3", day(4));

        let mut shuffled = history.entries().to_vec();
        shuffled.reverse();
        let rebuilt = MethodHistory::from_entries(shuffled);
        assert_eq!(rebuilt, history);
        assert_eq!(rebuilt.next_sequence(), 3);
    }

    #[test]
    fn empty_history_has_no_active_method() {
        assert!(MethodHistory::new().active().is_none());
    }
}
