//! Deduplication tracker for delivered documents.
//!
//! Remembers which document ids have already been emitted, together with
//! their timestamps, so that overlapping look-back windows do not deliver a
//! document twice. Memory stays bounded by pruning everything at or before
//! the start of the current window.

use chrono::{DateTime, FixedOffset, TimeZone};
use esfollow_client::RawTimestamp;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// A delivered document: its timestamp and backend id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp: DateTime<FixedOffset>,
    pub id: String,
}

/// Heap slot ordered by timestamp; ties fall back to insertion order
#[derive(Debug)]
struct Slot {
    entry: Entry,
    seq: u64,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Slot {}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .timestamp
            .cmp(&other.entry.timestamp)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Set of delivered ids plus a min-heap of `(timestamp, id)`.
///
/// Every id in the set has exactly one heap entry and vice versa.
#[derive(Debug, Default)]
pub struct EntryTracker {
    added_ids: HashSet<String>,
    by_timestamp: BinaryHeap<Reverse<Slot>>,
    next_seq: u64,
}

impl EntryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivered document.
    ///
    /// Naive timestamps are taken as UTC. The caller must not add an id that
    /// is already tracked; check [`contains`](Self::contains) first.
    pub fn add(&mut self, id: impl Into<String>, timestamp: impl Into<RawTimestamp>) {
        let id = id.into();
        let timestamp: RawTimestamp = timestamp.into();
        if !timestamp.has_zone() {
            tracing::trace!(%id, "naive timestamp taken as UTC");
        }
        let timestamp = timestamp.normalize();

        self.added_ids.insert(id.clone());
        self.by_timestamp.push(Reverse(Slot {
            entry: Entry { timestamp, id },
            seq: self.next_seq,
        }));
        self.next_seq += 1;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.added_ids.contains(id)
    }

    /// Forget every entry with a timestamp at or before `cutoff`.
    ///
    /// Returns the number of entries removed.
    pub fn prune_before<Tz: TimeZone>(&mut self, cutoff: &DateTime<Tz>) -> usize {
        let cutoff = cutoff.fixed_offset();
        let mut pruned = 0;

        while let Some(Reverse(oldest)) = self.by_timestamp.peek() {
            if oldest.entry.timestamp > cutoff {
                break;
            }
            if let Some(Reverse(slot)) = self.by_timestamp.pop() {
                self.added_ids.remove(&slot.entry.id);
                pruned += 1;
            }
        }

        if pruned > 0 {
            tracing::trace!(pruned, remaining = self.len(), "pruned tracked entries");
        }
        pruned
    }

    /// The entry with the smallest timestamp
    pub fn oldest(&self) -> Option<&Entry> {
        self.by_timestamp.peek().map(|Reverse(slot)| &slot.entry)
    }

    /// All tracked entries, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.by_timestamp.iter().map(|Reverse(slot)| &slot.entry)
    }

    /// Number of tracked ids
    pub fn len(&self) -> usize {
        self.added_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.added_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn test_prune_removes_older_keeps_newer() {
        let mut tracker = EntryTracker::new();
        tracker.add("id-1", at(1));
        tracker.add("id-2", at(3));

        assert!(tracker.contains("id-1"));
        assert!(tracker.contains("id-2"));
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.prune_before(&at(2)), 1);

        assert!(!tracker.contains("id-1"));
        assert!(tracker.contains("id-2"));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.iter().count(), 1);
    }

    #[test]
    fn test_prune_is_inclusive() {
        let mut tracker = EntryTracker::new();
        tracker.add("id-1", at(2));

        tracker.prune_before(&at(2));
        assert!(tracker.is_empty());
        assert!(tracker.oldest().is_none());
    }

    #[test]
    fn test_prune_empty_tracker() {
        let mut tracker = EntryTracker::new();
        assert_eq!(tracker.prune_before(&at(10)), 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_oldest_in_order() {
        let mut tracker = EntryTracker::new();
        tracker.add("id-1", at(1));
        tracker.add("id-2", at(3));

        assert_eq!(tracker.oldest().unwrap().id, "id-1");
    }

    #[test]
    fn test_oldest_reverse_insertion_order() {
        let mut tracker = EntryTracker::new();
        tracker.add("id-1", at(3));
        tracker.add("id-2", at(1));

        let oldest = tracker.oldest().unwrap();
        assert_eq!(oldest.id, "id-2");
        assert_eq!(oldest.timestamp, at(1).fixed_offset());

        tracker.prune_before(&at(1));
        assert_eq!(tracker.oldest().unwrap().id, "id-1");
    }

    #[test]
    fn test_equal_timestamps_pruned_together() {
        let mut tracker = EntryTracker::new();
        tracker.add("a", at(5));
        tracker.add("b", at(5));
        tracker.add("c", at(6));

        assert_eq!(tracker.prune_before(&at(5)), 2);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains("c"));
    }

    #[test]
    fn test_naive_timestamp_gets_utc() {
        let mut tracker = EntryTracker::new();
        let naive = NaiveDate::from_ymd_opt(2019, 1, 1)
            .unwrap()
            .and_hms_opt(10, 2, 0)
            .unwrap();

        tracker.add("id-1", naive);

        let entry = tracker.oldest().unwrap();
        assert_eq!(entry.timestamp.offset().local_minus_utc(), 0);
        assert_eq!(entry.timestamp.hour(), 10);
        assert_eq!(entry.timestamp.minute(), 2);
    }

    #[test]
    fn test_prune_across_offsets() {
        let mut tracker = EntryTracker::new();
        // 11:30+02:00 is 09:30 UTC
        let zoned = DateTime::parse_from_rfc3339("2019-01-01T11:30:00+02:00").unwrap();
        tracker.add("id-1", zoned);

        tracker.prune_before(&Utc.with_ymd_and_hms(2019, 1, 1, 9, 0, 0).unwrap());
        assert!(tracker.contains("id-1"));

        tracker.prune_before(&Utc.with_ymd_and_hms(2019, 1, 1, 9, 30, 0).unwrap());
        assert!(!tracker.contains("id-1"));
    }
}
