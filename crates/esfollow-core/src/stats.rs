//! Counters for a follow session.

/// Running totals of one [`FollowEngine`](crate::FollowEngine).
///
/// Plain counters: the engine is single-threaded and owns its stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowStats {
    /// Range queries issued to the backend
    pub queries: u64,
    /// Hits received across all pages
    pub hits_seen: u64,
    /// Hits skipped because their id was already delivered
    pub duplicates_skipped: u64,
    /// Documents delivered to the caller
    pub delivered: u64,
    /// Hits rejected for a malformed timestamp
    pub malformed: u64,
    /// Tracker entries dropped by pruning
    pub pruned: u64,
}

impl FollowStats {
    /// Fraction of received hits that were already delivered (0.0 - 1.0)
    pub fn duplicate_rate(&self) -> f64 {
        if self.hits_seen == 0 {
            0.0
        } else {
            self.duplicates_skipped as f64 / self.hits_seen as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rate_empty() {
        assert_eq!(FollowStats::default().duplicate_rate(), 0.0);
    }

    #[test]
    fn test_duplicate_rate() {
        let stats = FollowStats {
            hits_seen: 4,
            duplicates_skipped: 1,
            ..Default::default()
        };
        assert!((stats.duplicate_rate() - 0.25).abs() < f64::EPSILON);
    }
}
