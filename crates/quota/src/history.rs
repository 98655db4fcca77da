use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::threshold::QuotaThreshold;

/// The threshold a quota was found at, at a given instant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaThresholdChange {
    pub threshold: QuotaThreshold,
    pub at: DateTime<Utc>,
}

impl QuotaThresholdChange {
    pub fn new(threshold: QuotaThreshold, at: DateTime<Utc>) -> Self {
        Self { threshold, at }
    }

    pub fn is_after(&self, instant: DateTime<Utc>) -> bool {
        self.at > instant
    }
}

/// How the current threshold relates to what was recorded before.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryEvolution {
    NoChange,
    /// Usage went up past a threshold.
    ///
    /// `recently_reached` is set when the same (or a higher) threshold was
    /// already recorded within the grace period: worth recording, not worth
    /// another warning.
    HigherThresholdReached {
        change: QuotaThresholdChange,
        recently_reached: bool,
    },
    LowerThresholdReached {
        change: QuotaThresholdChange,
    },
}

impl HistoryEvolution {
    /// The change to record, `None` for `NoChange`.
    pub fn change(&self) -> Option<QuotaThresholdChange> {
        match self {
            HistoryEvolution::NoChange => None,
            HistoryEvolution::HigherThresholdReached { change, .. }
            | HistoryEvolution::LowerThresholdReached { change } => Some(*change),
        }
    }

    /// A higher threshold was reached and nothing equivalent was notified recently.
    pub fn needs_notification(&self) -> bool {
        matches!(
            self,
            HistoryEvolution::HigherThresholdReached {
                recently_reached: false,
                ..
            }
        )
    }
}

/// Chronological threshold changes of one quota.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaThresholdHistory(Vec<QuotaThresholdChange>);

impl QuotaThresholdHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> &[QuotaThresholdChange] {
        &self.0
    }

    /// Threshold of the latest change, `QuotaThreshold::ZERO` for an empty history.
    pub fn current(&self) -> QuotaThreshold {
        self.0.last().map_or(QuotaThreshold::ZERO, |c| c.threshold)
    }

    pub fn record(&mut self, change: QuotaThresholdChange) {
        self.0.push(change);
    }

    pub fn compare_with(
        &self,
        threshold: QuotaThreshold,
        at: DateTime<Utc>,
        grace_period: TimeDelta,
    ) -> HistoryEvolution {
        let last = self.current();
        let change = QuotaThresholdChange::new(threshold, at);

        if threshold == last {
            return HistoryEvolution::NoChange;
        }
        if threshold < last {
            return HistoryEvolution::LowerThresholdReached { change };
        }

        let window_start = at.checked_sub_signed(grace_period).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recently_reached = self
            .0
            .iter()
            .any(|c| c.is_after(window_start) && c.threshold >= threshold);
        HistoryEvolution::HigherThresholdReached {
            change,
            recently_reached,
        }
    }
}
