use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use mailfold_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, EventId};
use mailfold_events::{Command, DomainEvent};

use crate::config::QuotaMailingConfig;
use crate::history::{HistoryEvolution, QuotaThresholdHistory};
use crate::quota::{Quota, QuotaCount, QuotaSize};
use crate::threshold::QuotaThresholds;

const ID_PREFIX: &str = "QuotaThresholdChangesHistoryId-";

/// Command: compare a user's current usage with their recorded thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectThresholdCrossing {
    pub username: String,
    pub count_quota: Quota<QuotaCount>,
    pub size_quota: Quota<QuotaSize>,
    pub at: DateTime<Utc>,
}

impl Command for DetectThresholdCrossing {
    fn target_aggregate_id(&self) -> DomainResult<AggregateId> {
        UserQuotaThresholds::aggregate_id(&self.username)
    }
}

/// Event: the count and/or size threshold of a user moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaThresholdChanged {
    pub username: String,
    pub count_evolution: HistoryEvolution,
    pub size_evolution: HistoryEvolution,
    pub count_quota: Quota<QuotaCount>,
    pub size_quota: Quota<QuotaSize>,
}

impl QuotaThresholdChanged {
    pub fn needs_notification(&self) -> bool {
        self.count_evolution.needs_notification() || self.size_evolution.needs_notification()
    }
}

impl DomainEvent for QuotaThresholdChanged {
    fn event_type(&self) -> &'static str {
        "quota.threshold.changed"
    }
}

/// Aggregate root: per-user threshold history of the count and size quotas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuotaThresholds {
    id: AggregateId,
    username: String,
    thresholds: QuotaThresholds,
    grace_period: TimeDelta,
    count_history: QuotaThresholdHistory,
    size_history: QuotaThresholdHistory,
    last_event_id: Option<EventId>,
}

impl UserQuotaThresholds {
    /// Aggregate id holding `username`'s threshold history.
    pub fn aggregate_id(username: &str) -> DomainResult<AggregateId> {
        if username.trim().is_empty() {
            return Err(DomainError::validation("username cannot be empty"));
        }
        AggregateId::new(format!("{ID_PREFIX}{username}"))
    }

    /// Create an empty aggregate instance for rehydration.
    pub fn empty(username: &str, config: &QuotaMailingConfig) -> DomainResult<Self> {
        Ok(Self {
            id: Self::aggregate_id(username)?,
            username: username.to_string(),
            thresholds: config.thresholds.clone(),
            grace_period: config.grace_period,
            count_history: QuotaThresholdHistory::new(),
            size_history: QuotaThresholdHistory::new(),
            last_event_id: None,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn count_history(&self) -> &QuotaThresholdHistory {
        &self.count_history
    }

    pub fn size_history(&self) -> &QuotaThresholdHistory {
        &self.size_history
    }
}

impl AggregateRoot for UserQuotaThresholds {
    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn last_event_id(&self) -> Option<EventId> {
        self.last_event_id
    }
}

impl Aggregate for UserQuotaThresholds {
    type Command = DetectThresholdCrossing;
    type Event = QuotaThresholdChanged;
    type Error = DomainError;

    fn apply(&mut self, event_id: EventId, event: &Self::Event) {
        if let Some(change) = event.count_evolution.change() {
            self.count_history.record(change);
        }
        if let Some(change) = event.size_evolution.change() {
            self.size_history.record(change);
        }
        self.last_event_id = Some(event_id);
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if command.username != self.username {
            return Err(DomainError::invariant(format!(
                "command for '{}' sent to the history of '{}'",
                command.username, self.username
            )));
        }

        let count_evolution = self.count_history.compare_with(
            self.thresholds.highest_exceeded(&command.count_quota),
            command.at,
            self.grace_period,
        );
        let size_evolution = self.size_history.compare_with(
            self.thresholds.highest_exceeded(&command.size_quota),
            command.at,
            self.grace_period,
        );

        if count_evolution == HistoryEvolution::NoChange && size_evolution == HistoryEvolution::NoChange {
            return Ok(vec![]);
        }

        Ok(vec![QuotaThresholdChanged {
            username: command.username.clone(),
            count_evolution,
            size_evolution,
            count_quota: command.count_quota,
            size_quota: command.size_quota,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use mailfold_events::{History, execute, rehydrate};

    use crate::threshold::QuotaThreshold;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    fn detect(count_used: u64, size_used: u64, hour: u32) -> DetectThresholdCrossing {
        DetectThresholdCrossing {
            username: "bob@example.org".to_string(),
            count_quota: Quota::new(count_used, QuotaCount::count(100)),
            size_quota: Quota::new(size_used, QuotaSize::size(1000)),
            at: at(hour),
        }
    }

    fn bob() -> UserQuotaThresholds {
        UserQuotaThresholds::empty("bob@example.org", &QuotaMailingConfig::default()).unwrap()
    }

    fn run(history: &History<QuotaThresholdChanged>, command: &DetectThresholdCrossing) -> History<QuotaThresholdChanged> {
        let events = execute(history, command, bob).unwrap();
        history.append_all(events).unwrap()
    }

    #[test]
    fn aggregate_ids_are_derived_from_the_username() {
        assert_eq!(
            UserQuotaThresholds::aggregate_id("bob@example.org").unwrap().as_key(),
            "QuotaThresholdChangesHistoryId-bob@example.org"
        );
        assert!(UserQuotaThresholds::aggregate_id("  ").is_err());
    }

    #[test]
    fn commands_target_their_user_history() {
        assert_eq!(
            detect(1, 1, 1).target_aggregate_id().unwrap(),
            bob().id().clone()
        );
    }

    #[test]
    fn usage_below_every_threshold_emits_nothing() {
        assert!(bob().handle(&detect(10, 10, 1)).unwrap().is_empty());
    }

    #[test]
    fn crossing_a_threshold_emits_a_change() {
        let events = bob().handle(&detect(85, 10, 1)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].needs_notification());
        assert_eq!(events[0].size_evolution, HistoryEvolution::NoChange);
        assert_eq!(
            events[0].count_evolution.change().map(|c| c.threshold),
            Some(QuotaThreshold::new(80).unwrap())
        );
    }

    #[test]
    fn staying_at_the_same_threshold_emits_nothing() {
        let history = run(&History::empty(), &detect(85, 10, 1));
        let again = execute(&history, &detect(86, 10, 2), bob).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn re_crossing_within_the_grace_period_is_recorded_silently() {
        let history = run(&History::empty(), &detect(85, 10, 1));
        let history = run(&history, &detect(10, 10, 2));
        let events = execute(&history, &detect(85, 10, 3), bob).unwrap();

        assert_eq!(events.len(), 1);
        assert!(!events[0].payload().needs_notification());
    }

    #[test]
    fn rehydration_rebuilds_both_histories() {
        let history = run(&History::empty(), &detect(85, 960, 1));
        let history = run(&history, &detect(99, 960, 2));
        let state = rehydrate(bob(), &history);

        assert_eq!(state.count_history().current(), QuotaThreshold::new(99).unwrap());
        assert_eq!(state.size_history().current(), QuotaThreshold::new(95).unwrap());
        assert_eq!(state.last_event_id(), Some(EventId::first().next()));
    }

    #[test]
    fn commands_for_other_users_are_rejected() {
        let mut command = detect(85, 10, 1);
        command.username = "alice@example.org".to_string();
        assert!(matches!(bob().handle(&command), Err(DomainError::InvariantViolation(_))));
    }
}
