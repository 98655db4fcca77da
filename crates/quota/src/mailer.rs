//! Warning notifications for upward threshold crossings.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use mailfold_core::{AggregateId, EventId};
use mailfold_events::{Event, Reactor};

use crate::aggregate::QuotaThresholdChanged;
use crate::config::QuotaMailingConfig;
use crate::history::HistoryEvolution;
use crate::quota::{Quota, QuotaValue};
use crate::threshold::QuotaThreshold;

/// A rendered quota warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaNotification {
    /// History the triggering event belongs to.
    pub aggregate_id: AggregateId,
    /// The triggering event.
    pub event_id: EventId,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Count threshold that triggered the warning, if any.
    pub count_threshold: Option<QuotaThreshold>,
    /// Size threshold that triggered the warning, if any.
    pub size_threshold: Option<QuotaThreshold>,
}

impl QuotaNotification {
    /// Identity of the warning: one event warrants at most one warning.
    pub fn key(&self) -> (&AggregateId, EventId) {
        (&self.aggregate_id, self.event_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to send quota notification to '{recipient}': {reason}")]
pub struct NotificationError {
    pub recipient: String,
    pub reason: String,
}

/// Delivery channel for quota warnings (mail transport, queue, ...).
///
/// A warning can be handed over again when its effect ran but the reaction
/// cursor did not move (crash or cursor store failure in between). Sinks drop
/// a notification whose [`QuotaNotification::key`] they already accepted.
pub trait NotificationSink: Send + Sync {
    fn send(&self, notification: &QuotaNotification) -> Result<(), NotificationError>;
}

impl<S> NotificationSink for Arc<S>
where
    S: NotificationSink + ?Sized,
{
    fn send(&self, notification: &QuotaNotification) -> Result<(), NotificationError> {
        (**self).send(notification)
    }
}

/// Sink that keeps notifications in memory, once per key.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    sent: Mutex<Vec<QuotaNotification>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<QuotaNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn send(&self, notification: &QuotaNotification) -> Result<(), NotificationError> {
        let mut sent = self.sent.lock().map_err(|_| NotificationError {
            recipient: notification.recipient.clone(),
            reason: "sink lock poisoned".to_string(),
        })?;
        if sent.iter().any(|n| n.key() == notification.key()) {
            debug!(
                aggregate_id = %notification.aggregate_id,
                event_id = %notification.event_id,
                "dropping already accepted quota warning"
            );
            return Ok(());
        }
        sent.push(notification.clone());
        Ok(())
    }
}

/// Reactor sending a warning when a user newly crosses a higher threshold.
///
/// Run it through a `ReactionRunner` so each `QuotaThresholdChanged` event
/// produces at most one warning, even across restarts.
#[derive(Debug)]
pub struct QuotaThresholdMailer<S> {
    sink: S,
    subject: String,
}

impl<S: NotificationSink> QuotaThresholdMailer<S> {
    pub const NAME: &'static str = "quota-threshold-mailer";

    pub fn new(sink: S, config: &QuotaMailingConfig) -> Self {
        Self {
            sink,
            subject: config.subject.clone(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Warning for `event`, `None` when it does not warrant one.
    pub fn render(&self, committed: &Event<QuotaThresholdChanged>) -> Option<QuotaNotification> {
        let event = committed.payload();
        if !event.needs_notification() {
            return None;
        }
        let count_threshold = notified_threshold(&event.count_evolution);
        let size_threshold = notified_threshold(&event.size_evolution);

        let mut body = String::from("You receive this email because you recently exceeded a threshold related to the quotas of your email account.\n\n");
        if let Some(threshold) = count_threshold {
            describe(&mut body, "message count", threshold, &event.count_quota);
        }
        if let Some(threshold) = size_threshold {
            describe(&mut body, "storage size", threshold, &event.size_quota);
        }
        body.push_str("\nYou need to be aware that actions leading to exceeded quotas will be denied. This will result in a degraded service.\nTo mitigate this issue you might reach your administrator in order to increase your configured quota. You might also delete some non important emails.\n");

        Some(QuotaNotification {
            aggregate_id: committed.aggregate_id().clone(),
            event_id: committed.event_id(),
            recipient: event.username.clone(),
            subject: self.subject.clone(),
            body,
            count_threshold,
            size_threshold,
        })
    }
}

fn notified_threshold(evolution: &HistoryEvolution) -> Option<QuotaThreshold> {
    evolution
        .needs_notification()
        .then(|| evolution.change().map(|c| c.threshold))
        .flatten()
}

fn describe<T: QuotaValue>(body: &mut String, what: &str, threshold: QuotaThreshold, quota: &Quota<T>) {
    let limit = quota
        .limit
        .limit()
        .map_or_else(|| "unlimited".to_string(), |l| l.to_string());
    let _ = writeln!(
        body,
        "- You currently occupy more than {threshold} of the {what} allowed ({} out of {limit} {}).",
        quota.used,
        T::unit()
    );
}

impl<S: NotificationSink> Reactor for QuotaThresholdMailer<S> {
    type Ev = QuotaThresholdChanged;
    type Error = NotificationError;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn react(&self, aggregate_id: &AggregateId, event: &Event<QuotaThresholdChanged>) -> Result<(), NotificationError> {
        let Some(notification) = self.render(event) else {
            debug!(aggregate_id = %aggregate_id, event_id = %event.event_id(), "threshold change needs no warning");
            return Ok(());
        };
        self.sink.send(&notification)?;
        info!(
            aggregate_id = %aggregate_id,
            event_id = %event.event_id(),
            recipient = %notification.recipient,
            "sent quota warning"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use mailfold_core::EventId;

    use crate::history::QuotaThresholdChange;
    use crate::quota::{QuotaCount, QuotaSize};

    fn change(p: u8) -> QuotaThresholdChange {
        QuotaThresholdChange::new(
            QuotaThreshold::new(p).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    fn changed(count_evolution: HistoryEvolution, size_evolution: HistoryEvolution) -> Event<QuotaThresholdChanged> {
        let username = "bob@example.org".to_string();
        Event::new(
            EventId::first(),
            AggregateId::new(format!("QuotaThresholdChangesHistoryId-{username}")).unwrap(),
            QuotaThresholdChanged {
                username,
                count_evolution,
                size_evolution,
                count_quota: Quota::new(96, QuotaCount::count(100)),
                size_quota: Quota::new(10, QuotaSize::unlimited()),
            },
        )
    }

    fn mailer() -> QuotaThresholdMailer<InMemoryNotificationSink> {
        QuotaThresholdMailer::new(InMemoryNotificationSink::new(), &QuotaMailingConfig::default())
    }

    #[test]
    fn new_higher_thresholds_send_one_warning() {
        let mailer = mailer();
        let event = changed(
            HistoryEvolution::HigherThresholdReached {
                change: change(95),
                recently_reached: false,
            },
            HistoryEvolution::NoChange,
        );

        mailer.react(event.aggregate_id(), &event).unwrap();

        let sent = mailer.sink().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "bob@example.org");
        assert_eq!(sent[0].count_threshold, QuotaThreshold::new(95).ok());
        assert_eq!(sent[0].size_threshold, None);
        assert!(sent[0].body.contains("more than 95% of the message count allowed (96 out of 100 messages)"));
    }

    #[test]
    fn recent_or_lower_changes_send_nothing() {
        let mailer = mailer();
        for event in [
            changed(
                HistoryEvolution::HigherThresholdReached {
                    change: change(80),
                    recently_reached: true,
                },
                HistoryEvolution::NoChange,
            ),
            changed(
                HistoryEvolution::LowerThresholdReached { change: change(80) },
                HistoryEvolution::NoChange,
            ),
        ] {
            mailer.react(event.aggregate_id(), &event).unwrap();
        }
        assert!(mailer.sink().sent().is_empty());
    }

    #[test]
    fn sinks_accept_one_warning_per_event() {
        let mailer = mailer();
        let event = changed(
            HistoryEvolution::HigherThresholdReached {
                change: change(80),
                recently_reached: false,
            },
            HistoryEvolution::NoChange,
        );

        mailer.react(event.aggregate_id(), &event).unwrap();
        mailer.react(event.aggregate_id(), &event).unwrap();

        let sent = mailer.sink().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key(), (event.aggregate_id(), EventId::first()));
    }

    struct DownSink;

    impl NotificationSink for DownSink {
        fn send(&self, notification: &QuotaNotification) -> Result<(), NotificationError> {
            Err(NotificationError {
                recipient: notification.recipient.clone(),
                reason: "smtp unavailable".to_string(),
            })
        }
    }

    #[test]
    fn sink_failures_are_reported() {
        let mailer = QuotaThresholdMailer::new(DownSink, &QuotaMailingConfig::default());
        let event = changed(
            HistoryEvolution::NoChange,
            HistoryEvolution::HigherThresholdReached {
                change: change(99),
                recently_reached: false,
            },
        );

        let err = mailer.react(event.aggregate_id(), &event).unwrap_err();
        assert!(err.to_string().contains("smtp unavailable"));
    }
}
