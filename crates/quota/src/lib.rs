//! Quota threshold mailing domain (event-sourced).
//!
//! Tracks, per user, which usage thresholds (e.g. 80% / 95% / 99%) of their
//! message-count and storage-size quotas were crossed, and reacts to upward
//! crossings by sending a warning. Business rules are deterministic domain
//! logic; delivery goes through a pluggable [`NotificationSink`].

pub mod aggregate;
pub mod config;
pub mod history;
pub mod mailer;
pub mod quota;
pub mod threshold;

pub use aggregate::{DetectThresholdCrossing, QuotaThresholdChanged, UserQuotaThresholds};
pub use config::QuotaMailingConfig;
pub use history::{HistoryEvolution, QuotaThresholdChange, QuotaThresholdHistory};
pub use mailer::{
    InMemoryNotificationSink, NotificationError, NotificationSink, QuotaNotification,
    QuotaThresholdMailer,
};
pub use quota::{Quota, QuotaCount, QuotaSize, QuotaValue};
pub use threshold::{QuotaThreshold, QuotaThresholds};
