use chrono::TimeDelta;
use tracing::warn;

use crate::threshold::QuotaThresholds;

pub const THRESHOLDS_VAR: &str = "MAILFOLD_QUOTA_THRESHOLDS";
pub const GRACE_PERIOD_VAR: &str = "MAILFOLD_QUOTA_GRACE_PERIOD_SECS";

pub const DEFAULT_SUBJECT: &str = "Warning: Your email usage just exceeded a configured threshold";

/// Quota threshold mailing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaMailingConfig {
    pub thresholds: QuotaThresholds,
    /// Re-crossing a threshold within this window does not warn again.
    pub grace_period: TimeDelta,
    pub subject: String,
}

impl Default for QuotaMailingConfig {
    fn default() -> Self {
        Self {
            thresholds: QuotaThresholds::default(),
            grace_period: TimeDelta::days(1),
            subject: DEFAULT_SUBJECT.to_string(),
        }
    }
}

impl QuotaMailingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or invalid values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(THRESHOLDS_VAR) {
            match QuotaThresholds::parse(&raw) {
                Ok(thresholds) if !thresholds.as_slice().is_empty() => config.thresholds = thresholds,
                Ok(_) => warn!(key = THRESHOLDS_VAR, value = %raw, "no quota thresholds configured; using defaults"),
                Err(err) => warn!(key = THRESHOLDS_VAR, value = %raw, error = %err, "invalid quota thresholds; using defaults"),
            }
        }

        if let Some(raw) = lookup(GRACE_PERIOD_VAR) {
            match raw.trim().parse::<i64>().ok().and_then(TimeDelta::try_seconds) {
                Some(grace) if grace >= TimeDelta::zero() => config.grace_period = grace,
                _ => warn!(key = GRACE_PERIOD_VAR, value = %raw, "invalid grace period; using default"),
            }
        }

        config
    }

    pub fn with_thresholds(mut self, thresholds: QuotaThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_grace_period(mut self, grace_period: TimeDelta) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::QuotaThreshold;

    #[test]
    fn defaults_are_80_95_99_with_a_one_day_grace_period() {
        let config = QuotaMailingConfig::from_lookup(|_| None);
        let percents: Vec<u8> = config.thresholds.as_slice().iter().map(|t| t.percent()).collect();
        assert_eq!(percents, vec![99, 95, 80]);
        assert_eq!(config.grace_period, TimeDelta::days(1));
        assert_eq!(config.subject, DEFAULT_SUBJECT);
    }

    #[test]
    fn values_are_read_from_the_lookup() {
        let config = QuotaMailingConfig::from_lookup(|key| match key {
            THRESHOLDS_VAR => Some("50,75".to_string()),
            GRACE_PERIOD_VAR => Some("3600".to_string()),
            _ => None,
        });
        assert_eq!(
            config.thresholds.as_slice(),
            &[QuotaThreshold::new(75).unwrap(), QuotaThreshold::new(50).unwrap()]
        );
        assert_eq!(config.grace_period, TimeDelta::hours(1));
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = QuotaMailingConfig::from_lookup(|key| match key {
            THRESHOLDS_VAR => Some("80,200".to_string()),
            GRACE_PERIOD_VAR => Some("-5".to_string()),
            _ => None,
        });
        assert_eq!(config, QuotaMailingConfig::default());
    }
}
