use serde::{Deserialize, Serialize};

use mailfold_core::{DomainError, DomainResult, ValueObject};

use crate::quota::{Quota, QuotaValue};

/// A usage threshold, in percent of a quota (0..=100).
///
/// `QuotaThreshold::ZERO` stands for "no threshold reached".
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct QuotaThreshold(u8);

impl QuotaThreshold {
    pub const ZERO: QuotaThreshold = QuotaThreshold(0);

    pub fn new(percent: u8) -> DomainResult<Self> {
        if percent > 100 {
            return Err(DomainError::validation(format!(
                "quota threshold must be within 0..=100, got {percent}"
            )));
        }
        Ok(Self(percent))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_reached_by<T: QuotaValue>(self, quota: &Quota<T>) -> bool {
        !self.is_zero() && quota.reaches_percent(self.0)
    }
}

impl TryFrom<u8> for QuotaThreshold {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QuotaThreshold> for u8 {
    fn from(value: QuotaThreshold) -> Self {
        value.0
    }
}

impl core::fmt::Display for QuotaThreshold {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl ValueObject for QuotaThreshold {}

/// Configured thresholds, kept sorted from highest to lowest without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaThresholds(Vec<QuotaThreshold>);

impl QuotaThresholds {
    pub fn new(thresholds: impl IntoIterator<Item = QuotaThreshold>) -> Self {
        let mut thresholds: Vec<_> = thresholds.into_iter().filter(|t| !t.is_zero()).collect();
        thresholds.sort_unstable_by(|a, b| b.cmp(a));
        thresholds.dedup();
        Self(thresholds)
    }

    /// Parse comma-separated percents (`"80,95,99"`).
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let thresholds = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u8>()
                    .map_err(|_| DomainError::validation(format!("not a percent: '{s}'")))
                    .and_then(QuotaThreshold::new)
            })
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Self::new(thresholds))
    }

    pub fn as_slice(&self) -> &[QuotaThreshold] {
        &self.0
    }

    /// Highest threshold reached by `quota`, `QuotaThreshold::ZERO` if none is.
    pub fn highest_exceeded<T: QuotaValue>(&self, quota: &Quota<T>) -> QuotaThreshold {
        self.0
            .iter()
            .copied()
            .find(|t| t.is_reached_by(quota))
            .unwrap_or(QuotaThreshold::ZERO)
    }
}

impl Default for QuotaThresholds {
    /// 80% / 95% / 99%.
    fn default() -> Self {
        Self::new([QuotaThreshold(80), QuotaThreshold(95), QuotaThreshold(99)])
    }
}
