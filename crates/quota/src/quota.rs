use serde::{Deserialize, Serialize};

use mailfold_core::ValueObject;

/// A quota limit: either a finite amount or unlimited.
pub trait QuotaValue: Copy + Eq + core::hash::Hash + core::fmt::Debug {
    /// Finite limit, `None` when unlimited.
    fn limit(self) -> Option<u64>;

    /// Human readable unit ("messages", "bytes").
    fn unit() -> &'static str;

    fn is_unlimited(self) -> bool {
        self.limit().is_none()
    }
}

/// Message-count limit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaCount(Option<u64>);

impl QuotaCount {
    pub const fn count(value: u64) -> Self {
        Self(Some(value))
    }

    pub const fn unlimited() -> Self {
        Self(None)
    }
}

impl QuotaValue for QuotaCount {
    fn limit(self) -> Option<u64> {
        self.0
    }

    fn unit() -> &'static str {
        "messages"
    }
}

impl ValueObject for QuotaCount {}

/// Storage-size limit, in bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaSize(Option<u64>);

impl QuotaSize {
    pub const fn size(bytes: u64) -> Self {
        Self(Some(bytes))
    }

    pub const fn unlimited() -> Self {
        Self(None)
    }
}

impl QuotaValue for QuotaSize {
    fn limit(self) -> Option<u64> {
        self.0
    }

    fn unit() -> &'static str {
        "bytes"
    }
}

impl ValueObject for QuotaSize {}

/// Current usage against a limit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quota<T> {
    pub used: u64,
    pub limit: T,
}

impl<T: QuotaValue> Quota<T> {
    pub fn new(used: u64, limit: T) -> Self {
        Self { used, limit }
    }

    /// `used / limit`, `None` for unlimited quotas.
    ///
    /// A zero limit counts as full.
    pub fn ratio(&self) -> Option<f64> {
        match self.limit.limit()? {
            0 => Some(1.0),
            limit => Some(self.used as f64 / limit as f64),
        }
    }

    /// Whether usage reached `percent` of the limit (exact integer comparison).
    pub fn reaches_percent(&self, percent: u8) -> bool {
        match self.limit.limit() {
            None => false,
            Some(0) => true,
            Some(limit) => u128::from(self.used) * 100 >= u128::from(percent) * u128::from(limit),
        }
    }
}
