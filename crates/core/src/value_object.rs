//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two instances
/// built from the same fields are equal, and hash identically when they
/// implement `Hash`. To "modify" one, build a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// struct QuotaCount(Option<u64>);
///
/// impl ValueObject for QuotaCount {}
///
/// assert_eq!(QuotaCount(Some(10)), QuotaCount(Some(10)));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
