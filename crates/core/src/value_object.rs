//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two instances
/// carrying the same attributes are interchangeable. To "modify" one, build a
/// new one (see [`crate::Money::checked_add`]).
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// struct Money(u64);
///
/// impl ValueObject for Money {}
///
/// assert_eq!(Money(100), Money(100));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
