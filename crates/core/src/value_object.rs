//! Value object trait: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one.
///
/// - **Value Object**: `Money`, an expense line (two lines with the same values are equal)
/// - Not a value object: an offer record (two records with the same id are the same record)
///
/// ```
/// use projectdesk_core::{Money, ValueObject};
///
/// fn assert_value_object<T: ValueObject>() {}
/// assert_value_object::<Money>();
///
/// assert_eq!(Money::from_minor(3500), "35.00".parse::<Money>().unwrap());
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
