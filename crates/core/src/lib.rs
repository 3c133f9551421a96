//! `projectdesk-core`: domain building blocks shared by the offer crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, UserId};
pub use money::Money;
pub use value_object::ValueObject;
