//! Offers domain module.
//!
//! Business rules for offer documents generated from a project's expense lines,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod document;
pub mod offer;
pub mod project;

pub use document::{DocumentLine, OfferDocument};
pub use offer::{DEFAULT_OFFER_NAME, OfferId, OfferRecord, OfferStatus};
pub use project::{CompanyProfile, ExpenseLine, Project, ProjectId, ProjectSnapshot};
