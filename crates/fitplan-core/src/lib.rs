//! Active plan consistency engine.
//!
//! Owns the rules for which diet and workout plan a user has active:
//! the template catalog, validation of user-supplied plans, the single
//! transactional activation path, and snapshot-consistent listings.

pub mod activation;
pub mod catalog;
pub mod draft;
pub mod error;
pub mod query;

pub use activation::{Activation, ActivationTarget, PlanActivationService};
pub use catalog::{PlanCatalog, PlanTemplate, TemplateRef};
pub use draft::{PlanDraft, PlanPatch, ValidationError};
pub use error::PlanError;
pub use query::{DisplayEntry, PlanQueryService};
