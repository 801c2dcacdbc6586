//! # Service registry
//!
//! Thread-safe name→service map. The registry is the single source of truth
//! for "which services exist now": the orchestrator registers every static
//! service and dynamic instance here, and the retry and health loops iterate
//! over snapshots of its membership.

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod registry;

pub use registry::ServiceRegistry;
