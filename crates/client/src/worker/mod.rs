//! The offline cache manager and its version handover.

pub mod manager;
pub mod registration;
pub mod strategy;

#[cfg(test)]
pub(crate) mod fake;

pub use manager::{ActivateOutcome, FetchOutcome, InstallOutcome, OfflineCacheManager, ResponseSource};
pub use registration::{RegisterOutcome, Registration, RegistrationStatus, WorkerStatus};
pub use strategy::{PassThroughReason, Route, route};
