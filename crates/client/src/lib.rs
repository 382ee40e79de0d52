//! Client code for waypost.
//!
//! This crate provides the network seam, the reqwest-backed fetch client and
//! the offline cache manager that serves requests from the cache database.

pub mod fetch;
pub mod worker;

pub use fetch::{FetchClient, FetchConfig, Network};
pub use worker::{FetchOutcome, OfflineCacheManager, RegisterOutcome, Registration, ResponseSource};
