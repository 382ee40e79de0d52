//! MCP tool implementations.
//!
//! This module contains all tools exposed by the waypost server.

pub mod sw_fetch;
pub mod sw_message;
pub mod sw_status;
pub mod sw_update;

#[cfg(test)]
pub(crate) mod testing;

pub use sw_fetch::{SwFetchParams, fetch_impl};
pub use sw_message::{SwMessageParams, message_impl};
pub use sw_status::{SwStatusParams, status_impl};
pub use sw_update::{SwUpdateParams, update_impl};
