//! Core types and shared functionality for waypost.
//!
//! This crate provides:
//! - Cache generations with a SQLite backend
//! - Request/response snapshot types
//! - The worker lifecycle state machine and control messages
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod message;

pub use cache::{CacheDb, EntryMeta, Generation};
pub use config::{AppConfig, ConfigError, WorkerConfig};
pub use error::Error;
pub use http::{Request, RequestMode, ResponseSnapshot, ResponseType};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleEvent, WorkerState};
pub use message::ControlMessage;
