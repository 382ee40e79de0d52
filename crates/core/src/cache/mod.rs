//! SQLite-backed cache generations.
//!
//! This module provides the durable store behind the offline cache manager,
//! using SQLite with async access via tokio-rusqlite. It supports:
//!
//! - Named generations, one per deployed cache version
//! - Request-keyed response snapshots inside each generation
//! - All-or-nothing bulk writes for precaching
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod connection;
pub mod entries;
pub mod generations;
pub mod hash;
pub mod migrations;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::EntryMeta;
pub use generations::Generation;
