//! Cache generation bookkeeping.
//!
//! A generation is a named bucket of entries. Its name is the cache version
//! string; deleting a generation cascades to every entry it holds.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

/// Summary row for one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Generation {
    pub name: String,
    pub created_at: String,
    pub activated_at: Option<String>,
    pub entry_count: u64,
}

impl CacheDb {
    /// Create a generation if it doesn't exist yet.
    ///
    /// Returns true if a new row was created.
    pub async fn create_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![name, now],
                )?;
                Ok(inserted == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Check whether a generation exists.
    pub async fn has_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Get one generation with its entry count.
    pub async fn get_generation(&self, name: &str) -> Result<Option<Generation>, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Generation>, Error> {
                let generation = conn
                    .query_row(
                        "SELECT g.name, g.created_at, g.activated_at,
                            (SELECT COUNT(*) FROM entries e WHERE e.generation = g.name)
                        FROM generations g WHERE g.name = ?1",
                        params![name],
                        |row| {
                            Ok(Generation {
                                name: row.get(0)?,
                                created_at: row.get(1)?,
                                activated_at: row.get(2)?,
                                entry_count: row.get::<_, i64>(3)? as u64,
                            })
                        },
                    )
                    .optional()?;
                Ok(generation)
            })
            .await
            .map_err(Error::from)
    }

    /// List all generations, oldest first.
    pub async fn list_generations(&self) -> Result<Vec<Generation>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<Generation>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT g.name, g.created_at, g.activated_at,
                        (SELECT COUNT(*) FROM entries e WHERE e.generation = g.name)
                    FROM generations g ORDER BY g.created_at ASC, g.name ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(Generation {
                        name: row.get(0)?,
                        created_at: row.get(1)?,
                        activated_at: row.get(2)?,
                        entry_count: row.get::<_, i64>(3)? as u64,
                    })
                })?;
                let mut generations = Vec::new();
                for generation in rows {
                    generations.push(generation?);
                }
                Ok(generations)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one generation and its entries.
    ///
    /// Returns true if the generation existed.
    pub async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
                Ok(deleted == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every generation except `keep`, in one transaction.
    ///
    /// Returns the names of the deleted generations.
    pub async fn delete_generations_except(&self, keep: &str) -> Result<Vec<String>, Error> {
        let keep = keep.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;
                let stale = {
                    let mut stmt = tx.prepare("SELECT name FROM generations WHERE name != ?1 ORDER BY name")?;
                    let names = stmt.query_map(params![keep], |row| row.get::<_, String>(0))?;
                    let mut stale = Vec::new();
                    for name in names {
                        stale.push(name?);
                    }
                    stale
                };
                tx.execute("DELETE FROM generations WHERE name != ?1", params![keep])?;
                tx.commit()?;
                Ok(stale)
            })
            .await
            .map_err(Error::from)
    }

    /// Stamp a generation as activated now.
    ///
    /// Returns false if the generation doesn't exist.
    pub async fn mark_generation_activated(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let updated = conn.execute(
                    "UPDATE generations SET activated_at = ?2 WHERE name = ?1",
                    params![name, now],
                )?;
                Ok(updated == 1)
            })
            .await
            .map_err(Error::from)
    }
}
