//! Request/response entries within a generation.
//!
//! Entries are keyed by `(generation, key_hash)` where the hash covers the
//! request method and canonical URL. Writing an existing key replaces the
//! stored snapshot; nothing is merged.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use url::Url;

use super::connection::CacheDb;
use super::hash::compute_cache_key;
use crate::Error;
use crate::http::{Request, ResponseSnapshot, ResponseType};

/// Listing row for a stored entry, without the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct EntryMeta {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub response_type: ResponseType,
    pub stored_at: String,
}

/// Row values for one entry, prepared outside the database thread.
struct EntryRow {
    key_hash: String,
    method: String,
    url: String,
    status: i64,
    status_text: String,
    response_type: &'static str,
    response_url: String,
    headers_json: String,
    body: Bytes,
}

impl EntryRow {
    fn new(request: &Request, response: &ResponseSnapshot) -> Result<Self, Error> {
        Ok(Self {
            key_hash: compute_cache_key(&request.method, &request.url),
            method: request.method.clone(),
            url: request.url.to_string(),
            status: i64::from(response.status),
            status_text: response.status_text.clone(),
            response_type: response.response_type.as_str(),
            response_url: response.url.clone(),
            headers_json: serde_json::to_string(&response.headers)?,
            body: response.body.clone(),
        })
    }
}

const UPSERT_ENTRY: &str = "INSERT INTO entries (
        generation, key_hash, method, url, status, status_text,
        response_type, response_url, headers_json, body, stored_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(generation, key_hash) DO UPDATE SET
        method = excluded.method,
        url = excluded.url,
        status = excluded.status,
        status_text = excluded.status_text,
        response_type = excluded.response_type,
        response_url = excluded.response_url,
        headers_json = excluded.headers_json,
        body = excluded.body,
        stored_at = excluded.stored_at";

fn upsert(conn: &rusqlite::Connection, generation: &str, row: &EntryRow, now: &str) -> Result<(), Error> {
    conn.execute(
        UPSERT_ENTRY,
        params![
            generation,
            &row.key_hash,
            &row.method,
            &row.url,
            row.status,
            &row.status_text,
            row.response_type,
            &row.response_url,
            &row.headers_json,
            &row.body[..],
            now,
        ],
    )?;
    Ok(())
}

impl CacheDb {
    /// Store a response for a request in an existing generation.
    ///
    /// Replaces any snapshot already stored under the same key. Returns false,
    /// writing nothing, if the generation doesn't exist (it was deleted by a
    /// newer activation while this write was in flight).
    pub async fn put_entry(
        &self, generation: &str, request: &Request, response: &ResponseSnapshot,
    ) -> Result<bool, Error> {
        let generation = generation.to_string();
        let row = EntryRow::new(request, response)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
                    params![generation],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(false);
                }
                upsert(conn, &generation, &row, &now)?;
                Ok(true)
            })
            .await
            .map_err(Error::from)
    }

    /// Create the generation if needed and store every pair, atomically.
    ///
    /// Either all entries are committed or none are.
    pub async fn put_all(&self, generation: &str, pairs: &[(Request, ResponseSnapshot)]) -> Result<(), Error> {
        let generation = generation.to_string();
        let rows = pairs
            .iter()
            .map(|(request, response)| EntryRow::new(request, response))
            .collect::<Result<Vec<_>, Error>>()?;
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![generation, now],
                )?;
                for row in &rows {
                    upsert(&tx, &generation, row, &now)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up the snapshot stored for `method url` in a generation.
    ///
    /// Returns None if either the generation or the entry doesn't exist.
    pub async fn match_entry(&self, generation: &str, method: &str, url: &Url) -> Result<Option<ResponseSnapshot>, Error> {
        let generation = generation.to_string();
        let key_hash = compute_cache_key(method, url);
        let raw = self
            .conn
            .call(move |conn| -> Result<Option<RawEntry>, Error> {
                let raw = conn
                    .query_row(
                        "SELECT status, status_text, response_type, response_url, headers_json, body
                        FROM entries WHERE generation = ?1 AND key_hash = ?2",
                        params![generation, key_hash],
                        |row| {
                            Ok(RawEntry {
                                status: row.get(0)?,
                                status_text: row.get(1)?,
                                response_type: row.get(2)?,
                                response_url: row.get(3)?,
                                headers_json: row.get(4)?,
                                body: row.get(5)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(raw)
            })
            .await
            .map_err(Error::from)?;

        raw.map(RawEntry::into_snapshot).transpose()
    }

    /// Delete one entry. Returns true if it existed.
    pub async fn delete_entry(&self, generation: &str, method: &str, url: &Url) -> Result<bool, Error> {
        let generation = generation.to_string();
        let key_hash = compute_cache_key(method, url);
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute(
                    "DELETE FROM entries WHERE generation = ?1 AND key_hash = ?2",
                    params![generation, key_hash],
                )?;
                Ok(deleted == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// List the entries of a generation, ordered by URL.
    pub async fn list_entries(&self, generation: &str) -> Result<Vec<EntryMeta>, Error> {
        let generation = generation.to_string();
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<(String, String, i64, String, String)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT method, url, status, response_type, stored_at
                    FROM entries WHERE generation = ?1 ORDER BY url ASC, method ASC",
                )?;
                let mapped = stmt.query_map(params![generation], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?;
                let mut rows = Vec::new();
                for row in mapped {
                    rows.push(row?);
                }
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter()
            .map(|(method, url, status, response_type, stored_at)| {
                Ok(EntryMeta {
                    method,
                    url,
                    status: decode_status(status)?,
                    response_type: response_type.parse()?,
                    stored_at,
                })
            })
            .collect()
    }
}

struct RawEntry {
    status: i64,
    status_text: String,
    response_type: String,
    response_url: String,
    headers_json: String,
    body: Vec<u8>,
}

impl RawEntry {
    fn into_snapshot(self) -> Result<ResponseSnapshot, Error> {
        Ok(ResponseSnapshot {
            url: self.response_url,
            status: decode_status(self.status)?,
            status_text: self.status_text,
            response_type: self.response_type.parse()?,
            headers: serde_json::from_str(&self.headers_json)?,
            body: Bytes::from(self.body),
        })
    }
}

fn decode_status(status: i64) -> Result<u16, Error> {
    u16::try_from(status).map_err(|_| Error::CorruptEntry(format!("status out of range: {status}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn pair(u: &str, body: &str) -> (Request, ResponseSnapshot) {
        let request = Request::get(url(u));
        let response = ResponseSnapshot::ok(&request.url, ResponseType::Basic, body.to_string())
            .with_header("content-type", "text/css");
        (request, response)
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.create_generation("v1").await.unwrap();
        let (request, response) = pair("https://example.com/a.css", "body{}");

        assert!(db.put_entry("v1", &request, &response).await.unwrap());

        let hit = db.match_entry("v1", "GET", &request.url).await.unwrap().unwrap();
        assert_eq!(hit, response);
        assert_eq!(hit.content_type(), Some("text/css"));
    }

    #[tokio::test]
    async fn test_match_is_per_generation() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_all("v1", &[pair("https://example.com/a.css", "old")]).await.unwrap();
        db.create_generation("v2").await.unwrap();

        let miss = db.match_entry("v2", "GET", &url("https://example.com/a.css")).await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_not_merges() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.create_generation("v1").await.unwrap();
        let (request, first) = pair("https://example.com/", "first");
        let second = ResponseSnapshot::ok(&request.url, ResponseType::Basic, "second");

        db.put_entry("v1", &request, &first).await.unwrap();
        db.put_entry("v1", &request, &second).await.unwrap();

        let hit = db.match_entry("v1", "GET", &request.url).await.unwrap().unwrap();
        assert_eq!(hit.text(), "second");
        assert!(hit.headers.is_empty());
        assert_eq!(db.list_entries("v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_into_missing_generation_is_noop() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let (request, response) = pair("https://example.com/a.css", "x");

        assert!(!db.put_entry("gone", &request, &response).await.unwrap());
        assert!(!db.has_generation("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_all_creates_generation() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let pairs = vec![pair("https://example.com/a.css", "a"), pair("https://example.com/b.css", "b")];

        db.put_all("v1", &pairs).await.unwrap();

        let generation = db.get_generation("v1").await.unwrap().unwrap();
        assert_eq!(generation.entry_count, 2);
        let urls: Vec<String> = db.list_entries("v1").await.unwrap().into_iter().map(|e| e.url).collect();
        assert_eq!(urls, vec!["https://example.com/a.css", "https://example.com/b.css"]);
    }

    #[tokio::test]
    async fn test_generation_delete_cascades() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_all("v1", &[pair("https://example.com/a.css", "a")]).await.unwrap();

        db.delete_generation("v1").await.unwrap();
        db.create_generation("v1").await.unwrap();

        assert!(db.list_entries("v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let (request, _) = pair("https://example.com/a.css", "a");
        db.put_all("v1", &[pair("https://example.com/a.css", "a")]).await.unwrap();

        assert!(db.delete_entry("v1", "GET", &request.url).await.unwrap());
        assert!(db.match_entry("v1", "GET", &request.url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_binary_body_preserved() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let request = Request::get(url("https://example.com/static/img/logo.png"));
        let body: Vec<u8> = vec![0x89, b'P', b'N', b'G', 0, 0xff];
        let response = ResponseSnapshot::ok(&request.url, ResponseType::Basic, body.clone());

        db.put_all("v1", &[(request.clone(), response)]).await.unwrap();

        let hit = db.match_entry("v1", "GET", &request.url).await.unwrap().unwrap();
        assert_eq!(&hit.body[..], &body[..]);
    }
}
