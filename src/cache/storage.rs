//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::entry::{lookup, CachedResponse, StoredEntry};
use super::traits::RequestKey;
use crate::http::{Request, Response};

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores, one per cache generation.
/// Implementations synchronize internally; callers never coordinate.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named store if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Whether a store with this name exists.
  fn has(&self, name: &str) -> Result<bool>;

  /// Names of all stores, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and every entry in it. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up a request in the named store.
  fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Store a response keyed by request, overwriting any previous entry.
  ///
  /// Fails if the store does not exist, so a write that outlives its
  /// generation cannot bring a deleted store back.
  fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
    let entry = StoredEntry::new(request, response)?;
    self.put_entries(name, vec![entry], WriteMode::Existing)
  }

  /// Store a batch atomically, creating the store if needed: either every
  /// entry is written or none is, and a failed batch leaves no store behind.
  fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
    let entries = entries
      .into_iter()
      .map(|(request, response)| StoredEntry::new(&request, response))
      .collect::<Result<Vec<_>>>()?;
    self.put_entries(name, entries, WriteMode::Create)
  }

  /// Write prepared entries atomically.
  fn put_entries(&self, name: &str, entries: Vec<StoredEntry>, mode: WriteMode) -> Result<()>;
}

/// Whether a write may create the store it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
  /// Create the store when missing (install batch)
  Create,
  /// Fail when the store is missing (runtime writes)
  Existing,
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Database living only as long as this value; used by tests and dry runs.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per cache generation
CREATE TABLE IF NOT EXISTS cache_names (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    vary TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, request_key),
    FOREIGN KEY (cache_name) REFERENCES cache_names(name) ON DELETE CASCADE
);
"#;

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_names (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache '{}': {}", name, e))?;
    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_names WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache '{}': {}", name, e))?;
    Ok(found.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_names ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of cache '{}': {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_names WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache '{}': {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let key = RequestKey::from_request(request).cache_hash();

    let entry = {
      let conn = self.lock()?;
      let mut stmt = conn
        .prepare(
          "SELECT method, url, vary, status, status_text, headers, body, cached_at
           FROM cache_entries WHERE cache_name = ? AND request_key = ?",
        )
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let row = stmt
        .query_row(params![name, key], |row| {
          Ok(RawEntry {
            method: row.get(0)?,
            url: row.get(1)?,
            vary: row.get(2)?,
            status: row.get(3)?,
            status_text: row.get(4)?,
            headers: row.get(5)?,
            body: row.get(6)?,
            cached_at: row.get(7)?,
          })
        })
        .optional()
        .map_err(|e| eyre!("Failed to query cache '{}': {}", name, e))?;
      row
    };

    let entry = match entry {
      Some(raw) => raw.into_entry(key)?,
      None => return Ok(None),
    };

    if lookup(std::iter::once(&entry), request).is_none() {
      return Ok(None);
    }
    Ok(Some(entry.into_cached()?))
  }

  fn put_entries(&self, name: &str, entries: Vec<StoredEntry>, mode: WriteMode) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    match mode {
      WriteMode::Create => {
        tx.execute(
          "INSERT OR IGNORE INTO cache_names (name) VALUES (?)",
          params![name],
        )
        .map_err(|e| eyre!("Failed to open cache '{}': {}", name, e))?;
      }
      WriteMode::Existing => {
        let found: Option<i64> = tx
          .query_row(
            "SELECT 1 FROM cache_names WHERE name = ?",
            params![name],
            |row| row.get(0),
          )
          .optional()
          .map_err(|e| eyre!("Failed to look up cache '{}': {}", name, e))?;
        if found.is_none() {
          return Err(eyre!("Cache '{}' does not exist", name));
        }
      }
    }

    for entry in &entries {
      let vary = serde_json::to_string(&entry.vary)
        .map_err(|e| eyre!("Failed to serialize vary headers: {}", e))?;
      let headers = serde_json::to_string(&entry.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, request_key, method, url, vary, status, status_text, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          name,
          entry.key,
          entry.method,
          entry.url,
          vary,
          entry.status,
          entry.status_text,
          headers,
          entry.body,
          entry.cached_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", entry.url, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

/// Row as read from `cache_entries`, before decoding JSON columns.
struct RawEntry {
  method: String,
  url: String,
  vary: String,
  status: u16,
  status_text: String,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl RawEntry {
  fn into_entry(self, key: String) -> Result<StoredEntry> {
    let vary = serde_json::from_str(&self.vary)
      .map_err(|e| eyre!("Failed to deserialize vary headers for {}: {}", self.url, e))?;
    let headers = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", self.url, e))?;

    Ok(StoredEntry {
      key,
      method: self.method,
      url: self.url,
      vary,
      status: self.status,
      status_text: self.status_text,
      headers,
      body: self.body,
      cached_at: parse_datetime(&self.cached_at)?,
    })
  }
}

/// Parse an RFC 3339 timestamp written by `put_entries`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
