//! Cache storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheKey, CachedEntry, FetchResponse};

/// Trait for cache storage backends.
///
/// Buckets are named partitions of request/response pairs. Writes replace an
/// entry wholesale; nothing is mutated in place.
pub trait CacheStore: Send + Sync + 'static {
  /// Create the bucket if it does not exist yet.
  fn open(&self, bucket: &str) -> Result<()>;

  /// Look up an entry in one bucket.
  fn get(&self, bucket: &str, key: &CacheKey) -> Result<Option<CachedEntry>>;

  /// Store a response, creating the bucket on first write.
  fn put(&self, bucket: &str, key: &CacheKey, response: &FetchResponse) -> Result<()>;

  /// All bucket names in creation order.
  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Delete a bucket and all of its entries. Returns whether it existed.
  fn delete_bucket(&self, bucket: &str) -> Result<bool>;

  /// Search every bucket, oldest first.
  fn match_any(&self, key: &CacheKey) -> Result<Option<CachedEntry>>;

  /// Delete every bucket carrying `prefix` whose name is not in `keep`.
  /// Buckets without the prefix belong to someone else and are left alone.
  fn delete_buckets_not_in(&self, keep: &[String], prefix: &str) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.bucket_names()? {
      if name.starts_with(prefix) && !keep.contains(&name) && self.delete_bucket(&name)? {
        deleted.push(name);
      }
    }
    Ok(deleted)
  }
}

/// In-memory storage. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryStorage {
  inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
  next_seq: u64,
  /// bucket name -> (creation sequence, entries by key digest)
  buckets: BTreeMap<String, (u64, HashMap<String, CachedEntry>)>,
}

impl MemoryInner {
  fn bucket_mut(&mut self, bucket: &str) -> &mut HashMap<String, CachedEntry> {
    let seq = self.next_seq;
    let slot = self
      .buckets
      .entry(bucket.to_string())
      .or_insert_with(|| (seq, HashMap::new()));
    if slot.0 == seq {
      self.next_seq += 1;
    }
    &mut slot.1
  }

  fn ordered(&self) -> Vec<(&String, &HashMap<String, CachedEntry>)> {
    let mut buckets: Vec<_> = self
      .buckets
      .iter()
      .map(|(name, (seq, entries))| (*seq, name, entries))
      .collect();
    buckets.sort_by_key(|(seq, _, _)| *seq);
    buckets
      .into_iter()
      .map(|(_, name, entries)| (name, entries))
      .collect()
  }
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStore for MemoryStorage {
  fn open(&self, bucket: &str) -> Result<()> {
    self.lock()?.bucket_mut(bucket);
    Ok(())
  }

  fn get(&self, bucket: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
    let inner = self.lock()?;
    Ok(
      inner
        .buckets
        .get(bucket)
        .and_then(|(_, entries)| entries.get(&key.digest()))
        .cloned(),
    )
  }

  fn put(&self, bucket: &str, key: &CacheKey, response: &FetchResponse) -> Result<()> {
    let entry = CachedEntry {
      key: key.clone(),
      response: response.clone(),
      cached_at: Utc::now(),
    };
    self.lock()?.bucket_mut(bucket).insert(key.digest(), entry);
    Ok(())
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let inner = self.lock()?;
    Ok(inner.ordered().into_iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    Ok(self.lock()?.buckets.remove(bucket).is_some())
  }

  fn match_any(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
    let inner = self.lock()?;
    let digest = key.digest();
    Ok(
      inner
        .ordered()
        .into_iter()
        .find_map(|(_, entries)| entries.get(&digest))
        .cloned(),
    )
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(|e| eyre!("Failed to open database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("gbshell").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named, versioned partitions
CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by normalised request descriptor
CREATE TABLE IF NOT EXISTS entries (
    bucket TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    descriptor TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(key_hash);
"#;

type EntryRow = (String, u16, String, Vec<u8>, String);

fn entry_from_row(row: EntryRow) -> Result<CachedEntry> {
  let (descriptor, status, headers, body, cached_at) = row;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to decode headers for {}: {}", descriptor, e))?;
  Ok(CachedEntry {
    key: CacheKey::from_descriptor(descriptor),
    response: FetchResponse {
      status,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStore for SqliteStorage {
  fn open(&self, bucket: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
        params![bucket],
      )
      .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;
    Ok(())
  }

  fn get(&self, bucket: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT descriptor, status, headers, body, cached_at FROM entries
         WHERE bucket = ? AND key_hash = ?",
        params![bucket, key.digest()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    row.map(entry_from_row).transpose()
  }

  fn put(&self, bucket: &str, key: &CacheKey, response: &FetchResponse) -> Result<()> {
    let mut conn = self.lock()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to encode headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
      params![bucket],
    )
    .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO entries (bucket, key_hash, descriptor, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        bucket,
        key.digest(),
        key.descriptor(),
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM buckets ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read bucket name: {}", e))?;

    Ok(names)
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE bucket = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", bucket, e))?;
    let removed = tx
      .execute("DELETE FROM buckets WHERE name = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete bucket {}: {}", bucket, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_any(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT e.descriptor, e.status, e.headers, e.body, e.cached_at FROM entries e
         INNER JOIN buckets b ON b.name = e.bucket
         WHERE e.key_hash = ?
         ORDER BY b.rowid
         LIMIT 1",
        params![key.digest()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to search caches for {}: {}", key, e))?;

    row.map(entry_from_row).transpose()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::FetchRequest;
  use url::Url;

  fn key(path: &str) -> CacheKey {
    FetchRequest::get(Url::parse(&format!("https://app.test{}", path)).unwrap()).cache_key()
  }

  fn exercise(store: &dyn CacheStore) {
    store.open("gradebook-static-v1").unwrap();
    store
      .put(
        "gradebook-static-v1",
        &key("/index.html"),
        &FetchResponse::new(200, "<html>v1").with_header("content-type", "text/html"),
      )
      .unwrap();

    let entry = store
      .get("gradebook-static-v1", &key("/index.html"))
      .unwrap()
      .unwrap();
    assert_eq!(entry.response.status, 200);
    assert_eq!(entry.response.body, b"<html>v1");
    assert_eq!(entry.response.content_type(), Some("text/html"));
    assert_eq!(entry.key.descriptor(), "GET https://app.test/index.html");

    // Wholesale replacement
    store
      .put(
        "gradebook-static-v1",
        &key("/index.html"),
        &FetchResponse::new(200, "<html>v2"),
      )
      .unwrap();
    let entry = store
      .get("gradebook-static-v1", &key("/index.html"))
      .unwrap()
      .unwrap();
    assert_eq!(entry.response.body, b"<html>v2");
    assert!(entry.response.headers.is_empty());

    // Missing entry and missing bucket both miss
    assert!(store
      .get("gradebook-static-v1", &key("/other"))
      .unwrap()
      .is_none());
    assert!(store.get("nope", &key("/index.html")).unwrap().is_none());

    // First write creates the bucket
    store
      .put("gradebook-api-v1", &key("/api/grades"), &FetchResponse::new(200, "[]"))
      .unwrap();
    assert_eq!(
      store.bucket_names().unwrap(),
      vec!["gradebook-static-v1", "gradebook-api-v1"]
    );

    let found = store.match_any(&key("/api/grades")).unwrap().unwrap();
    assert_eq!(found.response.body, b"[]");

    assert!(store.delete_bucket("gradebook-api-v1").unwrap());
    assert!(!store.delete_bucket("gradebook-api-v1").unwrap());
    assert!(store.match_any(&key("/api/grades")).unwrap().is_none());
  }

  fn exercise_pruning(store: &dyn CacheStore) {
    for name in ["gradebook-static-v1", "gradebook-static-v2", "other-app-v1"] {
      store.open(name).unwrap();
    }

    let deleted = store
      .delete_buckets_not_in(&["gradebook-static-v2".to_string()], "gradebook-")
      .unwrap();

    assert_eq!(deleted, vec!["gradebook-static-v1"]);
    assert_eq!(
      store.bucket_names().unwrap(),
      vec!["gradebook-static-v2", "other-app-v1"]
    );
  }

  #[test]
  fn test_memory_storage() {
    exercise(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_storage() {
    exercise(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_memory_pruning() {
    exercise_pruning(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_pruning() {
    exercise_pruning(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_open_is_idempotent() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store.open("gradebook-icons-v1").unwrap();
    store.open("gradebook-icons-v1").unwrap();
    assert_eq!(store.bucket_names().unwrap(), vec!["gradebook-icons-v1"]);
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2024-03-01 12:30:45").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:45+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
