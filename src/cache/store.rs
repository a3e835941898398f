//! Cache store trait and backends.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::http::Response;

/// A cache entry as returned from a store lookup.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  /// The captured response
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// An entry summary for inspection (status output).
#[derive(Debug, Clone)]
pub struct EntrySummary {
  pub url: String,
  pub status: u16,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Generations are named namespaces of key → response entries. All methods
/// are synchronous; callers on the async side treat them as short bounded
/// operations (no network I/O ever happens here).
pub trait CacheStore: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn ensure_generation(&self, name: &str) -> Result<()>;

  /// Names of all generations currently present.
  fn list_generations(&self) -> Result<Vec<String>>;

  /// Delete a generation and all its entries. Deleting a missing
  /// generation is a no-op.
  fn delete_generation(&self, name: &str) -> Result<()>;

  /// Look up an entry. A hit refreshes the entry's last-used marker.
  fn get(&self, generation: &str, key: &str) -> Result<Option<StoredResponse>>;

  /// Write or overwrite an entry.
  fn put(&self, generation: &str, key: &str, url: &str, response: &Response) -> Result<()>;

  /// Number of entries in a generation.
  fn count(&self, generation: &str) -> Result<usize>;

  /// Evict least-recently-used entries until at most `max_entries` remain.
  /// Returns the number of entries deleted.
  fn trim(&self, generation: &str, max_entries: usize) -> Result<usize>;

  /// Most recently used entries, newest first.
  fn recent(&self, generation: &str, limit: usize) -> Result<Vec<EntrySummary>>;
}

/// SQLite-based durable store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory store, for tests and throwaway runs.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("satchel").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named cache generations (one row per live namespace)
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
);

-- Cached responses, keyed by request identity within a generation
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
    last_used TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
    PRIMARY KEY (generation, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_last_used
    ON entries(generation, last_used);
"#;

impl CacheStore for SqliteStore {
  fn ensure_generation(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create generation {}: {}", name, e))?;

    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY created_at")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_generation(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM entries WHERE generation = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    conn
      .execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", name, e))?;

    Ok(())
  }

  fn get(&self, generation: &str, key: &str) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE generation = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![generation, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    let (status, headers_blob, body, cached_at_str) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    let headers: Vec<(String, String)> = serde_json::from_slice(&headers_blob)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
    let cached_at = parse_datetime(&cached_at_str)?;

    conn
      .execute(
        "UPDATE entries SET last_used = strftime('%Y-%m-%d %H:%M:%f', 'now')
         WHERE generation = ? AND entry_key = ?",
        params![generation, key],
      )
      .map_err(|e| eyre!("Failed to refresh last_used: {}", e))?;

    Ok(Some(StoredResponse {
      response: Response {
        status,
        headers,
        body,
      },
      cached_at,
    }))
  }

  fn put(&self, generation: &str, key: &str, url: &str, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers =
      serde_json::to_vec(&response.headers).map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries (generation, entry_key, url, status, headers, body, cached_at, last_used)
         VALUES (?, ?, ?, ?, ?, ?, strftime('%Y-%m-%d %H:%M:%f', 'now'), strftime('%Y-%m-%d %H:%M:%f', 'now'))",
        params![generation, key, url, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", url, e))?;

    Ok(())
  }

  fn count(&self, generation: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as usize)
  }

  fn trim(&self, generation: &str, max_entries: usize) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    let max = max_entries as i64;
    if count <= max {
      return Ok(0);
    }

    let deleted = conn
      .execute(
        "DELETE FROM entries WHERE generation = ?1 AND entry_key IN (
           SELECT entry_key FROM entries WHERE generation = ?1
           ORDER BY last_used ASC LIMIT ?2
         )",
        params![generation, count - max],
      )
      .map_err(|e| eyre!("Failed to trim generation {}: {}", generation, e))?;

    Ok(deleted)
  }

  fn recent(&self, generation: &str, limit: usize) -> Result<Vec<EntrySummary>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, status, cached_at FROM entries
         WHERE generation = ? ORDER BY last_used DESC LIMIT ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, u16, String)> = stmt
      .query_map(params![generation, limit as i64], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to list entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    rows
      .into_iter()
      .map(|(url, status, cached_at)| {
        Ok(EntrySummary {
          url,
          status,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

/// In-memory store. Nothing survives the process; used for tests and for
/// running with durability disabled.
pub struct MemoryStore {
  generations: Mutex<HashMap<String, HashMap<String, MemoryEntry>>>,
  used_seq: AtomicU64,
}

struct MemoryEntry {
  url: String,
  response: Response,
  cached_at: DateTime<Utc>,
  last_used: u64,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      generations: Mutex::new(HashMap::new()),
      used_seq: AtomicU64::new(0),
    }
  }

  fn next_seq(&self) -> u64 {
    self.used_seq.fetch_add(1, Ordering::SeqCst)
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStore for MemoryStore {
  fn ensure_generation(&self, name: &str) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    generations.entry(name.to_string()).or_default();
    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<String>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut names: Vec<String> = generations.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn delete_generation(&self, name: &str) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    generations.remove(name);
    Ok(())
  }

  fn get(&self, generation: &str, key: &str) -> Result<Option<StoredResponse>> {
    let seq = self.next_seq();
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let entry = match generations.get_mut(generation).and_then(|g| g.get_mut(key)) {
      Some(entry) => entry,
      None => return Ok(None),
    };

    entry.last_used = seq;
    Ok(Some(StoredResponse {
      response: entry.response.clone(),
      cached_at: entry.cached_at,
    }))
  }

  fn put(&self, generation: &str, key: &str, url: &str, response: &Response) -> Result<()> {
    let seq = self.next_seq();
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    generations.entry(generation.to_string()).or_default().insert(
      key.to_string(),
      MemoryEntry {
        url: url.to_string(),
        response: response.clone(),
        cached_at: Utc::now(),
        last_used: seq,
      },
    );

    Ok(())
  }

  fn count(&self, generation: &str) -> Result<usize> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(generations.get(generation).map_or(0, HashMap::len))
  }

  fn trim(&self, generation: &str, max_entries: usize) -> Result<usize> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let entries = match generations.get_mut(generation) {
      Some(entries) => entries,
      None => return Ok(0),
    };

    if entries.len() <= max_entries {
      return Ok(0);
    }

    let mut by_use: Vec<(String, u64)> = entries
      .iter()
      .map(|(key, entry)| (key.clone(), entry.last_used))
      .collect();
    by_use.sort_by_key(|(_, used)| *used);

    let excess = entries.len() - max_entries;
    for (key, _) in by_use.into_iter().take(excess) {
      entries.remove(&key);
    }

    Ok(excess)
  }

  fn recent(&self, generation: &str, limit: usize) -> Result<Vec<EntrySummary>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let entries = match generations.get(generation) {
      Some(entries) => entries,
      None => return Ok(Vec::new()),
    };

    let mut by_use: Vec<&MemoryEntry> = entries.values().collect();
    by_use.sort_by_key(|entry| std::cmp::Reverse(entry.last_used));

    Ok(
      by_use
        .into_iter()
        .take(limit)
        .map(|entry| EntrySummary {
          url: entry.url.clone(),
          status: entry.response.status,
          cached_at: entry.cached_at,
        })
        .collect(),
    )
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // Stored as "YYYY-MM-DD HH:MM:SS.SSS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(status: u16, body: &[u8]) -> Response {
    Response {
      status,
      headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
      body: body.to_vec(),
    }
  }

  fn roundtrip(store: &dyn CacheStore) {
    store.ensure_generation("runtime-v1").unwrap();
    store
      .put("runtime-v1", "k1", "https://example.com/a", &response(200, b"hello"))
      .unwrap();

    let hit = store.get("runtime-v1", "k1").unwrap().unwrap();
    assert_eq!(hit.response.status, 200);
    assert_eq!(hit.response.body, b"hello");
    assert_eq!(hit.response.header("content-type"), Some("text/plain"));

    assert!(store.get("runtime-v1", "missing").unwrap().is_none());
    assert!(store.get("other-gen", "k1").unwrap().is_none());
  }

  #[test]
  fn test_sqlite_roundtrip() {
    let store = SqliteStore::open_in_memory().unwrap();
    roundtrip(&store);
  }

  #[test]
  fn test_memory_roundtrip() {
    let store = MemoryStore::new();
    roundtrip(&store);
  }

  #[test]
  fn test_put_overwrites() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.ensure_generation("g").unwrap();

    store
      .put("g", "k", "https://example.com/x", &response(200, b"old"))
      .unwrap();
    store
      .put("g", "k", "https://example.com/x", &response(200, b"new"))
      .unwrap();

    let hit = store.get("g", "k").unwrap().unwrap();
    assert_eq!(hit.response.body, b"new");
    assert_eq!(store.count("g").unwrap(), 1);
  }

  #[test]
  fn test_generation_lifecycle() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.ensure_generation("app-precache-v1").unwrap();
    store.ensure_generation("app-runtime-v1").unwrap();
    // Creating twice is fine
    store.ensure_generation("app-runtime-v1").unwrap();

    assert_eq!(
      store.list_generations().unwrap(),
      vec!["app-precache-v1".to_string(), "app-runtime-v1".to_string()]
    );

    store
      .put("app-precache-v1", "k", "https://example.com/", &response(200, b"shell"))
      .unwrap();
    store.delete_generation("app-precache-v1").unwrap();

    assert_eq!(store.list_generations().unwrap(), vec!["app-runtime-v1".to_string()]);
    assert!(store.get("app-precache-v1", "k").unwrap().is_none());

    // Deleting a missing generation is a no-op
    store.delete_generation("nope").unwrap();
  }

  #[test]
  fn test_trim_evicts_least_recently_used() {
    let store = MemoryStore::new();
    store.ensure_generation("g").unwrap();

    for name in ["a", "b", "c", "d"] {
      let url = format!("https://example.com/{}", name);
      store.put("g", name, &url, &response(200, name.as_bytes())).unwrap();
    }

    // Touch "a" so it is the most recently used
    store.get("g", "a").unwrap();

    let deleted = store.trim("g", 2).unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(store.count("g").unwrap(), 2);
    assert!(store.get("g", "a").unwrap().is_some());
    assert!(store.get("g", "d").unwrap().is_some());
    assert!(store.get("g", "b").unwrap().is_none());
    assert!(store.get("g", "c").unwrap().is_none());
  }

  #[test]
  fn test_sqlite_trim_orders_by_last_used() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.ensure_generation("g").unwrap();

    for name in ["a", "b", "c"] {
      let url = format!("https://example.com/{}", name);
      store.put("g", name, &url, &response(200, name.as_bytes())).unwrap();
      // Millisecond timestamps order the entries
      std::thread::sleep(std::time::Duration::from_millis(5));
    }

    store.get("g", "a").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));

    let deleted = store.trim("g", 1).unwrap();
    assert_eq!(deleted, 2);
    assert!(store.get("g", "a").unwrap().is_some());
    assert!(store.get("g", "b").unwrap().is_none());
    assert!(store.get("g", "c").unwrap().is_none());
  }

  #[test]
  fn test_trim_noop_under_cap() {
    let store = MemoryStore::new();
    store.ensure_generation("g").unwrap();
    store
      .put("g", "k", "https://example.com/k", &response(200, b"x"))
      .unwrap();

    assert_eq!(store.trim("g", 10).unwrap(), 0);
    assert_eq!(store.count("g").unwrap(), 1);
  }

  #[test]
  fn test_recent_lists_newest_first() {
    let store = MemoryStore::new();
    store.ensure_generation("g").unwrap();

    store
      .put("g", "a", "https://example.com/a", &response(200, b"a"))
      .unwrap();
    store
      .put("g", "b", "https://example.com/b", &response(404, b"b"))
      .unwrap();

    let recent = store.recent("g", 10).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].url, "https://example.com/b");
    assert_eq!(recent[0].status, 404);
    assert_eq!(recent[1].url, "https://example.com/a");

    assert_eq!(store.recent("g", 1).unwrap().len(), 1);
    assert!(store.recent("missing", 10).unwrap().is_empty());
  }
}
