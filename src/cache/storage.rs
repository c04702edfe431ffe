//! Cache storage trait and its SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use super::request::{CachedEntry, RequestKey};

/// Content class of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreClass {
  Static,
  Dynamic,
  Images,
  Api,
}

impl StoreClass {
  pub const ALL: [StoreClass; 4] = [
    StoreClass::Static,
    StoreClass::Dynamic,
    StoreClass::Images,
    StoreClass::Api,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      StoreClass::Static => "static",
      StoreClass::Dynamic => "dynamic",
      StoreClass::Images => "images",
      StoreClass::Api => "api",
    }
  }
}

/// Versioned store naming: `<namespace>-<class>-<version>`.
///
/// This format is what ends up persisted, and activation relies on it to
/// tell current stores from orphaned ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
  namespace: String,
  version: String,
}

impl StoreNames {
  pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
      version: version.into(),
    }
  }

  pub fn name(&self, class: StoreClass) -> String {
    format!("{}-{}-{}", self.namespace, class.as_str(), self.version)
  }

  /// Store names belonging to the current version.
  pub fn expected(&self) -> Vec<String> {
    StoreClass::ALL.iter().map(|c| self.name(*c)).collect()
  }

  /// A store is orphaned when it carries our namespace but isn't current.
  pub fn is_orphan(&self, name: &str) -> bool {
    name.starts_with(&format!("{}-", self.namespace)) && !self.expected().iter().any(|e| e == name)
  }
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync + 'static {
  /// Look up an entry in a store.
  fn match_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or replace an entry, creating the store if needed.
  fn put_entry(&self, store: &str, key: &RequestKey, entry: &CachedEntry) -> Result<()>;

  /// All entries in a store.
  fn entries(&self, store: &str) -> Result<Vec<CachedEntry>>;

  /// Names of every existing store.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and its entries. Returns whether it existed.
  fn delete_store(&self, store: &str) -> Result<bool>;

  /// Open a handle scoped to a single store.
  fn open<'a>(&'a self, name: &str) -> Store<'a, Self>
  where
    Self: Sized,
  {
    Store {
      storage: self,
      name: name.to_string(),
    }
  }
}

/// A handle to one named store.
pub struct Store<'a, S: CacheStorage> {
  storage: &'a S,
  name: String,
}

impl<S: CacheStorage> Store<'_, S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn match_entry(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.storage.match_entry(&self.name, key)
  }

  pub fn put(&self, key: &RequestKey, entry: &CachedEntry) -> Result<()> {
    self.storage.put_entry(&self.name, key, entry)
  }

  pub fn entries(&self) -> Result<Vec<CachedEntry>> {
    self.storage.entries(&self.name)
  }
}

/// In-memory storage used for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryStorage {
  stores: RwLock<HashMap<String, HashMap<String, CachedEntry>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn match_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let stores = self.stores.read().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      stores
        .get(store)
        .and_then(|entries| entries.get(key.as_str()))
        .cloned(),
    )
  }

  fn put_entry(&self, store: &str, key: &RequestKey, entry: &CachedEntry) -> Result<()> {
    let mut stores = self.stores.write().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    stores
      .entry(store.to_string())
      .or_default()
      .insert(key.as_str().to_string(), entry.clone());
    Ok(())
  }

  fn entries(&self, store: &str) -> Result<Vec<CachedEntry>> {
    let stores = self.stores.read().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      stores
        .get(store)
        .map(|entries| entries.values().cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let stores = self.stores.read().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut names: Vec<String> = stores.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let mut stores = self.stores.write().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.remove(store).is_some())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the given path, or the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
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

    Ok(data_dir.join("casa-cache").join("cache.db"))
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
-- Named stores, created on first write
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    captured_at TEXT NOT NULL,
    PRIMARY KEY (store_name, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(store_name);
"#;

type EntryRow = (String, u16, String, Vec<u8>, String);

fn entry_from_row(row: EntryRow) -> Result<CachedEntry> {
  let (url, status, headers, body, captured_at) = row;
  let headers: Vec<(String, String)> =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;

  Ok(CachedEntry {
    url,
    status,
    headers,
    body,
    captured_at: parse_datetime(&captured_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn match_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT url, status, headers, body, captured_at FROM cache_entries
         WHERE store_name = ? AND request_hash = ?",
        params![store, key.digest()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    row.map(entry_from_row).transpose()
  }

  fn put_entry(&self, store: &str, key: &RequestKey, entry: &CachedEntry) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![store],
    )
    .map_err(|e| eyre!("Failed to create store {}: {}", store, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (store_name, request_hash, request_key, url, status, headers, body, captured_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        store,
        key.digest(),
        key.as_str(),
        entry.url,
        entry.status,
        headers,
        entry.body,
        format_datetime(&entry.captured_at),
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entries(&self, store: &str) -> Result<Vec<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, captured_at FROM cache_entries
         WHERE store_name = ?
         ORDER BY request_key",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows: Vec<EntryRow> = stmt
      .query_map(params![store], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows.into_iter().map(entry_from_row).collect()
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![store],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a capture timestamp stored as RFC 3339.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
