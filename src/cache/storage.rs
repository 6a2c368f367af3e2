//! Cache storage trait and SQLite implementation.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::entry::{CacheEntry, GenerationInfo};
use super::key::RequestKey;
use crate::db::{parse_timestamp, Database};
use crate::http::Headers;

/// Trait for response store backends.
///
/// Every method is a single atomic step: a reader sees either the old or the
/// new entry for a key, never a partial write.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open_generation(&self, name: &str) -> Result<()>;

  /// All generations, oldest first.
  fn generations(&self) -> Result<Vec<GenerationInfo>>;

  /// Name of the current generation, if one has been activated.
  fn current_generation(&self) -> Result<Option<String>>;

  /// Make `name` the only current generation.
  fn set_current(&self, name: &str) -> Result<()>;

  /// Make `name` current and delete every other generation with its entries,
  /// all or nothing. Returns each evicted generation with its entry count.
  fn promote(&self, name: &str) -> Result<Vec<(String, usize)>>;

  /// Delete a generation and all of its entries. Returns the number of entries removed.
  fn delete_generation(&self, name: &str) -> Result<usize>;

  /// Look up the entry for `key` in `generation`.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CacheEntry>>;

  /// Insert or replace the entry for its key in `generation`.
  fn put(&self, generation: &str, entry: &CacheEntry) -> Result<()>;

  /// Number of entries in `generation`.
  fn entry_count(&self, generation: &str) -> Result<usize>;
}

/// SQLite-based response storage.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl CacheStorage for SqliteStorage {
  fn open_generation(&self, name: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name, created_at) VALUES (?, ?)",
        params![name, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to open generation {}: {}", name, e))?;
    Ok(())
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT g.name, g.created_at, g.is_current,
                (SELECT COUNT(*) FROM cache_entries e WHERE e.generation = g.name)
         FROM cache_generations g
         ORDER BY g.created_at, g.rowid",
      )
      .map_err(|e| eyre!("Failed to prepare generation query: {}", e))?;

    let rows: Vec<(String, String, bool, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
      .map_err(|e| eyre!("Failed to query generations: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read generation row: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, current, count)| {
        Ok(GenerationInfo {
          name,
          created_at: parse_timestamp(&created_at)?,
          current,
          entry_count: count as usize,
        })
      })
      .collect()
  }

  fn current_generation(&self) -> Result<Option<String>> {
    let conn = self.db.lock()?;
    conn
      .query_row(
        "SELECT name FROM cache_generations WHERE is_current = 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read current generation: {}", e))
  }

  fn set_current(&self, name: &str) -> Result<()> {
    let conn = self.db.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name, created_at) VALUES (?, ?)",
      params![name, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to open generation {}: {}", name, e))?;
    tx.execute(
      "UPDATE cache_generations SET is_current = (name = ?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to mark generation {} current: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn promote(&self, name: &str) -> Result<Vec<(String, usize)>> {
    let conn = self.db.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name, created_at) VALUES (?, ?)",
      params![name, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to open generation {}: {}", name, e))?;

    let others: Vec<String> = {
      let mut stmt = tx
        .prepare("SELECT name FROM cache_generations WHERE name != ? ORDER BY created_at, rowid")
        .map_err(|e| eyre!("Failed to prepare generation query: {}", e))?;
      let names = stmt
        .query_map(params![name], |row| row.get(0))
        .map_err(|e| eyre!("Failed to query generations: {}", e))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| eyre!("Failed to read generation row: {}", e))?;
      names
    };

    let mut evicted = Vec::with_capacity(others.len());
    for other in others {
      let removed = tx
        .execute(
          "DELETE FROM cache_entries WHERE generation = ?",
          params![other],
        )
        .map_err(|e| eyre!("Failed to delete entries of {}: {}", other, e))?;
      tx.execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![other],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", other, e))?;
      evicted.push((other, removed));
    }

    tx.execute(
      "UPDATE cache_generations SET is_current = 1 WHERE name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to mark generation {} current: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(evicted)
  }

  fn delete_generation(&self, name: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_entries WHERE generation = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    tx.execute(
      "DELETE FROM cache_generations WHERE name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed)
  }

  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
    let conn = self.db.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE generation = ? AND key_hash = ?",
        params![generation, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(CacheEntry {
          key: key.clone(),
          status,
          headers,
          body,
          stored_at: parse_timestamp(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, entry: &CacheEntry) -> Result<()> {
    let key_data =
      serde_json::to_string(&entry.key).map_err(|e| eyre!("Failed to serialize key: {}", e))?;
    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name, created_at) VALUES (?, ?)",
      params![generation, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to open generation {}: {}", generation, e))?;
    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (generation, key_hash, key_data, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        generation,
        entry.key.cache_hash(),
        key_data,
        entry.status,
        headers,
        entry.body,
        entry.stored_at.to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }
}
