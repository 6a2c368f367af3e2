//! Durable FIFO of requests waiting to be replayed.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

use crate::db::{parse_timestamp, Database};
use crate::http::{Headers, Request};

/// A deferred request, copied verbatim from the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItem {
  /// Monotonic; lower ids were enqueued first
  pub id: i64,
  pub method: String,
  pub url: String,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
  /// Rebuild the request for replay.
  pub fn to_request(&self) -> Result<Request> {
    let url = Url::parse(&self.url)
      .map_err(|e| eyre!("Queued item {} has invalid URL '{}': {}", self.id, self.url, e))?;
    Ok(Request {
      method: self.method.clone(),
      url,
      headers: self.headers.clone(),
      body: self.body.clone(),
    })
  }
}

/// Trait for retry queue backends.
///
/// `enqueue` is atomic: concurrent appends are serialized and none are lost.
pub trait RetryQueue: Send + Sync {
  /// Append a copy of `request` to the tail.
  fn enqueue(&self, request: &Request) -> Result<QueueItem>;

  /// Oldest pending item.
  fn front(&self) -> Result<Option<QueueItem>>;

  /// All pending items in FIFO order.
  fn list(&self) -> Result<Vec<QueueItem>>;

  /// Remove an item after a successful replay. Returns false if it was already gone.
  fn remove(&self, id: i64) -> Result<bool>;

  fn len(&self) -> Result<usize>;

  fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

/// SQLite-backed retry queue.
pub struct SqliteQueue {
  db: Arc<Database>,
}

impl SqliteQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl RetryQueue for SqliteQueue {
  fn enqueue(&self, request: &Request) -> Result<QueueItem> {
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let enqueued_at = Utc::now();

    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT INTO retry_queue (method, url, headers, body, enqueued_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          request.method,
          request.url.as_str(),
          headers,
          request.body,
          enqueued_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue request: {}", e))?;

    Ok(QueueItem {
      id: conn.last_insert_rowid(),
      method: request.method.clone(),
      url: request.url.to_string(),
      headers: request.headers.clone(),
      body: request.body.clone(),
      enqueued_at,
    })
  }

  fn front(&self) -> Result<Option<QueueItem>> {
    let conn = self.db.lock()?;
    let row = conn
      .query_row(
        "SELECT id, method, url, headers, body, enqueued_at FROM retry_queue
         ORDER BY id LIMIT 1",
        [],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to read queue head: {}", e))?;

    row.map(RawItem::decode).transpose()
  }

  fn list(&self) -> Result<Vec<QueueItem>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, method, url, headers, body, enqueued_at FROM retry_queue
         ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<RawItem> = stmt
      .query_map([], read_row)
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read queue row: {}", e))?;

    rows.into_iter().map(RawItem::decode).collect()
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let conn = self.db.lock()?;
    let removed = conn
      .execute("DELETE FROM retry_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued item {}: {}", id, e))?;
    Ok(removed > 0)
  }

  fn len(&self) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM retry_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;
    Ok(count as usize)
  }
}

/// Columns as stored, before JSON and timestamp decoding.
struct RawItem {
  id: i64,
  method: String,
  url: String,
  headers: String,
  body: Vec<u8>,
  enqueued_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawItem> {
  Ok(RawItem {
    id: row.get(0)?,
    method: row.get(1)?,
    url: row.get(2)?,
    headers: row.get(3)?,
    body: row.get(4)?,
    enqueued_at: row.get(5)?,
  })
}

impl RawItem {
  fn decode(self) -> Result<QueueItem> {
    let headers: Headers = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize queued headers: {}", e))?;
    Ok(QueueItem {
      id: self.id,
      method: self.method,
      url: self.url,
      headers,
      body: self.body,
      enqueued_at: parse_timestamp(&self.enqueued_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn queue() -> SqliteQueue {
    SqliteQueue::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  fn beacon(n: u32) -> Request {
    Request::new(
      "POST",
      Url::parse(&format!("https://example.com/analytics/collect?n={}", n)).unwrap(),
    )
    .with_header("content-type", "application/json")
    .with_body(format!(r#"{{"event":{}}}"#, n))
  }

  #[test]
  fn test_enqueue_copies_request_verbatim() {
    let q = queue();
    let req = beacon(1);
    q.enqueue(&req).unwrap();

    let item = q.front().unwrap().unwrap();
    assert_eq!(item.method, "POST");
    assert_eq!(item.to_request().unwrap(), req);
  }

  #[test]
  fn test_fifo_order() {
    let q = queue();
    for n in 0..3 {
      q.enqueue(&beacon(n)).unwrap();
    }

    let urls: Vec<_> = q.list().unwrap().into_iter().map(|i| i.url).collect();
    assert!(urls[0].ends_with("n=0"));
    assert!(urls[1].ends_with("n=1"));
    assert!(urls[2].ends_with("n=2"));
    assert!(q.front().unwrap().unwrap().url.ends_with("n=0"));
  }

  #[test]
  fn test_remove_only_named_item() {
    let q = queue();
    let first = q.enqueue(&beacon(0)).unwrap();
    q.enqueue(&beacon(1)).unwrap();

    assert!(q.remove(first.id).unwrap());
    assert!(!q.remove(first.id).unwrap());
    assert_eq!(q.len().unwrap(), 1);
    assert!(q.front().unwrap().unwrap().url.ends_with("n=1"));
  }

  #[test]
  fn test_empty_queue() {
    let q = queue();
    assert!(q.is_empty().unwrap());
    assert!(q.front().unwrap().is_none());
    assert!(q.list().unwrap().is_empty());
  }

  #[test]
  fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.db");

    {
      let q = SqliteQueue::new(Arc::new(Database::open(Some(&path)).unwrap()));
      q.enqueue(&beacon(7)).unwrap();
    }

    let q = SqliteQueue::new(Arc::new(Database::open(Some(&path)).unwrap()));
    let item = q.front().unwrap().unwrap();
    assert_eq!(item.to_request().unwrap(), beacon(7));
  }

  #[test]
  fn test_concurrent_enqueues_are_not_lost() {
    let q = Arc::new(queue());
    let handles: Vec<_> = (0..8)
      .map(|n| {
        let q = Arc::clone(&q);
        std::thread::spawn(move || q.enqueue(&beacon(n)).unwrap())
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    assert_eq!(q.len().unwrap(), 8);
  }
}
