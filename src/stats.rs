//! Counters exposed through the statistics query.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
  cache_hits: AtomicU64,
  cache_misses: AtomicU64,
  queued: AtomicU64,
  replayed: AtomicU64,
}

impl Stats {
  pub fn record_hit(&self) {
    self.cache_hits.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_miss(&self) {
    self.cache_misses.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_queued(&self) {
    self.queued.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_replay(&self) {
    self.replayed.fetch_add(1, Ordering::Relaxed);
  }

  /// Point-in-time copy. `pending` is the current queue depth.
  pub fn snapshot(&self, pending: usize) -> StatsSnapshot {
    StatsSnapshot {
      cache_hits: self.cache_hits.load(Ordering::Relaxed),
      cache_misses: self.cache_misses.load(Ordering::Relaxed),
      queued: self.queued.load(Ordering::Relaxed),
      replayed: self.replayed.load(Ordering::Relaxed),
      pending,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
  pub cache_hits: u64,
  pub cache_misses: u64,
  /// Requests parked in the retry queue since startup
  pub queued: u64,
  /// Queued requests delivered by a drain since startup
  pub replayed: u64,
  /// Items currently waiting in the retry queue
  pub pending: usize,
}
