//! Strategy executor: applies the caching/retry strategy chosen for a traffic class.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStorage, RequestKey};
use crate::classify::TrafficClass;
use crate::error::AgentError;
use crate::event::SyncScheduler;
use crate::http::{Request, Response, ResponseSource};
use crate::network::Network;
use crate::queue::RetryQueue;
use crate::stats::Stats;

/// Runs the four strategies against the store, the retry queue and the network.
///
/// None of the strategies return an error: every failure path ends in a real
/// response, a cached copy, a 202 for queued requests, or a synthesized 503.
pub struct StrategyExecutor<S: CacheStorage, Q: RetryQueue, N: Network> {
  storage: Arc<S>,
  queue: Arc<Q>,
  network: Arc<N>,
  stats: Arc<Stats>,
  scheduler: SyncScheduler,
  /// Generation that lookups and writes go to
  generation: String,
  vary_headers: Vec<String>,
  sync_tag: String,
}

impl<S: CacheStorage, Q: RetryQueue, N: Network> StrategyExecutor<S, Q, N> {
  pub fn new(
    storage: Arc<S>,
    queue: Arc<Q>,
    network: Arc<N>,
    stats: Arc<Stats>,
    scheduler: SyncScheduler,
    generation: impl Into<String>,
  ) -> Self {
    Self {
      storage,
      queue,
      network,
      stats,
      scheduler,
      generation: generation.into(),
      vary_headers: Vec::new(),
      sync_tag: "analytics-sync".to_string(),
    }
  }

  /// Request headers that take part in the cache key.
  pub fn with_vary_headers(mut self, vary_headers: Vec<String>) -> Self {
    self.vary_headers = vary_headers;
    self
  }

  /// Tag requested when a deferred request is queued.
  pub fn with_sync_tag(mut self, tag: impl Into<String>) -> Self {
    self.sync_tag = tag.into();
    self
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn key_for(&self, request: &Request) -> RequestKey {
    RequestKey::from_request(request, &self.vary_headers)
  }

  /// Dispatch to the strategy for `class`.
  pub async fn execute(&self, class: TrafficClass, request: &Request) -> Response {
    match class {
      TrafficClass::Static => self.cache_first(request).await,
      TrafficClass::Api => self.network_first(request).await,
      TrafficClass::UserData => self.passthrough(request).await,
      TrafficClass::Analytics => self.deferred(request).await,
    }
  }

  /// Serve from the store; go to the network only on a miss.
  ///
  /// 1. Hit - return the cached copy without touching the network
  /// 2. Miss - fetch, store a copy, return it
  /// 3. Miss and network failure - 503
  pub async fn cache_first(&self, request: &Request) -> Response {
    let key = self.key_for(request);

    if let Some(entry) = self.lookup(&key) {
      self.stats.record_hit();
      debug!(url = %request.url, "cache hit");
      return entry.into_response(ResponseSource::Cache);
    }
    self.stats.record_miss();
    debug!(url = %request.url, "cache miss");

    match self.network.fetch(request).await {
      Ok(response) => {
        self.write_through(key, &response);
        response
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "cache miss and network unavailable");
        Response::fallback(&err.to_string())
      }
    }
  }

  /// Prefer the network; fall back to a stale copy, then to 503.
  pub async fn network_first(&self, request: &Request) -> Response {
    let key = self.key_for(request);

    match self.network.fetch(request).await {
      Ok(response) => {
        self.write_through(key, &response);
        response
      }
      Err(err) => match self.lookup(&key) {
        Some(entry) => {
          self.stats.record_hit();
          info!(url = %request.url, error = %err, "network unavailable, serving stale copy");
          entry.into_response(ResponseSource::StaleCache)
        }
        None => {
          self.stats.record_miss();
          warn!(url = %request.url, error = %err, "network unavailable and nothing cached");
          Response::fallback(&err.to_string())
        }
      },
    }
  }

  /// Always the network; the store is never read or written.
  pub async fn passthrough(&self, request: &Request) -> Response {
    match self.network.fetch(request).await {
      Ok(response) => response,
      Err(err) => {
        warn!(url = %request.url, error = %err, "network unavailable for uncached request");
        Response::fallback(&err.to_string())
      }
    }
  }

  /// Try to deliver now; on failure park the request and answer 202.
  pub async fn deferred(&self, request: &Request) -> Response {
    let err = match self.network.fetch(request).await {
      Ok(response) => return response,
      Err(err) => err,
    };

    match self.queue.enqueue(request) {
      Ok(item) => {
        self.stats.record_queued();
        info!(id = item.id, url = %request.url, error = %err, "request queued for replay");
      }
      Err(e) => {
        // The caller still gets 202; this request is lost
        warn!(url = %request.url, error = %AgentError::queue(e), "failed to persist queued request");
      }
    }
    self.scheduler.register(&self.sync_tag);

    Response::queued()
  }

  /// Store lookup that treats an unavailable store as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<CacheEntry> {
    match self.storage.get(&self.generation, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key = %key.description(), error = %AgentError::store(e), "cache lookup failed");
        None
      }
    }
  }

  /// Copy a successful response into the store. Non-2xx responses are not cached.
  fn write_through(&self, key: RequestKey, response: &Response) {
    if !response.is_success() {
      debug!(status = response.status, "not caching unsuccessful response");
      return;
    }
    let entry = CacheEntry::capture(key, response);
    if let Err(e) = self.storage.put(&self.generation, &entry) {
      warn!(key = %entry.key.description(), error = %AgentError::store(e), "cache write failed");
    }
  }
}

impl<S: CacheStorage, Q: RetryQueue, N: Network> Clone for StrategyExecutor<S, Q, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      queue: Arc::clone(&self.queue),
      network: Arc::clone(&self.network),
      stats: Arc::clone(&self.stats),
      scheduler: self.scheduler.clone(),
      generation: self.generation.clone(),
      vary_headers: self.vary_headers.clone(),
      sync_tag: self.sync_tag.clone(),
    }
  }
}
