//! Lifecycle controller: install, activate, drain and push.

use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, RequestKey};
use crate::config::NotificationConfig;
use crate::error::AgentError;
use crate::http::Request;
use crate::network::Network;
use crate::notify::{resolve_click, ClickOutcome, Notification};
use crate::queue::RetryQueue;
use crate::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
  /// Nothing installed by this controller yet
  Idle,
  Installing,
  Installed,
  Activating,
  Active,
}

/// Outcome of populating a generation from the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
  pub generation: String,
  /// Resolved URLs that were cached
  pub cached: Vec<String>,
  /// Manifest entries that were not cached, with the reason
  pub failed: Vec<(String, String)>,
}

impl InstallReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }

  /// `InstallManifestPartial` when any asset failed. Never fatal.
  pub fn as_error(&self) -> Option<AgentError> {
    if self.is_complete() {
      None
    } else {
      Some(AgentError::InstallManifestPartial {
        failed: self.failed.len(),
        total: self.failed.len() + self.cached.len(),
      })
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
  pub current: String,
  /// Generations deleted during this activation
  pub evicted: Vec<String>,
  /// Open clients are now routed through this agent
  pub claimed_clients: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
  /// Tag does not belong to this agent
  Ignored,
  /// Another drain holds the flag
  AlreadyRunning,
  /// Queue is empty
  Completed { replayed: usize },
  /// A replay failed; the failed item and everything after it stay queued
  Halted {
    replayed: usize,
    /// Items left in the queue; `None` if the queue could not be read
    remaining: Option<usize>,
    reason: String,
  },
}

/// Manages store generations across upgrades and drains the retry queue.
pub struct LifecycleController<S: CacheStorage, Q: RetryQueue, N: Network> {
  storage: Arc<S>,
  queue: Arc<Q>,
  network: Arc<N>,
  stats: Arc<Stats>,
  generation: String,
  origin: Url,
  vary_headers: Vec<String>,
  sync_tag: String,
  notification: NotificationConfig,
  state: RwLock<LifecycleState>,
  draining: AtomicBool,
}

/// Clears the drain flag when the drain ends, including on early return.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl<S: CacheStorage, Q: RetryQueue, N: Network> LifecycleController<S, Q, N> {
  pub fn new(
    storage: Arc<S>,
    queue: Arc<Q>,
    network: Arc<N>,
    stats: Arc<Stats>,
    generation: impl Into<String>,
    origin: Url,
  ) -> Self {
    Self {
      storage,
      queue,
      network,
      stats,
      generation: generation.into(),
      origin,
      vary_headers: Vec::new(),
      sync_tag: "analytics-sync".to_string(),
      notification: NotificationConfig::default(),
      state: RwLock::new(LifecycleState::Idle),
      draining: AtomicBool::new(false),
    }
  }

  pub fn with_vary_headers(mut self, vary_headers: Vec<String>) -> Self {
    self.vary_headers = vary_headers;
    self
  }

  pub fn with_sync_tag(mut self, tag: impl Into<String>) -> Self {
    self.sync_tag = tag.into();
    self
  }

  pub fn with_notification(mut self, notification: NotificationConfig) -> Self {
    self.notification = notification;
    self
  }

  pub fn state(&self) -> LifecycleState {
    match self.state.read() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  fn set_state(&self, next: LifecycleState) {
    let mut state = match self.state.write() {
      Ok(state) => state,
      Err(poisoned) => poisoned.into_inner(),
    };
    debug!(from = ?*state, to = ?next, "lifecycle transition");
    *state = next;
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::Acquire)
  }

  /// Open this controller's generation and fill it from `manifest`.
  ///
  /// Best-effort: failed assets are logged and reported, and the controller
  /// reaches `Installed` regardless.
  pub async fn install(&self, manifest: &[String]) -> InstallReport {
    self.set_state(LifecycleState::Installing);
    info!(generation = %self.generation, assets = manifest.len(), "installing");

    if let Err(e) = self.storage.open_generation(&self.generation) {
      warn!(generation = %self.generation, error = %AgentError::store(e), "failed to open generation");
    }

    let results = join_all(manifest.iter().map(|entry| self.cache_asset(entry))).await;

    let mut report = InstallReport {
      generation: self.generation.clone(),
      cached: Vec::new(),
      failed: Vec::new(),
    };
    for (entry, result) in manifest.iter().zip(results) {
      match result {
        Ok(url) => report.cached.push(url),
        Err(reason) => {
          warn!(asset = %entry, %reason, "manifest asset not cached");
          report.failed.push((entry.clone(), reason));
        }
      }
    }

    if let Some(err) = report.as_error() {
      warn!(generation = %self.generation, error = %err, "install finished with missing assets");
    }
    self.set_state(LifecycleState::Installed);
    info!(generation = %self.generation, cached = report.cached.len(), "installed");
    report
  }

  async fn cache_asset(&self, entry: &str) -> Result<String, String> {
    let url = self
      .origin
      .join(entry)
      .map_err(|e| format!("invalid manifest URL: {}", e))?;
    let request = Request::get(url);

    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|e| e.to_string())?;
    if !response.is_success() {
      return Err(format!("unexpected status {}", response.status));
    }

    let key = RequestKey::from_request(&request, &self.vary_headers);
    self
      .storage
      .put(&self.generation, &CacheEntry::capture(key, &response))
      .map_err(|e| AgentError::store(e).to_string())?;

    Ok(request.url.to_string())
  }

  /// Make this controller's generation current and delete every other one.
  pub async fn activate(&self) -> Result<ActivationReport, AgentError> {
    let previous = self.state();
    self.set_state(LifecycleState::Activating);

    match self.evict_others() {
      Ok(evicted) => {
        self.set_state(LifecycleState::Active);
        info!(generation = %self.generation, evicted = ?evicted, "activated, claiming clients");
        Ok(ActivationReport {
          current: self.generation.clone(),
          evicted,
          claimed_clients: true,
        })
      }
      Err(e) => {
        self.set_state(previous);
        Err(AgentError::store(e))
      }
    }
  }

  fn evict_others(&self) -> color_eyre::Result<Vec<String>> {
    let evicted = self.storage.promote(&self.generation)?;
    Ok(
      evicted
        .into_iter()
        .map(|(generation, entries)| {
          info!(%generation, entries, "evicted generation");
          generation
        })
        .collect(),
    )
  }

  /// Replay queued requests in FIFO order.
  ///
  /// Delivery is at-least-once: if the server accepts a replay but the
  /// response is lost, the item is sent again on the next drain.
  pub async fn drain(&self, tag: &str) -> DrainOutcome {
    if tag != self.sync_tag {
      debug!(tag, expected = %self.sync_tag, "ignoring sync for unknown tag");
      return DrainOutcome::Ignored;
    }

    if self
      .draining
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!(tag, "drain already in progress");
      return DrainOutcome::AlreadyRunning;
    }
    let _guard = DrainGuard(&self.draining);

    let mut replayed = 0;
    loop {
      let item = match self.queue.front() {
        Ok(Some(item)) => item,
        Ok(None) => break,
        Err(e) => return self.halt(replayed, AgentError::queue(e).to_string()),
      };

      let request = match item.to_request() {
        Ok(request) => request,
        Err(e) => {
          // Unreplayable; leaving it would block the queue forever
          warn!(id = item.id, error = %e, "dropping corrupt queued request");
          if let Err(e) = self.queue.remove(item.id) {
            return self.halt(replayed, AgentError::queue(e).to_string());
          }
          continue;
        }
      };

      match self.network.fetch(&request).await {
        Ok(response) => {
          debug!(id = item.id, url = %item.url, status = response.status, "replayed");
          if let Err(e) = self.queue.remove(item.id) {
            return self.halt(replayed, AgentError::queue(e).to_string());
          }
          self.stats.record_replay();
          replayed += 1;
        }
        Err(e) => return self.halt(replayed, e.to_string()),
      }
    }

    info!(tag, replayed, "queue drained");
    DrainOutcome::Completed { replayed }
  }

  fn halt(&self, replayed: usize, reason: String) -> DrainOutcome {
    let remaining = match self.queue.len() {
      Ok(len) => Some(len),
      Err(e) => {
        warn!(error = %AgentError::queue(e), "failed to read queue depth");
        None
      }
    };
    warn!(replayed, ?remaining, %reason, "drain halted");
    DrainOutcome::Halted {
      replayed,
      remaining,
      reason,
    }
  }

  /// Notification for a push signal.
  pub fn push(&self, payload: Option<&str>) -> Notification {
    let notification = Notification::from_push(payload, &self.notification);
    info!(title = %notification.title, "showing notification");
    notification
  }

  pub fn notification_click(&self, action: Option<&str>) -> ClickOutcome {
    resolve_click(action, &self.origin, &self.notification.open_url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::http::Response;
  use crate::queue::SqliteQueue;
  use crate::testing::{memory_db, url, BrokenQueue, BrokenStorage, MockNetwork, ORIGIN};
  use std::time::Duration;

  type Controller = LifecycleController<SqliteStorage, SqliteQueue, MockNetwork>;

  struct Harness {
    lifecycle: Arc<Controller>,
    storage: Arc<SqliteStorage>,
    queue: Arc<SqliteQueue>,
    network: Arc<MockNetwork>,
  }

  fn harness(generation: &str) -> Harness {
    let db = memory_db();
    let storage = Arc::new(SqliteStorage::new(Arc::clone(&db)));
    let queue = Arc::new(SqliteQueue::new(db));
    let network = MockNetwork::new();
    let lifecycle = Arc::new(LifecycleController::new(
      Arc::clone(&storage),
      Arc::clone(&queue),
      Arc::clone(&network),
      Arc::new(Stats::default()),
      generation,
      Url::parse(ORIGIN).unwrap(),
    ));
    Harness {
      lifecycle,
      storage,
      queue,
      network,
    }
  }

  fn manifest(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
  }

  fn beacon(n: u32) -> Request {
    Request::new("POST", url(&format!("/collect/analytics?n={}", n))).with_body(vec![n as u8])
  }

  #[tokio::test]
  async fn test_install_populates_generation() {
    let h = harness("app-v1");
    assert_eq!(h.lifecycle.state(), LifecycleState::Idle);

    let report = h.lifecycle.install(&manifest(&["/", "/app.js"])).await;

    assert!(report.is_complete());
    assert_eq!(report.cached.len(), 2);
    assert_eq!(h.storage.entry_count("app-v1").unwrap(), 2);
    assert_eq!(h.lifecycle.state(), LifecycleState::Installed);
  }

  #[tokio::test]
  async fn test_install_tolerates_failed_assets() {
    let h = harness("app-v1");
    h.network.fail("/missing.js");
    h.network.respond("/gone.css", Response::new(404, vec![], ""));

    let report = h
      .lifecycle
      .install(&manifest(&["/", "/missing.js", "/gone.css"]))
      .await;

    assert_eq!(h.lifecycle.state(), LifecycleState::Installed);
    assert_eq!(report.cached, vec![url("/").to_string()]);
    assert_eq!(report.failed.len(), 2);
    assert!(matches!(
      report.as_error(),
      Some(AgentError::InstallManifestPartial { failed: 2, total: 3 })
    ));
  }

  #[tokio::test]
  async fn test_install_offline_still_completes() {
    let h = harness("app-v1");
    h.network.set_online(false);

    let report = h.lifecycle.install(&manifest(&["/", "/app.js"])).await;
    assert_eq!(report.failed.len(), 2);
    assert_eq!(h.lifecycle.state(), LifecycleState::Installed);
    // The generation exists even though it is empty
    assert!(h
      .storage
      .generations()
      .unwrap()
      .iter()
      .any(|g| g.name == "app-v1"));
  }

  #[tokio::test]
  async fn test_activate_evicts_other_generations() {
    let h = harness("app-v2");
    let old = CacheEntry::capture(
      RequestKey::from_request(&Request::get(url("/old.js")), &[]),
      &Response::new(200, vec![], "old"),
    );
    h.storage.put("app-v1", &old).unwrap();
    h.storage.put("unrelated", &old).unwrap();
    h.lifecycle.install(&manifest(&["/app.js"])).await;

    let report = h.lifecycle.activate().await.unwrap();

    assert_eq!(report.current, "app-v2");
    assert!(report.claimed_clients);
    let mut evicted = report.evicted.clone();
    evicted.sort();
    assert_eq!(evicted, vec!["app-v1".to_string(), "unrelated".to_string()]);

    let gens = h.storage.generations().unwrap();
    assert_eq!(gens.len(), 1);
    assert_eq!(gens[0].name, "app-v2");
    assert!(gens[0].current);
    assert_eq!(h.lifecycle.state(), LifecycleState::Active);
  }

  #[tokio::test]
  async fn test_drain_replays_in_fifo_order() {
    let h = harness("app-v1");
    for n in 0..3 {
      h.queue.enqueue(&beacon(n)).unwrap();
    }

    let outcome = h.lifecycle.drain("analytics-sync").await;

    assert_eq!(outcome, DrainOutcome::Completed { replayed: 3 });
    assert!(h.queue.is_empty().unwrap());
    let bodies: Vec<_> = h.network.calls().into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, vec![vec![0u8], vec![1u8], vec![2u8]]);
  }

  #[tokio::test]
  async fn test_drain_halts_on_first_failure() {
    let h = harness("app-v1");
    for n in 0..3 {
      h.queue.enqueue(&beacon(n)).unwrap();
    }
    h.network.fail("/collect/analytics?n=1");

    let outcome = h.lifecycle.drain("analytics-sync").await;

    match outcome {
      DrainOutcome::Halted {
        replayed,
        remaining,
        ..
      } => {
        assert_eq!(replayed, 1);
        assert_eq!(remaining, Some(2));
      }
      other => panic!("expected halt, got {:?}", other),
    }
    // n=2 was never attempted
    assert_eq!(h.network.call_count(), 2);
    assert!(h.queue.front().unwrap().unwrap().url.ends_with("n=1"));
  }

  #[tokio::test]
  async fn test_drain_ignores_foreign_tags() {
    let h = harness("app-v1");
    h.queue.enqueue(&beacon(0)).unwrap();

    assert_eq!(h.lifecycle.drain("other-sync").await, DrainOutcome::Ignored);
    assert_eq!(h.queue.len().unwrap(), 1);
    assert_eq!(h.network.call_count(), 0);
  }

  #[tokio::test]
  async fn test_drain_is_mutually_exclusive() {
    let h = harness("app-v1");
    h.queue.enqueue(&beacon(0)).unwrap();
    h.network.hold();

    let lifecycle = Arc::clone(&h.lifecycle);
    let first = tokio::spawn(async move { lifecycle.drain("analytics-sync").await });

    // Wait until the first drain is parked inside its fetch
    while h.network.call_count() == 0 {
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(h.lifecycle.is_draining());
    assert_eq!(
      h.lifecycle.drain("analytics-sync").await,
      DrainOutcome::AlreadyRunning
    );

    h.network.release();
    assert_eq!(first.await.unwrap(), DrainOutcome::Completed { replayed: 1 });
    assert!(!h.lifecycle.is_draining());

    // Flag is cleared, so a new drain runs
    assert_eq!(
      h.lifecycle.drain("analytics-sync").await,
      DrainOutcome::Completed { replayed: 0 }
    );
  }

  #[tokio::test]
  async fn test_push_and_click() {
    let h = harness("app-v1");
    let n = h.lifecycle.push(Some("Quote ready"));
    assert_eq!(n.body, "Quote ready");
    assert_eq!(
      h.lifecycle.push(None).body,
      NotificationConfig::default().default_body
    );

    assert_eq!(
      h.lifecycle.notification_click(Some("dismiss")),
      ClickOutcome::Dismissed
    );
    assert_eq!(
      h.lifecycle.notification_click(None),
      ClickOutcome::OpenWindow(url("/"))
    );
  }

  #[tokio::test]
  async fn test_failed_activation_restores_state() {
    let lifecycle = LifecycleController::new(
      Arc::new(BrokenStorage),
      Arc::new(SqliteQueue::new(memory_db())),
      MockNetwork::new(),
      Arc::new(Stats::default()),
      "app-v2",
      Url::parse(ORIGIN).unwrap(),
    );
    lifecycle.install(&[]).await;

    let err = lifecycle.activate().await.unwrap_err();
    assert!(matches!(err, AgentError::StoreUnavailable(_)));
    assert_eq!(lifecycle.state(), LifecycleState::Installed);
  }

  #[tokio::test]
  async fn test_halt_reports_unknown_depth_when_queue_unreadable() {
    let lifecycle = LifecycleController::new(
      Arc::new(SqliteStorage::new(memory_db())),
      Arc::new(BrokenQueue),
      MockNetwork::new(),
      Arc::new(Stats::default()),
      "app-v1",
      Url::parse(ORIGIN).unwrap(),
    );

    match lifecycle.drain("analytics-sync").await {
      DrainOutcome::Halted {
        replayed,
        remaining,
        reason,
      } => {
        assert_eq!(replayed, 0);
        assert_eq!(remaining, None);
        assert!(reason.contains("queue offline"), "{}", reason);
      }
      other => panic!("expected halt, got {:?}", other),
    }
    assert!(!lifecycle.is_draining());
  }
}
