//! The interception agent: classifier, strategies and lifecycle behind one handle.

use color_eyre::Result;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, GenerationInfo};
use crate::classify::{ClassifierRules, TrafficClass};
use crate::config::Config;
use crate::error::AgentError;
use crate::event::{sync_channel, SyncEvents};
use crate::http::{Request, Response};
use crate::lifecycle::{
  ActivationReport, DrainOutcome, InstallReport, LifecycleController, LifecycleState,
};
use crate::network::Network;
use crate::notify::{ClickOutcome, Notification};
use crate::queue::{QueueItem, RetryQueue};
use crate::stats::{Stats, StatsSnapshot};
use crate::strategy::StrategyExecutor;

/// Result of handing a request to the intercept point.
#[derive(Debug)]
pub enum Interception {
  /// The agent produced the response
  Handled(Response),
  /// Not a GET; the caller sends it unmodified
  Bypass(Request),
}

pub struct Agent<S: CacheStorage, Q: RetryQueue, N: Network> {
  classifier: ClassifierRules,
  executor: StrategyExecutor<S, Q, N>,
  lifecycle: LifecycleController<S, Q, N>,
  storage: Arc<S>,
  queue: Arc<Q>,
  network: Arc<N>,
  stats: Arc<Stats>,
  manifest: Vec<String>,
  sync_tag: String,
  sync_events: Mutex<Option<SyncEvents>>,
}

impl<S, Q, N> Agent<S, Q, N>
where
  S: CacheStorage + 'static,
  Q: RetryQueue + 'static,
  N: Network + 'static,
{
  /// Wire an agent from configuration and injected store, queue and network handles.
  pub fn new(config: &Config, storage: Arc<S>, queue: Arc<Q>, network: Arc<N>) -> Result<Self> {
    let origin = config.origin_url()?;
    let generation = config.generation_name();
    let stats = Arc::new(Stats::default());
    let (scheduler, events) = sync_channel();

    let executor = StrategyExecutor::new(
      Arc::clone(&storage),
      Arc::clone(&queue),
      Arc::clone(&network),
      Arc::clone(&stats),
      scheduler,
      generation.clone(),
    )
    .with_vary_headers(config.cache.vary_headers.clone())
    .with_sync_tag(config.sync.tag.clone());

    let lifecycle = LifecycleController::new(
      Arc::clone(&storage),
      Arc::clone(&queue),
      Arc::clone(&network),
      Arc::clone(&stats),
      generation,
      origin,
    )
    .with_vary_headers(config.cache.vary_headers.clone())
    .with_sync_tag(config.sync.tag.clone())
    .with_notification(config.notification.clone());

    Ok(Self {
      classifier: config.classifier.clone(),
      executor,
      lifecycle,
      storage,
      queue,
      network,
      stats,
      manifest: config.manifest.clone(),
      sync_tag: config.sync.tag.clone(),
      sync_events: Mutex::new(Some(events)),
    })
  }

  /// Generation this agent installs and serves from.
  pub fn generation(&self) -> &str {
    self.executor.generation()
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  pub fn classify(&self, request: &Request) -> TrafficClass {
    self.classifier.classify(request)
  }

  /// Intercept point. GET requests are classified and answered by their
  /// strategy; everything else is handed back untouched.
  pub async fn intercept(&self, request: Request) -> Interception {
    if !request.is_get() {
      debug!(method = %request.method, url = %request.url, "bypassing non-GET request");
      return Interception::Bypass(request);
    }

    let class = self.classify(&request);
    debug!(url = %request.url, %class, "intercepted");
    Interception::Handled(self.executor.execute(class, &request).await)
  }

  /// Intercept, and send bypassed requests straight to the network.
  pub async fn fetch(&self, request: Request) -> Result<Response, AgentError> {
    match self.intercept(request).await {
      Interception::Handled(response) => Ok(response),
      Interception::Bypass(request) => self.network.fetch(&request).await,
    }
  }

  /// Install signal with the configured manifest.
  pub async fn install(&self) -> InstallReport {
    self.lifecycle.install(&self.manifest).await
  }

  /// Activate signal.
  pub async fn activate(&self) -> Result<ActivationReport, AgentError> {
    self.lifecycle.activate().await
  }

  /// Install and take over immediately, without waiting for a separate activate signal.
  pub async fn install_and_activate(
    &self,
  ) -> Result<(InstallReport, ActivationReport), AgentError> {
    let installed = self.install().await;
    let activated = self.activate().await?;
    Ok((installed, activated))
  }

  /// Replay signal.
  pub async fn sync(&self, tag: &str) -> DrainOutcome {
    self.lifecycle.drain(tag).await
  }

  /// Replay signal under the configured tag.
  pub async fn sync_now(&self) -> DrainOutcome {
    self.lifecycle.drain(&self.sync_tag).await
  }

  /// Push signal.
  pub fn push(&self, payload: Option<&str>) -> Notification {
    self.lifecycle.push(payload)
  }

  pub fn notification_click(&self, action: Option<&str>) -> ClickOutcome {
    self.lifecycle.notification_click(action)
  }

  /// Statistics query. Queue depth reads as 0 if the queue is unavailable.
  pub fn stats(&self) -> StatsSnapshot {
    let pending = self.queue.len().unwrap_or_else(|e| {
      warn!(error = %AgentError::queue(e), "failed to read queue depth");
      0
    });
    self.stats.snapshot(pending)
  }

  pub fn generations(&self) -> Result<Vec<GenerationInfo>> {
    self.storage.generations()
  }

  pub fn pending(&self) -> Result<Vec<QueueItem>> {
    self.queue.list()
  }

  /// Run a drain for every replay request raised by the deferred strategy.
  ///
  /// Returns `None` if the listener was already started.
  pub fn spawn_sync_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
    let mut events = match self.sync_events.lock() {
      Ok(mut slot) => slot.take()?,
      Err(poisoned) => poisoned.into_inner().take()?,
    };
    let agent = Arc::clone(self);

    Some(tokio::spawn(async move {
      while let Some(request) = events.next().await {
        let outcome = agent.sync(&request.tag).await;
        info!(tag = %request.tag, ?outcome, "sync request handled");
      }
    }))
  }
}
