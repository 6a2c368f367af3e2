//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, GenerationInfo, RequestKey};
use crate::db::Database;
use crate::error::AgentError;
use crate::http::{Request, Response};
use crate::network::Network;
use crate::queue::{QueueItem, RetryQueue};

pub const ORIGIN: &str = "https://example.com/";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn memory_db() -> Arc<Database> {
  Arc::new(Database::open_in_memory().unwrap())
}

/// Scriptable network: toggled online/offline, canned responses per URL,
/// per-URL failures, a call log, and a gate that holds fetches open.
pub struct MockNetwork {
  online: AtomicBool,
  responses: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  calls: Mutex<Vec<Request>>,
  gated: AtomicBool,
  gate: Notify,
}

impl MockNetwork {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      online: AtomicBool::new(true),
      responses: Mutex::new(HashMap::new()),
      failing: Mutex::new(HashSet::new()),
      calls: Mutex::new(Vec::new()),
      gated: AtomicBool::new(false),
      gate: Notify::new(),
    })
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn respond(&self, path: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url(path).to_string(), response);
  }

  pub fn fail(&self, path: &str) {
    self.failing.lock().unwrap().insert(url(path).to_string());
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  /// Hold every subsequent fetch until `release`.
  pub fn hold(&self) {
    self.gated.store(true, Ordering::SeqCst);
  }

  pub fn release(&self) {
    self.gated.store(false, Ordering::SeqCst);
    self.gate.notify_one();
  }

  /// Default body served for unscripted URLs.
  pub fn default_body(request: &Request) -> Vec<u8> {
    format!("{} {}", request.method, request.url).into_bytes()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, AgentError> {
    self.calls.lock().unwrap().push(request.clone());

    if self.gated.load(Ordering::SeqCst) {
      self.gate.notified().await;
    }

    let key = request.url.to_string();
    if !self.online.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&key) {
      return Err(AgentError::NetworkUnavailable("offline".to_string()));
    }

    let canned = self.responses.lock().unwrap().get(&key).cloned();
    Ok(canned.unwrap_or_else(|| {
      Response::new(
        200,
        vec![("content-type".to_string(), "text/plain".to_string())],
        Self::default_body(request),
      )
    }))
  }
}

/// Store whose every operation fails, as with a locked or missing database.
pub struct BrokenStorage;

impl CacheStorage for BrokenStorage {
  fn open_generation(&self, _name: &str) -> Result<()> {
    Err(eyre!("store offline"))
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    Err(eyre!("store offline"))
  }

  fn current_generation(&self) -> Result<Option<String>> {
    Err(eyre!("store offline"))
  }

  fn set_current(&self, _name: &str) -> Result<()> {
    Err(eyre!("store offline"))
  }

  fn promote(&self, _name: &str) -> Result<Vec<(String, usize)>> {
    Err(eyre!("store offline"))
  }

  fn delete_generation(&self, _name: &str) -> Result<usize> {
    Err(eyre!("store offline"))
  }

  fn get(&self, _generation: &str, _key: &RequestKey) -> Result<Option<CacheEntry>> {
    Err(eyre!("store offline"))
  }

  fn put(&self, _generation: &str, _entry: &CacheEntry) -> Result<()> {
    Err(eyre!("store offline"))
  }

  fn entry_count(&self, _generation: &str) -> Result<usize> {
    Err(eyre!("store offline"))
  }
}

/// Queue that can neither persist nor read items.
pub struct BrokenQueue;

impl RetryQueue for BrokenQueue {
  fn enqueue(&self, _request: &Request) -> Result<QueueItem> {
    Err(eyre!("queue offline"))
  }

  fn front(&self) -> Result<Option<QueueItem>> {
    Err(eyre!("queue offline"))
  }

  fn list(&self) -> Result<Vec<QueueItem>> {
    Err(eyre!("queue offline"))
  }

  fn remove(&self, _id: i64) -> Result<bool> {
    Err(eyre!("queue offline"))
  }

  fn len(&self) -> Result<usize> {
    Err(eyre!("queue offline"))
  }
}
