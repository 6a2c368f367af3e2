//! Failure taxonomy for the interception agent.
//!
//! None of these reach a caller of an intercepted GET: each one is recovered
//! locally (cache fallback, queueing) or turned into a synthesized response.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
  /// The fetch never produced a response (no connectivity, DNS, transport).
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),

  /// The persistent store could not be read or written. Treated as a miss.
  #[error("store unavailable: {0}")]
  StoreUnavailable(String),

  /// Appending to or removing from the retry queue failed.
  #[error("queue persistence failed: {0}")]
  QueuePersist(String),

  /// Some manifest assets could not be cached during install.
  #[error("{failed} of {total} manifest assets failed to cache")]
  InstallManifestPartial { failed: usize, total: usize },
}

impl AgentError {
  pub fn store(err: impl std::fmt::Display) -> Self {
    Self::StoreUnavailable(err.to_string())
  }

  pub fn queue(err: impl std::fmt::Display) -> Self {
    Self::QueuePersist(err.to_string())
  }
}
