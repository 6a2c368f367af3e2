use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Request to drain the retry queue under a sync tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
  pub tag: String,
}

/// Sending half: strategies use it to ask for a replay after queueing a request
#[derive(Debug, Clone)]
pub struct SyncScheduler {
  tx: mpsc::Sender<SyncRequest>,
}

/// Receiving half, consumed by the agent's sync listener
#[derive(Debug)]
pub struct SyncEvents {
  rx: mpsc::Receiver<SyncRequest>,
}

/// Create a connected scheduler/receiver pair.
///
/// At most one request is pending at a time. A drain replays the whole queue,
/// so further requests raised before it runs are folded into the pending one.
pub fn sync_channel() -> (SyncScheduler, SyncEvents) {
  let (tx, rx) = mpsc::channel(1);
  (SyncScheduler { tx }, SyncEvents { rx })
}

impl SyncScheduler {
  /// Ask for a drain under `tag`. Requests are dropped when no listener is
  /// running; the queue itself is durable, so a later sync still delivers.
  pub fn register(&self, tag: &str) {
    match self.tx.try_send(SyncRequest {
      tag: tag.to_string(),
    }) {
      Ok(()) => {}
      Err(TrySendError::Full(_)) => {
        debug!(tag, "sync already pending");
      }
      Err(TrySendError::Closed(_)) => {
        debug!(tag, "no sync listener, replay deferred to next sync signal");
      }
    }
  }
}

impl SyncEvents {
  /// Receive the next sync request
  pub async fn next(&mut self) -> Option<SyncRequest> {
    self.rx.recv().await
  }

  /// Receive a pending sync request without waiting
  pub fn try_next(&mut self) -> Option<SyncRequest> {
    self.rx.try_recv().ok()
  }
}
