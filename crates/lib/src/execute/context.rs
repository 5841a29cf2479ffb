//! Cooperative cancellation for workflow runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::types::WorkflowError;

#[derive(Debug, Default)]
struct TokenState {
  cancelled: AtomicBool,
  reason: Mutex<Option<String>>,
}

/// A shareable cancellation flag.
///
/// Clones observe the same flag. Only the first cancellation reason is kept.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
  state: Arc<TokenState>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Request cancellation. Later calls keep the first reason.
  ///
  /// The reason is stored before the flag, so an observer that sees the
  /// token cancelled always finds a reason.
  pub fn cancel(&self, reason: impl Into<String>) {
    let mut slot = self.state.reason.lock();
    if slot.is_none() {
      *slot = Some(reason.into());
      self.state.cancelled.store(true, Ordering::SeqCst);
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.state.cancelled.load(Ordering::SeqCst)
  }

  pub fn reason(&self) -> Option<String> {
    self.state.reason.lock().clone()
  }
}

/// Ambient context handed to every operation and rollback.
///
/// The engine never preempts a running operation; long-running operations
/// call [`WorkflowContext::ensure_active`] at their own checkpoints.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
  token: CancellationToken,
}

impl WorkflowContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_token(token: CancellationToken) -> Self {
    Self { token }
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Fail with [`WorkflowError::Cancelled`] once cancellation was requested.
  pub fn ensure_active(&self) -> Result<(), WorkflowError> {
    if self.token.is_cancelled() {
      let reason = self.token.reason().unwrap_or_else(|| "cancelled".to_string());
      return Err(WorkflowError::Cancelled(reason));
    }
    Ok(())
  }
}
