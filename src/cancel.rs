//! Cooperative cancellation shared between the round controller, the worker
//! coordinator and every worker thread.
//!
//! The token is checked between units of work: before each worker is
//! submitted, before each loop iteration and between invocations. Operations
//! built with `Target::with_context` also receive the token and may poll it
//! themselves for finer-grained cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable cancellation flag. All clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
