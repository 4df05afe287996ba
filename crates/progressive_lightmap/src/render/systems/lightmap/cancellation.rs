//! Cooperative cancellation of an accumulation cycle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag of one accumulation cycle
///
/// Clones share the flag, so the token can be handed to another thread (a UI
/// or a deadline watcher). The accumulator only observes it between steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Request cancellation; takes effect at the next step boundary
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether both tokens refer to the same cycle
    pub fn same_cycle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
