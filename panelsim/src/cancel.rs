//! Cooperative cancellation shared between a caller and a running job.
//!
//! A token is active until either side settles it: the caller cancels, or
//! the job commits before a persistent write. Whichever comes first wins,
//! so a job that has committed can no longer be cancelled and a cancelled
//! job never commits.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const COMMITTED: u8 = 2;

/// Cloneable flag checked by ingestion between pages and by the solver
/// between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `false` when the job has already
    /// committed and will run to completion.
    pub fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(state) => state == CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Claim the point of no return before a write. Returns `false` when
    /// the token was cancelled first.
    pub fn commit(&self) -> bool {
        match self
            .state
            .compare_exchange(ACTIVE, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(state) => state == COMMITTED,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMMITTED
    }
}
