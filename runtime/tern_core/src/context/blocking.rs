//! Blocking operations and cooperative cancellation.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::errors::Outcome;
use crate::gc::Tracer;
use crate::vm::Vm;

/// Work that must block on something outside the runtime.
///
/// A native function hands one to [`ExecutionContext::idle`]. The scheduler
/// runs [`BlockingOp::block`] on a worker thread while other tasks proceed,
/// then, back on the scheduler and after `unidle`, calls
/// [`BlockingOp::complete`] to push the result.
///
/// [`ExecutionContext::idle`]: super::ExecutionContext::idle
pub trait BlockingOp: Send {
    fn name(&self) -> &str;

    /// Perform the wait. Must return promptly once `cancel` fires.
    fn block(&mut self, cancel: &CancelToken) -> Outcome;

    /// Finish on the scheduler thread, honoring the stack convention of the
    /// call that idled.
    fn complete(self: Box<Self>, vm: &mut Vm<'_>) -> Outcome;

    /// Values the operation will push on completion.
    fn trace(&self, _tracer: &mut Tracer) {}
}

#[derive(Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Shared cancellation flag with a wakeable wait.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag cancellation and wake every waiter.
    pub fn cancel(&self) {
        *self.state.cancelled.lock() = true;
        self.state.wake.notify_all();
    }

    pub fn reset(&self) {
        *self.state.cancelled.lock() = false;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock()
    }

    /// Wait up to `timeout`. Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.state.cancelled.lock();
        while !*cancelled {
            if self
                .state
                .wake
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
