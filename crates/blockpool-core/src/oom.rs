//! Out-of-memory handler registry.
//!
//! When a pool cannot satisfy a request it escalates to the handler
//! registered in its [`OomRegistry`]. The handler runs without any allocator
//! lock held, exactly once per failing call; it may free capacity elsewhere
//! (the allocation is then retried once) or terminate the process. With no
//! handler registered the failure is fatal.
//!
//! Allocators use the process-wide [`OomRegistry::global`] unless another
//! registry is injected at construction.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::error::AllocError;
use crate::stats::AtomicPoolStats;

/// Callback invoked when a pool runs out of memory.
///
/// Implementations must not call back into the allocator that failed
/// expecting it to be locked; they should release capacity elsewhere or
/// terminate the process.
pub trait OomHandler: Send + Sync {
    /// Handle one out-of-memory condition.
    fn on_out_of_memory(&self);
}

impl<F> OomHandler for F
where
    F: Fn() + Send + Sync,
{
    fn on_out_of_memory(&self) {
        self()
    }
}

/// Holds at most one out-of-memory handler; the last registered wins.
pub struct OomRegistry {
    handler: RwLock<Option<Arc<dyn OomHandler>>>,
}

static GLOBAL: OomRegistry = OomRegistry::new();

impl OomRegistry {
    /// An empty registry.
    pub const fn new() -> Self {
        Self {
            handler: parking_lot::const_rwlock(None),
        }
    }

    /// The process-wide registry.
    pub const fn global() -> &'static OomRegistry {
        &GLOBAL
    }

    /// Install `handler`, returning the one it replaces.
    pub fn register<H>(&self, handler: H) -> Option<Arc<dyn OomHandler>>
    where
        H: OomHandler + 'static,
    {
        self.handler.write().replace(Arc::new(handler))
    }

    /// Remove the current handler, making exhaustion fatal again.
    pub fn unregister(&self) -> Option<Arc<dyn OomHandler>> {
        self.handler.write().take()
    }

    /// Whether a handler is installed.
    pub fn is_registered(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Run the handler for `failure` raised by `allocator`.
    ///
    /// Aborts the process when no handler is registered.
    pub(crate) fn escalate(&self, allocator: &str, failure: &AllocError) {
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => {
                warn!(allocator, %failure, "pool exhausted, invoking out-of-memory handler");
                handler.on_out_of_memory();
            }
            None => {
                error!(allocator, %failure, "pool exhausted with no out-of-memory handler");
                std::process::abort();
            }
        }
    }
}

impl Default for OomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace the process-wide out-of-memory handler.
pub fn register_out_of_memory_handler<H>(handler: H) -> Option<Arc<dyn OomHandler>>
where
    H: OomHandler + 'static,
{
    OomRegistry::global().register(handler)
}

/// Run `attempt`; on exhaustion escalate once and retry once.
///
/// Programmer errors pass straight through without escalation.
pub(crate) fn with_escalation<T>(
    registry: &OomRegistry,
    allocator: &str,
    stats: &AtomicPoolStats,
    mut attempt: impl FnMut() -> Result<T, AllocError>,
) -> Result<T, AllocError> {
    match attempt() {
        Err(failure) if failure.is_exhaustion() => {
            stats.record_oom();
            registry.escalate(allocator, &failure);
            attempt().inspect_err(|err| {
                if err.is_exhaustion() {
                    stats.record_failure();
                }
            })
        }
        other => other,
    }
}
