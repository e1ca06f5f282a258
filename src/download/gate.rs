//! Counting gate bounding the number of in-flight downloads.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::Cancelled;

const RESOURCE: &str = "download slot";

/// Semaphore-backed gate admitting at most `capacity` downloads at once.
///
/// Slots are held as [`GatePermit`]s. Dropping a permit returns its slot,
/// so the slot comes back on every exit path of the task owning it,
/// including unwinding after a panic.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// RAII handle for one gate slot.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Creates a gate with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Returns the configured number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of currently free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires before a slot frees up.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled { resource: RESOURCE });
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Cancelled { resource: RESOURCE }),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit
                .map(|permit| GatePermit { _permit: permit })
                // The semaphore is never closed; treat closure like shutdown.
                .map_err(|_| Cancelled { resource: RESOURCE }),
        }
    }
}
