//! Concurrency gate
//!
//! Bounds how many browser sessions are open at once across every source
//! and ticker of a run. A slot is held through [`GatePermit`], which frees
//! it on drop, so every exit path of a task (success, failure, panic,
//! cancellation) releases its slot.

use crate::FetchError;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Counting semaphore with live and peak occupancy
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    pacer: Option<SharedRateLimiter>,
}

impl std::fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("capacity", &self.capacity)
            .field("active", &self.active())
            .field("peak", &self.peak())
            .field("paced", &self.pacer.is_some())
            .finish()
    }
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            pacer: None,
        }
    }

    /// Additionally limit how many sessions may be opened per minute
    pub fn with_sessions_per_minute(mut self, per_minute: u32) -> Self {
        self.pacer = NonZeroU32::new(per_minute)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))));
        self
    }

    /// Wait for a free slot.
    ///
    /// Waiting suspends the task; the underlying semaphore hands out slots
    /// in FIFO order.
    pub async fn acquire(&self) -> Result<GatePermit, FetchError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::SessionCreation("concurrency gate is closed".to_string()))?;

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        debug!(active = now_active, capacity = self.capacity, "Gate slot acquired");

        Ok(GatePermit {
            _permit: permit,
            active: Arc::clone(&self.active),
        })
    }

    /// Wait until the session-creation pace allows another session
    pub async fn pace(&self) {
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }
    }

    /// Stop handing out slots; pending and future `acquire` calls fail
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of slots held at the same time
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A held gate slot; dropping it frees the slot
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
