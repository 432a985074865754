//! Connection Registry
//!
//! Counts live sessions against the configured capacity. A slot is handed out
//! as a [`SessionPermit`]; releasing the permit gives the slot back exactly
//! once no matter how many times release is requested.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct RegistryInner {
    live: AtomicUsize,
    max_connections: usize,
}

/// Shared live-session counter
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                live: AtomicUsize::new(0),
                max_connections,
            }),
        }
    }

    /// Number of sessions currently holding a slot
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Reserve a slot if the registry is below capacity.
    ///
    /// The check and the increment happen in one atomic step.
    pub fn try_acquire(&self) -> Option<SessionPermit> {
        let max = self.inner.max_connections;
        self.inner
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < max).then_some(live + 1)
            })
            .ok()
            .map(|_| SessionPermit {
                registry: self.clone(),
                released: false,
            })
    }

    /// Give a slot back, never going below zero. Returns the new count.
    fn release_slot(&self) -> usize {
        let previous = self
            .inner
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                Some(live.saturating_sub(1))
            })
            .unwrap_or_default();
        previous.saturating_sub(1)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("live", &self.live())
            .field("max_connections", &self.inner.max_connections)
            .finish()
    }
}

/// A reserved live-session slot
#[derive(Debug)]
pub struct SessionPermit {
    registry: ConnectionRegistry,
    released: bool,
}

impl SessionPermit {
    /// Return the slot to the registry.
    ///
    /// Only the first call has an effect; it returns the remaining live count.
    /// Later calls return `None`.
    pub fn release(&mut self) -> Option<usize> {
        if self.released {
            return None;
        }
        self.released = true;
        Some(self.registry.release_slot())
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.release();
    }
}
