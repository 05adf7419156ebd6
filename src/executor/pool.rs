//! Per-organization admission control for external calls.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps in-flight backend calls per organization; excess callers queue on
/// the organization's semaphore in FIFO order.
#[derive(Debug)]
pub struct ConcurrencyPool {
    limit: usize,
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl ConcurrencyPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            semaphores: DashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn semaphore(&self, organization_id: &str) -> Arc<Semaphore> {
        self.semaphores
            .entry(organization_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.limit)))
            .clone()
    }

    /// Wait for a slot. Returns `None` only if the pool was closed.
    pub async fn acquire(&self, organization_id: &str) -> Option<OwnedSemaphorePermit> {
        self.semaphore(organization_id).acquire_owned().await.ok()
    }

    pub fn in_flight(&self, organization_id: &str) -> usize {
        self.semaphores
            .get(organization_id)
            .map(|s| self.limit - s.available_permits())
            .unwrap_or(0)
    }
}
