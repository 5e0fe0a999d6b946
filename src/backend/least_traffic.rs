//! Least-traffic backend selection.

use crate::backend::Backend;
use crate::state::PoolState;
use std::sync::Arc;
use tracing::{debug, warn};

/// Least-traffic selector.
///
/// Sends each request to the healthy backend that has served the fewest
/// response bytes so far. Ties go to the backend listed first in the pool.
#[derive(Debug, Clone)]
pub struct LeastTraffic {
    /// Backends in configured order.
    pool: Arc<[Backend]>,
    /// Shared health and traffic state.
    state: Arc<PoolState>,
}

impl LeastTraffic {
    /// Create a selector over a fixed pool.
    pub fn new(pool: Vec<Backend>, state: Arc<PoolState>) -> Self {
        Self {
            pool: pool.into(),
            state,
        }
    }

    /// The backends in pool order.
    pub fn pool(&self) -> &[Backend] {
        &self.pool
    }

    /// Select the next backend, or `None` when no backend is healthy.
    pub fn select(&self) -> Option<Backend> {
        let stats = self.state.read();

        let mut min_bytes = u64::MAX;
        let mut selected = None;

        for backend in self.pool.iter() {
            if !stats.is_healthy(backend) {
                continue;
            }
            let bytes = stats.traffic(backend);
            if selected.is_none() || bytes < min_bytes {
                min_bytes = bytes;
                selected = Some(backend);
            }
        }

        match selected {
            Some(backend) => {
                debug!(backend = %backend, traffic = min_bytes, "selected backend");
                Some(backend.clone())
            }
            None => {
                warn!(pool = self.pool.len(), "no healthy backends available");
                None
            }
        }
    }
}
