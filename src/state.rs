//! Shared pool state.
//!
//! Health and traffic for every backend live in one record behind a single
//! read/write lock. Reads take the shared lock, writes the exclusive one,
//! and neither is ever held across an `.await`.

use crate::backend::Backend;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;

/// Health and traffic maps guarded together.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Last probe result per backend.
    healthy: HashMap<Backend, bool>,
    /// Cumulative response bytes copied per backend.
    traffic: HashMap<Backend, u64>,
}

impl PoolStats {
    /// Whether the backend passed its last probe.
    ///
    /// A backend that has never been probed is unhealthy.
    pub fn is_healthy(&self, backend: &Backend) -> bool {
        self.healthy.get(backend).copied().unwrap_or(false)
    }

    /// Bytes forwarded from the backend so far.
    pub fn traffic(&self, backend: &Backend) -> u64 {
        self.traffic.get(backend).copied().unwrap_or(0)
    }
}

/// Shared health and traffic state for one balancer.
#[derive(Debug, Default)]
pub struct PoolState {
    inner: RwLock<PoolStats>,
}

impl PoolState {
    /// Create empty state. Every backend starts unhealthy with zero traffic.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the shared lock for a multi-field read.
    pub fn read(&self) -> RwLockReadGuard<'_, PoolStats> {
        self.inner.read()
    }

    /// Record a probe result. Returns the previous value, if any.
    pub fn set_healthy(&self, backend: &Backend, healthy: bool) -> Option<bool> {
        self.inner.write().healthy.insert(backend.clone(), healthy)
    }

    /// Whether the backend passed its last probe.
    pub fn is_healthy(&self, backend: &Backend) -> bool {
        self.inner.read().is_healthy(backend)
    }

    /// Add copied bytes to the backend's counter. Returns the new total.
    pub fn record_traffic(&self, backend: &Backend, bytes: u64) -> u64 {
        let mut stats = self.inner.write();
        let total = stats.traffic.entry(backend.clone()).or_insert(0);
        *total = total.saturating_add(bytes);
        *total
    }

    /// Bytes forwarded from the backend so far.
    pub fn traffic(&self, backend: &Backend) -> u64 {
        self.inner.read().traffic(backend)
    }

    /// Health and traffic for each backend of the pool, in pool order.
    pub fn snapshot(&self, pool: &[Backend]) -> Vec<(Backend, bool, u64)> {
        let stats = self.inner.read();
        pool.iter()
            .map(|b| (b.clone(), stats.is_healthy(b), stats.traffic(b)))
            .collect()
    }
}
