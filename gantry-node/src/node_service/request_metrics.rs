//! Request-level load metrics fed by the serving layer.
//!
//! The serving layer records connection and request activity into an
//! in-memory snapshot; the metrics read it without scraping any endpoint.
//! Both are updated independently of the Prometheus registry.

use async_trait::async_trait;
use gantry_core::metric::{EngineTarget, LoadMetric, SampleError};
use std::sync::Weak;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, Default)]
struct StatsSnapshot {
    busy_connections: usize,
    requests_total: u64,
}

/// In-memory request statistics for this node's engine.
#[derive(Debug, Default)]
pub(crate) struct RequestStats {
    inner: RwLock<StatsSnapshot>,
}

impl RequestStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fed by the serving layer's connection hooks.
    #[allow(dead_code)]
    pub(crate) async fn connection_opened(&self) {
        let mut snapshot = self.inner.write().await;
        snapshot.busy_connections += 1;
    }

    #[allow(dead_code)]
    pub(crate) async fn connection_closed(&self) {
        let mut snapshot = self.inner.write().await;
        snapshot.busy_connections = snapshot.busy_connections.saturating_sub(1);
    }

    #[allow(dead_code)]
    pub(crate) async fn record_request(&self) {
        let mut snapshot = self.inner.write().await;
        snapshot.requests_total += 1;
    }

    pub(crate) async fn busy_connections(&self) -> usize {
        self.inner.read().await.busy_connections
    }

    pub(crate) async fn requests_total(&self) -> u64 {
        self.inner.read().await.requests_total
    }
}

/// Currently busy connections; capacity is the configured connection
/// limit. Holds the stats weakly: a dropped engine is the distinguished
/// target-down condition, not a plain sampling error.
pub(crate) struct BusyConnectionsMetric {
    weight: u32,
    capacity: f64,
    stats: Weak<RequestStats>,
}

impl BusyConnectionsMetric {
    pub(crate) fn new(weight: u32, capacity: f64, stats: Weak<RequestStats>) -> Self {
        BusyConnectionsMetric {
            weight,
            capacity,
            stats,
        }
    }
}

#[async_trait]
impl LoadMetric for BusyConnectionsMetric {
    fn weight(&self) -> u32 {
        self.weight
    }

    fn capacity(&self) -> f64 {
        self.capacity
    }

    async fn sample(&self, target: &EngineTarget) -> Result<f64, SampleError> {
        let stats = self
            .stats
            .upgrade()
            .ok_or_else(|| SampleError::target_down(target))?;
        Ok(stats.busy_connections().await as f64)
    }
}

/// Requests served since the previous sample; capacity is the configured
/// requests-per-interval budget.
pub(crate) struct RequestRateMetric {
    weight: u32,
    capacity: f64,
    stats: Weak<RequestStats>,
    last_total: Mutex<u64>,
}

impl RequestRateMetric {
    pub(crate) fn new(weight: u32, capacity: f64, stats: Weak<RequestStats>) -> Self {
        RequestRateMetric {
            weight,
            capacity,
            stats,
            last_total: Mutex::new(0),
        }
    }
}

#[async_trait]
impl LoadMetric for RequestRateMetric {
    fn weight(&self) -> u32 {
        self.weight
    }

    fn capacity(&self) -> f64 {
        self.capacity
    }

    async fn sample(&self, target: &EngineTarget) -> Result<f64, SampleError> {
        let stats = self
            .stats
            .upgrade()
            .ok_or_else(|| SampleError::target_down(target))?;
        let total = stats.requests_total().await;
        let mut last = self.last_total.lock().await;
        let delta = total.saturating_sub(*last);
        *last = total;
        Ok(delta as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn target() -> EngineTarget {
        EngineTarget::new("engine-1")
    }

    #[tokio::test]
    async fn busy_connections_track_open_and_close() {
        let stats = Arc::new(RequestStats::new());
        let metric = BusyConnectionsMetric::new(2, 512.0, Arc::downgrade(&stats));

        stats.connection_opened().await;
        stats.connection_opened().await;
        assert_eq!(metric.sample(&target()).await.unwrap(), 2.0);

        stats.connection_closed().await;
        assert_eq!(metric.sample(&target()).await.unwrap(), 1.0);

        // Close on an idle engine never underflows.
        stats.connection_closed().await;
        stats.connection_closed().await;
        assert_eq!(metric.sample(&target()).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn request_rate_is_a_delta_between_samples() {
        let stats = Arc::new(RequestStats::new());
        let metric = RequestRateMetric::new(1, 1000.0, Arc::downgrade(&stats));

        for _ in 0..5 {
            stats.record_request().await;
        }
        assert_eq!(metric.sample(&target()).await.unwrap(), 5.0);

        stats.record_request().await;
        assert_eq!(metric.sample(&target()).await.unwrap(), 1.0);
        assert_eq!(metric.sample(&target()).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn dropped_engine_is_target_down() {
        let stats = Arc::new(RequestStats::new());
        let metric = BusyConnectionsMetric::new(1, 512.0, Arc::downgrade(&stats));
        drop(stats);

        let err = metric.sample(&target()).await.unwrap_err();
        assert!(err.is_target_down());
    }
}
