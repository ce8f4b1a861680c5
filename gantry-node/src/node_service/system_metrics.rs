//! System-level load metrics backed by sysinfo.
//!
//! CPU usage is measured between two consecutive refreshes, so the first
//! sample after startup reads zero; the aggregation engine's history
//! smoothing absorbs that.

use async_trait::async_trait;
use gantry_core::metric::{EngineTarget, LoadMetric, SampleError};
use std::sync::Arc;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;

/// Global CPU usage as a fraction of all cores, raw range [0, 1].
pub(crate) struct CpuLoadMetric {
    weight: u32,
    capacity: f64,
    system: Arc<Mutex<System>>,
}

impl CpuLoadMetric {
    pub(crate) fn new(weight: u32, capacity: f64) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()),
        );
        CpuLoadMetric {
            weight,
            capacity,
            system: Arc::new(Mutex::new(system)),
        }
    }
}

#[async_trait]
impl LoadMetric for CpuLoadMetric {
    fn weight(&self) -> u32 {
        self.weight
    }

    fn capacity(&self) -> f64 {
        self.capacity
    }

    async fn sample(&self, _target: &EngineTarget) -> Result<f64, SampleError> {
        let mut system = self.system.lock().await;
        system.refresh_cpu_usage();
        Ok(f64::from(system.global_cpu_usage()) / 100.0)
    }
}

/// Used physical memory as a fraction of total, raw range [0, 1].
pub(crate) struct MemoryLoadMetric {
    weight: u32,
    capacity: f64,
    system: Arc<Mutex<System>>,
}

impl MemoryLoadMetric {
    pub(crate) fn new(weight: u32, capacity: f64) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        MemoryLoadMetric {
            weight,
            capacity,
            system: Arc::new(Mutex::new(system)),
        }
    }
}

#[async_trait]
impl LoadMetric for MemoryLoadMetric {
    fn weight(&self) -> u32 {
        self.weight
    }

    fn capacity(&self) -> f64 {
        self.capacity
    }

    async fn sample(&self, _target: &EngineTarget) -> Result<f64, SampleError> {
        let mut system = self.system.lock().await;
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(SampleError::Sampling(
                "total memory reported as zero".into(),
            ));
        }
        Ok(system.used_memory() as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sample_is_a_fraction() {
        let metric = MemoryLoadMetric::new(1, 1.0);
        let target = EngineTarget::new("engine-1");
        let sample = metric.sample(&target).await.expect("memory sample");
        assert!((0.0..=1.0).contains(&sample));
    }

    #[tokio::test]
    async fn cpu_sample_stays_in_range() {
        let metric = CpuLoadMetric::new(1, 1.0);
        let target = EngineTarget::new("engine-1");
        let sample = metric.sample(&target).await.expect("cpu sample");
        assert!((0.0..=1.0).contains(&sample));
    }
}
