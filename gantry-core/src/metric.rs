//! Load metric sampling abstractions.
//!
//! A metric samples one dimension of node health (CPU, memory, busy
//! connections, request rate, ...). The aggregation engine combines the
//! configured metric set into the single load balance factor exported to
//! the proxies. Implementations are selected by configuration, not by
//! inheritance chains.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The sampling target: the application server engine whose health is
/// being measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTarget {
    /// Engine / node name (the route identity proxies know this node by).
    pub name: String,
    /// Optional advertised address of the engine.
    pub address: Option<String>,
}

impl EngineTarget {
    pub fn new(name: impl Into<String>) -> Self {
        EngineTarget {
            name: name.into(),
            address: None,
        }
    }

    pub fn with_address(name: impl Into<String>, address: impl Into<String>) -> Self {
        EngineTarget {
            name: name.into(),
            address: Some(address.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SampleError {
    /// The distinguished condition: the target engine cannot be reached at
    /// all. One metric reporting this makes the whole node unavailable.
    #[error("target '{target}' is not available for sampling")]
    TargetDown { target: String },

    #[error("i/o error while sampling: {0}")]
    Io(#[from] std::io::Error),

    /// Any other per-metric failure. The metric is skipped for the current
    /// round; other metrics still contribute.
    #[error("metric sampling failed: {0}")]
    Sampling(String),
}

impl SampleError {
    pub fn target_down(target: &EngineTarget) -> Self {
        SampleError::TargetDown {
            target: target.name.clone(),
        }
    }

    pub fn is_target_down(&self) -> bool {
        matches!(self, SampleError::TargetDown { .. })
    }
}

/// One sampled dimension of node health.
///
/// `weight` is the metric's significance in the weighted average (0 means
/// ignored); `capacity` is the raw value at which the metric is considered
/// saturated (normalized sample = raw / capacity, expected in [0, 1) but
/// not clamped at sampling time).
#[async_trait]
pub trait LoadMetric: Send + Sync {
    fn weight(&self) -> u32 {
        1
    }

    fn capacity(&self) -> f64 {
        1.0
    }

    async fn sample(&self, target: &EngineTarget) -> Result<f64, SampleError>;
}
