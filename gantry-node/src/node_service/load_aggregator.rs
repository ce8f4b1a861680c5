use crate::node_metrics::METRIC_SAMPLE_FAILURES_TOTAL;
use gantry_core::metric::{EngineTarget, LoadMetric, SampleError};
use metrics::counter;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Sentinel factor: the node must not receive traffic.
pub(crate) const NODE_UNAVAILABLE: i32 = -1;

pub(crate) const DEFAULT_DECAY_FACTOR: f64 = 2.0;
pub(crate) const DEFAULT_HISTORY: usize = 9;

/// Combines the configured metric set into the single load balance factor
/// exported to the proxies.
///
/// The factor is `100 - load%`, where load% is the weighted average of each
/// metric's time-decayed historical load: for history entries s0 (newest)
/// .. sn, `avg = sum(s_i * d^-i) / sum(d^-i)` with decay factor `d >= 1`
/// (`d = 1` degenerates to a plain arithmetic mean).
///
/// The metric set is fixed for the aggregator's lifetime; per-metric sample
/// history and the decay/history settings live behind one mutex, the single
/// serialization point shared by the periodic status caller and any
/// administrative reconfiguration. Two consecutive calls with identical raw
/// samples can yield different factors: every call pushes into the history.
pub(crate) struct LoadAggregator {
    metrics: Vec<Arc<dyn LoadMetric>>,
    inner: Mutex<AggregatorState>,
}

struct AggregatorState {
    decay_factor: f64,
    history: usize,
    /// Per-metric normalized samples, newest at the front. Indexed in step
    /// with `metrics`; empty until the metric's first successful sample.
    histories: Vec<VecDeque<f64>>,
}

impl LoadAggregator {
    pub(crate) fn new(metrics: Vec<Arc<dyn LoadMetric>>) -> Self {
        Self::with_settings(metrics, DEFAULT_DECAY_FACTOR, DEFAULT_HISTORY)
    }

    pub(crate) fn with_settings(
        metrics: Vec<Arc<dyn LoadMetric>>,
        decay_factor: f64,
        history: usize,
    ) -> Self {
        let histories = metrics.iter().map(|_| VecDeque::new()).collect();
        LoadAggregator {
            metrics,
            inner: Mutex::new(AggregatorState {
                decay_factor: decay_factor.max(1.0),
                history,
                histories,
            }),
        }
    }

    /// Base of the exponential weighting of historical samples. Floored at
    /// 1.0 (plain arithmetic mean).
    pub(crate) async fn set_decay_factor(&self, decay_factor: f64) {
        let mut state = self.inner.lock().await;
        state.decay_factor = decay_factor.max(1.0);
    }

    /// Number of past samples retained per metric. Queues shrink lazily on
    /// the next insert, so no history is touched here.
    pub(crate) async fn set_history(&self, history: usize) {
        let mut state = self.inner.lock().await;
        state.history = history;
    }

    /// Compute the load balance factor for `target`, in [-1, 100].
    ///
    /// Any weighted metric signalling the target is down short-circuits to
    /// -1. Any other sampling failure excludes that metric for this round
    /// only. An entirely zero-weighted metric set is fully available (100):
    /// the load is defined as zero, never computed by division.
    pub(crate) async fn load_balance_factor(&self, target: &EngineTarget) -> i32 {
        let mut state = self.inner.lock().await;
        let decay_factor = state.decay_factor;
        let history = state.history;

        let mut total_weight: u64 = 0;
        let mut total_weighted_load: f64 = 0.0;

        for (idx, metric) in self.metrics.iter().enumerate() {
            let weight = metric.weight();
            if weight == 0 {
                continue;
            }

            let raw = match metric.sample(target).await {
                Ok(raw) => raw,
                Err(e) if e.is_target_down() => {
                    debug!(target = %target.name, error = %e, "target down, node unavailable");
                    return NODE_UNAVAILABLE;
                }
                Err(e) => {
                    warn!(
                        target = %target.name,
                        metric = idx,
                        error = %e,
                        "metric sampling failed, excluded from this round"
                    );
                    counter!(METRIC_SAMPLE_FAILURES_TOTAL.name).increment(1);
                    continue;
                }
            };

            let sample = raw / metric.capacity();

            // Prune to the current bound first (the bound may have shrunk
            // since the last insert), then prepend: len <= history + 1.
            let queue = &mut state.histories[idx];
            queue.truncate(history);
            queue.push_front(sample);

            total_weight += u64::from(weight);
            total_weighted_load += decayed_average(queue, decay_factor) * f64::from(weight);
        }

        let load_pct = if total_weight == 0 {
            0
        } else {
            let pct = (100.0 * total_weighted_load / total_weight as f64).round();
            pct.clamp(0.0, 100.0) as i32
        };

        100 - load_pct
    }
}

/// Decayed historical average over samples newest-first.
fn decayed_average(samples: &VecDeque<f64>, decay_factor: f64) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, sample) in samples.iter().enumerate() {
        let decay = decay_factor.powi(-(i as i32));
        numerator += sample * decay;
        denominator += decay;
    }
    numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Replays a scripted sequence of raw samples.
    struct ScriptedMetric {
        weight: u32,
        capacity: f64,
        samples: StdMutex<VecDeque<f64>>,
    }

    impl ScriptedMetric {
        fn new(weight: u32, capacity: f64, samples: &[f64]) -> Arc<Self> {
            Arc::new(ScriptedMetric {
                weight,
                capacity,
                samples: StdMutex::new(samples.iter().copied().collect()),
            })
        }
    }

    #[async_trait]
    impl LoadMetric for ScriptedMetric {
        fn weight(&self) -> u32 {
            self.weight
        }

        fn capacity(&self) -> f64 {
            self.capacity
        }

        async fn sample(&self, _target: &EngineTarget) -> Result<f64, SampleError> {
            let mut samples = self.samples.lock().unwrap();
            samples
                .pop_front()
                .ok_or_else(|| SampleError::Sampling("script exhausted".into()))
        }
    }

    struct DownMetric;

    #[async_trait]
    impl LoadMetric for DownMetric {
        async fn sample(&self, target: &EngineTarget) -> Result<f64, SampleError> {
            Err(SampleError::target_down(target))
        }
    }

    struct FailingMetric;

    #[async_trait]
    impl LoadMetric for FailingMetric {
        async fn sample(&self, _target: &EngineTarget) -> Result<f64, SampleError> {
            Err(SampleError::Sampling("probe refused".into()))
        }
    }

    fn target() -> EngineTarget {
        EngineTarget::new("engine-1")
    }

    #[tokio::test]
    async fn decayed_average_over_successive_samples() {
        // Default weight/capacity, decay 1.5, raws 0.3 / 0.4 / 0.5.
        // Third call: avg = (0.5 + 0.4/1.5 + 0.3/2.25) / (1 + 1/1.5 + 1/2.25)
        //               = 0.9 / 2.1111 = 0.42632 -> 43% load -> factor 57.
        let metrics: Vec<Arc<dyn LoadMetric>> = vec![ScriptedMetric::new(1, 1.0, &[0.3, 0.4, 0.5])];
        let aggregator = LoadAggregator::with_settings(metrics, 1.5, DEFAULT_HISTORY);

        aggregator.load_balance_factor(&target()).await;
        aggregator.load_balance_factor(&target()).await;
        assert_eq!(aggregator.load_balance_factor(&target()).await, 57);
    }

    #[tokio::test]
    async fn weighted_metrics_with_bounded_history() {
        // Metric A: weight 1, capacity 1.0; metric B: weight 2, capacity
        // 1000.0; history depth 1, decay 2.
        // Call 1: avgA=0.2, avgB=0.4 -> (0.2 + 0.8)/3 = 33% -> 67
        // Call 2: avgA=(0.4+0.1)/1.5, avgB=(0.6+0.2)/1.5 -> 47% -> 53
        // Call 3: histories pruned to one entry before the insert
        //         avgA=(0.3+0.2)/1.5, avgB=(0.3+0.3)/1.5 -> 38% -> 62
        let metrics: Vec<Arc<dyn LoadMetric>> = vec![
            ScriptedMetric::new(1, 1.0, &[0.2, 0.4, 0.3]),
            ScriptedMetric::new(2, 1000.0, &[400.0, 600.0, 300.0]),
        ];
        let aggregator = LoadAggregator::with_settings(metrics, 2.0, 1);

        assert_eq!(aggregator.load_balance_factor(&target()).await, 67);
        assert_eq!(aggregator.load_balance_factor(&target()).await, 53);
        assert_eq!(aggregator.load_balance_factor(&target()).await, 62);
    }

    #[tokio::test]
    async fn decay_factor_one_is_a_plain_mean() {
        let metrics: Vec<Arc<dyn LoadMetric>> = vec![ScriptedMetric::new(1, 1.0, &[0.2, 0.6])];
        let aggregator = LoadAggregator::with_settings(metrics, 1.0, DEFAULT_HISTORY);

        aggregator.load_balance_factor(&target()).await;
        // (0.6 + 0.2) / 2 = 40% load -> 60.
        assert_eq!(aggregator.load_balance_factor(&target()).await, 60);
    }

    #[tokio::test]
    async fn decay_factor_can_be_reconfigured_between_calls() {
        let metrics: Vec<Arc<dyn LoadMetric>> = vec![ScriptedMetric::new(1, 1.0, &[0.2, 0.6])];
        let aggregator = LoadAggregator::with_settings(metrics, 2.0, DEFAULT_HISTORY);

        aggregator.load_balance_factor(&target()).await;

        // Sub-1.0 values are floored to the arithmetic mean:
        // (0.6 + 0.2) / 2 = 40% load -> 60.
        aggregator.set_decay_factor(0.5).await;
        assert_eq!(aggregator.load_balance_factor(&target()).await, 60);
    }

    #[tokio::test]
    async fn target_down_short_circuits_to_unavailable() {
        let metrics: Vec<Arc<dyn LoadMetric>> = vec![
            ScriptedMetric::new(1, 1.0, &[0.1, 0.1, 0.1]),
            Arc::new(DownMetric),
            Arc::new(FailingMetric),
        ];
        let aggregator = LoadAggregator::new(metrics);

        assert_eq!(
            aggregator.load_balance_factor(&target()).await,
            NODE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn failing_metric_is_excluded_not_fatal() {
        // The failing metric contributes neither weight nor load; the
        // healthy one alone decides the factor.
        let metrics: Vec<Arc<dyn LoadMetric>> = vec![
            Arc::new(FailingMetric),
            ScriptedMetric::new(1, 1.0, &[0.5]),
        ];
        let aggregator = LoadAggregator::new(metrics);

        assert_eq!(aggregator.load_balance_factor(&target()).await, 50);
    }

    #[tokio::test]
    async fn zero_weighted_set_is_fully_available() {
        let ignored = ScriptedMetric::new(0, 1.0, &[0.9]);
        let aggregator = LoadAggregator::new(vec![ignored.clone() as Arc<dyn LoadMetric>]);

        assert_eq!(aggregator.load_balance_factor(&target()).await, 100);
        // The zero-weighted metric was never sampled.
        assert_eq!(ignored.samples.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_metric_set_is_fully_available() {
        let aggregator = LoadAggregator::new(vec![]);
        assert_eq!(aggregator.load_balance_factor(&target()).await, 100);
    }

    #[tokio::test]
    async fn overload_is_clamped_to_zero_factor() {
        // Samples above capacity are not clamped at sampling time, but the
        // final percentage is.
        let metrics: Vec<Arc<dyn LoadMetric>> = vec![ScriptedMetric::new(1, 1.0, &[2.5])];
        let aggregator = LoadAggregator::new(metrics);

        assert_eq!(aggregator.load_balance_factor(&target()).await, 0);
    }

    #[tokio::test]
    async fn shrinking_history_prunes_before_insert() {
        let metrics: Vec<Arc<dyn LoadMetric>> = vec![ScriptedMetric::new(1, 1.0, &[0.2, 0.4, 0.8])];
        let aggregator = LoadAggregator::with_settings(metrics, 1.0, DEFAULT_HISTORY);

        aggregator.load_balance_factor(&target()).await;
        aggregator.load_balance_factor(&target()).await;

        // Depth 0: the queue is emptied before the insert, so only the
        // newest sample survives: 80% load -> 20.
        aggregator.set_history(0).await;
        assert_eq!(aggregator.load_balance_factor(&target()).await, 20);
    }
}
