mod advert_listener;
pub(crate) mod load_aggregator;
mod master_election;
mod request_metrics;
mod system_metrics;

pub(crate) use advert_listener::AdvertListener;
pub(crate) use load_aggregator::LoadAggregator;
pub(crate) use master_election::{ClusterRpc, LoopbackRpc, MasterElection};
pub(crate) use request_metrics::RequestStats;

use crate::node_metrics::LOAD_BALANCE_FACTOR;
use crate::service_configuration::{LoadConfig, MetricKind, ServiceConfiguration};
use anyhow::Result;
use async_trait::async_trait;
use gantry_core::advert::ProxyAdvertisement;
use gantry_core::envelope::NodeId;
use gantry_core::handler::ManagementHandler;
use gantry_core::metric::{EngineTarget, LoadMetric};
use metrics::gauge;
use request_metrics::{BusyConnectionsMetric, RequestRateMetric};
use std::net::SocketAddr;
use std::sync::Arc;
use system_metrics::{CpuLoadMetric, MemoryLoadMetric};
use tokio::time;
use tracing::{debug, info};

// Node Service has the node-side control plane responsibilities of the
// cluster bridge:
//
// Proxy Discovery:
// Listen for proxy advertisements on the multicast group and hand each
// accepted proxy to the management-protocol handler, which decides whether
// to register or refresh it. No static proxy configuration is required.
//
// Load Aggregation:
// Periodically combine the configured metric set into the single load
// balance factor and hand it to the management-protocol handler, which
// pushes it to the proxies as routing weight.
//
// Master Election:
// One node per group coordinates cluster-wide decisions. Election rounds
// collect the peers' replies as response envelopes over the cluster RPC
// transport.
pub(crate) struct NodeService {
    config: ServiceConfiguration,
    handler: Arc<dyn ManagementHandler>,
    rpc: Arc<dyn ClusterRpc>,
    request_stats: Arc<RequestStats>,
    listener: Option<AdvertListener>,
}

impl NodeService {
    pub(crate) fn new(
        config: ServiceConfiguration,
        handler: Arc<dyn ManagementHandler>,
        rpc: Arc<dyn ClusterRpc>,
    ) -> Self {
        NodeService {
            config,
            handler,
            rpc,
            request_stats: Arc::new(RequestStats::new()),
            listener: None,
        }
    }

    /// Request statistics fed by the serving layer.
    #[allow(dead_code)]
    pub(crate) fn request_stats(&self) -> Arc<RequestStats> {
        Arc::clone(&self.request_stats)
    }

    pub(crate) async fn start(&mut self) -> Result<()> {
        info!(
            cluster = %self.config.cluster_name,
            node = %self.config.node_name,
            "initializing gantry node control plane"
        );

        let target = EngineTarget::with_address(
            self.config.node_name.clone(),
            self.config.host.clone(),
        );

        let metrics = build_metrics(&self.config.load, &self.request_stats);
        let aggregator = Arc::new(LoadAggregator::with_settings(
            metrics,
            self.config.load.decay_factor,
            self.config.load.history,
        ));

        // Proxy discovery listener
        if let Some(discovery) = &self.config.discovery {
            let listener = AdvertListener::bind(discovery, Arc::clone(&self.handler))?;
            listener.start();
            self.listener = Some(listener);
        } else {
            info!("proxy discovery is disabled");
        }

        // Master election loop
        let election = MasterElection::new(
            NodeId::new(&self.config.node_name),
            self.config.cluster_name.clone(),
            Arc::clone(&self.rpc),
        );
        let check_interval = time::interval(self.config.election.check_interval);
        tokio::spawn({
            let election = election.clone();
            async move { election.start(check_interval).await }
        });

        // Periodic load report loop
        let handler = Arc::clone(&self.handler);
        let report_aggregator = Arc::clone(&aggregator);
        let mut report_interval = time::interval(self.config.load.report_interval);
        tokio::spawn(async move {
            loop {
                report_interval.tick().await;
                let factor = report_aggregator.load_balance_factor(&target).await;
                gauge!(LOAD_BALANCE_FACTOR.name).set(f64::from(factor));
                handler.report_load(factor).await;
            }
        });

        info!("gantry node control plane has started");

        tokio::signal::ctrl_c().await?;
        info!("shutdown requested");
        if let Some(listener) = &self.listener {
            listener.close();
        }

        Ok(())
    }
}

/// Build the metric set selected by configuration. Request-level metrics
/// hold the stats weakly so a torn-down engine reads as target-down.
fn build_metrics(config: &LoadConfig, stats: &Arc<RequestStats>) -> Vec<Arc<dyn LoadMetric>> {
    config
        .metrics
        .iter()
        .map(|spec| -> Arc<dyn LoadMetric> {
            match spec.kind {
                MetricKind::Cpu => Arc::new(CpuLoadMetric::new(spec.weight, spec.capacity)),
                MetricKind::Memory => Arc::new(MemoryLoadMetric::new(spec.weight, spec.capacity)),
                MetricKind::BusyConnections => Arc::new(BusyConnectionsMetric::new(
                    spec.weight,
                    spec.capacity,
                    Arc::downgrade(stats),
                )),
                MetricKind::RequestRate => Arc::new(RequestRateMetric::new(
                    spec.weight,
                    spec.capacity,
                    Arc::downgrade(stats),
                )),
            }
        })
        .collect()
}

/// Default handler until a management-protocol transport is wired in:
/// reports discoveries and load factors through the log only.
pub(crate) struct TracingHandler;

#[async_trait]
impl ManagementHandler for TracingHandler {
    async fn proxy_discovered(&self, advert: ProxyAdvertisement, from: SocketAddr) {
        info!(
            server = %advert.server,
            %from,
            address = advert.address.as_deref().unwrap_or("-"),
            "proxy discovered"
        );
    }

    async fn report_load(&self, factor: i32) {
        debug!(factor, "load balance factor computed");
    }
}
