use anyhow::{bail, Context, Result};
use gantry_core::advert::{DEFAULT_ADVERT_GROUP, DEFAULT_ADVERT_PORT, DEFAULT_ADVERT_TTL};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::node_service::load_aggregator::{DEFAULT_DECAY_FACTOR, DEFAULT_HISTORY};

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Cluster / load balancing group name
    pub(crate) cluster_name: String,
    /// Node identity and addresses
    pub(crate) node: NodeConfig,
    /// Proxy discovery configuration (omit to disable discovery)
    #[serde(default)]
    pub(crate) discovery: Option<DiscoveryNode>,
    /// Load aggregation configuration
    #[serde(default)]
    pub(crate) load: Option<LoadNode>,
    /// Master election configuration
    #[serde(default)]
    pub(crate) election: Option<ElectionNode>,
}

/// Node identity configuration
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct NodeConfig {
    /// Route identity the proxies know this node by
    pub(crate) name: String,
    /// Hostname or IP address advertised for this node
    pub(crate) host: String,
    /// Prometheus metrics exporter port (optional)
    pub(crate) prometheus_port: Option<u16>,
}

/// Proxy discovery configuration node
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DiscoveryNode {
    /// Defaults to true when the section is present
    pub(crate) enabled: Option<bool>,
    /// Multicast group address (default 224.0.1.105)
    pub(crate) group: Option<String>,
    /// Advertisement port (default 23364)
    pub(crate) port: Option<u16>,
    /// Multicast time-to-live in hops
    pub(crate) ttl: Option<u32>,
    /// Secret key shared with the proxies, agreed out of band
    pub(crate) secret_key: String,
}

/// Load aggregation configuration node
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadNode {
    /// Number of past samples retained per metric
    pub(crate) history: Option<usize>,
    /// Base of the exponential weighting of historical samples
    pub(crate) decay_factor: Option<f64>,
    /// How often the factor is computed and reported (seconds)
    pub(crate) report_interval_secs: Option<u64>,
    /// Metric set; defaults to cpu + memory, weight 1 each
    pub(crate) metrics: Option<Vec<MetricNode>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MetricNode {
    pub(crate) kind: MetricKind,
    pub(crate) weight: Option<u32>,
    pub(crate) capacity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum MetricKind {
    Cpu,
    Memory,
    BusyConnections,
    RequestRate,
}

impl MetricKind {
    /// Raw value at which the metric saturates when none is configured.
    fn default_capacity(self) -> f64 {
        match self {
            // CPU and memory sample fractions of the whole
            MetricKind::Cpu | MetricKind::Memory => 1.0,
            MetricKind::BusyConnections => 512.0,
            MetricKind::RequestRate => 1000.0,
        }
    }
}

/// Master election configuration node
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ElectionNode {
    pub(crate) check_interval_secs: Option<u64>,
}

/// resolved configuration for the node control plane service
#[derive(Debug)]
pub(crate) struct ServiceConfiguration {
    /// Cluster / load balancing group name
    pub(crate) cluster_name: String,
    /// Route identity the proxies know this node by
    pub(crate) node_name: String,
    /// Hostname or IP address advertised for this node
    pub(crate) host: String,
    /// Prometheus exporter address
    pub(crate) prom_exporter: Option<SocketAddr>,
    /// Proxy discovery; None when disabled
    pub(crate) discovery: Option<DiscoveryConfig>,
    /// Load aggregation settings
    pub(crate) load: LoadConfig,
    /// Master election settings
    pub(crate) election: ElectionConfig,
}

#[derive(Debug, Clone)]
pub(crate) struct DiscoveryConfig {
    pub(crate) group: Ipv4Addr,
    pub(crate) port: u16,
    pub(crate) ttl: u32,
    pub(crate) secret_key: String,
}

#[derive(Debug, Clone)]
pub(crate) struct LoadConfig {
    pub(crate) history: usize,
    pub(crate) decay_factor: f64,
    pub(crate) report_interval: Duration,
    pub(crate) metrics: Vec<MetricSpec>,
}

#[derive(Debug, Clone)]
pub(crate) struct MetricSpec {
    pub(crate) kind: MetricKind,
    pub(crate) weight: u32,
    pub(crate) capacity: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct ElectionConfig {
    pub(crate) check_interval: Duration,
}

/// Implementing the TryFrom trait to transform LoadConfiguration into ServiceConfiguration
impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let prom_exporter = match config.node.prometheus_port {
            Some(port) => Some(
                format!("{}:{}", config.node.host, port)
                    .parse()
                    .context("Failed to create prom_exporter")?,
            ),
            None => None,
        };

        let discovery = match config.discovery {
            Some(node) if node.enabled.unwrap_or(true) => {
                let group = match node.group {
                    Some(group) => group
                        .parse::<Ipv4Addr>()
                        .context("Failed to parse discovery group address")?,
                    None => DEFAULT_ADVERT_GROUP,
                };
                if !group.is_multicast() {
                    bail!("discovery group {} is not a multicast address", group);
                }
                Some(DiscoveryConfig {
                    group,
                    port: node.port.unwrap_or(DEFAULT_ADVERT_PORT),
                    ttl: node.ttl.unwrap_or(DEFAULT_ADVERT_TTL),
                    secret_key: node.secret_key,
                })
            }
            _ => None,
        };

        let load_node = config.load.unwrap_or(LoadNode {
            history: None,
            decay_factor: None,
            report_interval_secs: None,
            metrics: None,
        });

        let metric_nodes = load_node.metrics.unwrap_or_else(|| {
            vec![
                MetricNode {
                    kind: MetricKind::Cpu,
                    weight: None,
                    capacity: None,
                },
                MetricNode {
                    kind: MetricKind::Memory,
                    weight: None,
                    capacity: None,
                },
            ]
        });

        let mut metrics = Vec::with_capacity(metric_nodes.len());
        for node in metric_nodes {
            let capacity = node.capacity.unwrap_or_else(|| node.kind.default_capacity());
            if capacity <= 0.0 {
                bail!("metric {:?} has non-positive capacity {}", node.kind, capacity);
            }
            metrics.push(MetricSpec {
                kind: node.kind,
                weight: node.weight.unwrap_or(1),
                capacity,
            });
        }

        let load = LoadConfig {
            history: load_node.history.unwrap_or(DEFAULT_HISTORY),
            decay_factor: load_node.decay_factor.unwrap_or(DEFAULT_DECAY_FACTOR),
            report_interval: Duration::from_secs(load_node.report_interval_secs.unwrap_or(10)),
            metrics,
        };

        let election = ElectionConfig {
            check_interval: Duration::from_secs(
                config
                    .election
                    .and_then(|e| e.check_interval_secs)
                    .unwrap_or(5),
            ),
        };

        Ok(ServiceConfiguration {
            cluster_name: config.cluster_name,
            node_name: config.node.name,
            host: config.node.host,
            prom_exporter,
            discovery,
            load,
            election,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<ServiceConfiguration> {
        let load: LoadConfiguration = serde_yaml::from_str(yaml)?;
        load.try_into()
    }

    #[test]
    fn minimal_configuration_gets_defaults() {
        let config = parse(
            r#"
cluster_name: web
node:
  name: node-a
  host: 192.168.1.10
"#,
        )
        .expect("minimal config");

        assert_eq!(config.cluster_name, "web");
        assert!(config.discovery.is_none());
        assert!(config.prom_exporter.is_none());
        assert_eq!(config.load.history, DEFAULT_HISTORY);
        assert_eq!(config.load.decay_factor, DEFAULT_DECAY_FACTOR);
        // Default metric set: cpu + memory, weight 1, capacity 1.0.
        assert_eq!(config.load.metrics.len(), 2);
        assert!(config
            .load
            .metrics
            .iter()
            .all(|m| m.weight == 1 && m.capacity == 1.0));
    }

    #[test]
    fn full_configuration_is_resolved() {
        let config = parse(
            r#"
cluster_name: web
node:
  name: node-a
  host: 127.0.0.1
  prometheus_port: 9400
discovery:
  secret_key: changeme
  ttl: 29
load:
  history: 3
  decay_factor: 1.5
  report_interval_secs: 2
  metrics:
    - kind: busy_connections
      weight: 2
      capacity: 256
    - kind: cpu
election:
  check_interval_secs: 7
"#,
        )
        .expect("full config");

        let discovery = config.discovery.expect("discovery enabled");
        assert_eq!(discovery.group, DEFAULT_ADVERT_GROUP);
        assert_eq!(discovery.port, DEFAULT_ADVERT_PORT);
        assert_eq!(discovery.ttl, 29);
        assert_eq!(
            config.prom_exporter,
            Some("127.0.0.1:9400".parse().unwrap())
        );
        assert_eq!(config.load.metrics[0].kind, MetricKind::BusyConnections);
        assert_eq!(config.load.metrics[0].capacity, 256.0);
        assert_eq!(config.load.metrics[1].weight, 1);
        assert_eq!(config.election.check_interval, Duration::from_secs(7));
    }

    #[test]
    fn disabled_discovery_is_dropped() {
        let config = parse(
            r#"
cluster_name: web
node:
  name: node-a
  host: 127.0.0.1
discovery:
  enabled: false
  secret_key: changeme
"#,
        )
        .expect("config with disabled discovery");
        assert!(config.discovery.is_none());
    }

    #[test]
    fn invalid_group_and_capacity_are_rejected() {
        assert!(parse(
            r#"
cluster_name: web
node:
  name: node-a
  host: 127.0.0.1
discovery:
  secret_key: changeme
  group: 10.0.0.1
"#,
        )
        .is_err());

        assert!(parse(
            r#"
cluster_name: web
node:
  name: node-a
  host: 127.0.0.1
load:
  metrics:
    - kind: cpu
      capacity: 0.0
"#,
        )
        .is_err());
    }
}
