mod args_parse;
mod node_metrics;
mod node_service;
mod service_configuration;

use std::{fs::read_to_string, path::Path, sync::Arc};

use crate::{
    args_parse::Args,
    node_metrics::init_metrics,
    node_service::{LoopbackRpc, NodeService, TracingHandler},
    service_configuration::{LoadConfiguration, ServiceConfiguration},
};

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Parse command line arguments
    let args = Args::parse()?;

    // Load the configuration from the specified YAML file
    let config_content = read_to_string(Path::new(&args.config_file))?;
    let load_config: LoadConfiguration = serde_yaml::from_str(&config_content)?;

    // Attempt to transform LoadConfiguration into ServiceConfiguration
    let mut service_config: ServiceConfiguration = load_config.try_into()?;

    // If `node_name` is provided via command-line args, override the value from the config file
    if let Some(node_name) = args.node_name {
        service_config.node_name = node_name;
    }

    // If `prom_exporter` is provided via command-line args, override the value from the config file
    if let Some(prom_exporter) = args.prom_exporter {
        let prom_address: SocketAddr = prom_exporter.parse().context(format!(
            "Failed to parse into Socket address: {}",
            prom_exporter
        ))?;
        service_config.prom_exporter = Some(prom_address);
    }

    // Discovery overrides apply only when discovery is configured at all
    if let Some(discovery) = service_config.discovery.as_mut() {
        if let Some(group) = args.advert_group {
            discovery.group = group
                .parse()
                .context(format!("Failed to parse multicast group: {}", group))?;
        }
        if let Some(port) = args.advert_port {
            discovery.port = port;
        }
    }

    // Init metrics with or without prometheus exporter
    init_metrics(service_config.prom_exporter, &service_config.node_name);

    info!(
        cluster = %service_config.cluster_name,
        node = %service_config.node_name,
        "initializing Gantry node control plane"
    );

    // The management-protocol transport and the cluster RPC transport are
    // external collaborators; until they are wired in, discoveries and load
    // reports go to the log and the node runs standalone.
    let handler = Arc::new(TracingHandler);
    let rpc = Arc::new(LoopbackRpc);

    let mut node = NodeService::new(service_config, handler, rpc);
    node.start()
        .await
        .context("Gantry node control plane unable to start")?;

    info!("Gantry node control plane has stopped");

    Ok(())
}
