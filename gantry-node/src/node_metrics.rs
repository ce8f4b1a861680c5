use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

pub(crate) struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub(crate) const COUNTERS: [Metric; 3] = [
    ADVERTS_ACCEPTED_TOTAL,
    ADVERTS_DISCARDED_TOTAL,
    METRIC_SAMPLE_FAILURES_TOTAL,
];
pub(crate) const GAUGES: [Metric; 2] = [LOAD_BALANCE_FACTOR, MASTER_ELECTION_STATE];

// DISCOVERY Metrics --------------------------

pub(crate) const ADVERTS_ACCEPTED_TOTAL: Metric = Metric {
    name: "gantry_adverts_accepted_total",
    description: "Total number of proxy advertisements accepted and dispatched to the handler",
};

pub(crate) const ADVERTS_DISCARDED_TOTAL: Metric = Metric {
    name: "gantry_adverts_discarded_total",
    description: "Total number of advertisements discarded (malformed, bad digest or stale)",
};

// LOAD Metrics --------------------------

pub(crate) const LOAD_BALANCE_FACTOR: Metric = Metric {
    name: "gantry_load_balance_factor",
    description: "Last computed load balance factor (-1 = node unavailable, 100 = fully available)",
};

pub(crate) const METRIC_SAMPLE_FAILURES_TOTAL: Metric = Metric {
    name: "gantry_metric_sample_failures_total",
    description: "Total number of per-metric sampling failures excluded from aggregation rounds",
};

// ELECTION Metrics --------------------------

pub(crate) const MASTER_ELECTION_STATE: Metric = Metric {
    name: "gantry_master_election_state",
    description: "Master election state of this node (0=member/no-master,1=master)",
};

pub(crate) fn init_metrics(prom_addr: Option<std::net::SocketAddr>, node_name: &str) {
    info!("initializing metrics exporter");

    if let Some(addr) = prom_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .add_global_label("node", node_name.to_string())
            .install()
            .expect("failed to install Prometheus recorder");
    }

    for name in COUNTERS {
        register_counter(name)
    }

    for name in GAUGES {
        register_gauge(name)
    }
}

/// Registers a counter with the given name.
fn register_counter(metric: Metric) {
    metrics::describe_counter!(metric.name, metric.description);
    let _counter = metrics::counter!(metric.name);
}

/// Registers a gauge with the given name.
fn register_gauge(metric: Metric) {
    metrics::describe_gauge!(metric.name, metric.description);
    let _gauge = metrics::gauge!(metric.name);
}
