use async_trait::async_trait;
use prometheus::{Gauge, GaugeVec};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use super::{gauge, gauge_vec, register_all, Collector};
use crate::client::{endpoint, fetch_json};

const SUBSYSTEM: &str = "cluster_health";
const COLORS: [&str; 3] = ["green", "yellow", "red"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClusterHealthResponse {
    pub cluster_name: String,
    pub status: String,
    pub timed_out: bool,
    pub number_of_nodes: u64,
    pub number_of_data_nodes: u64,
    pub active_primary_shards: u64,
    pub active_shards: u64,
    pub relocating_shards: u64,
    pub initializing_shards: u64,
    pub unassigned_shards: u64,
    pub delayed_unassigned_shards: u64,
    pub number_of_pending_tasks: u64,
    pub number_of_in_flight_fetch: u64,
    pub task_max_waiting_in_queue_millis: u64,
    pub active_shards_percent_as_number: f64,
}

struct HealthMetric {
    gauge: GaugeVec,
    value: fn(&ClusterHealthResponse) -> f64,
}

/// Collector for `/_cluster/health`.
pub struct ClusterHealth {
    client: Client,
    url: Url,
    up: Gauge,
    status: GaugeVec,
    metrics: Vec<HealthMetric>,
}

impl ClusterHealth {
    pub fn new(client: Client, url: Url) -> Self {
        let metric = |name: &str, help: &str, value: fn(&ClusterHealthResponse) -> f64| {
            HealthMetric {
                gauge: gauge_vec(SUBSYSTEM, name, help, &["cluster"]),
                value,
            }
        };

        let metrics = vec![
            metric(
                "number_of_nodes",
                "Number of nodes in the cluster.",
                |h| h.number_of_nodes as f64,
            ),
            metric(
                "number_of_data_nodes",
                "Number of data nodes in the cluster.",
                |h| h.number_of_data_nodes as f64,
            ),
            metric(
                "active_primary_shards",
                "The number of primary shards in your cluster. This is an aggregate total across all indices.",
                |h| h.active_primary_shards as f64,
            ),
            metric(
                "active_shards",
                "Aggregate total of all shards across all indices, which includes replica shards.",
                |h| h.active_shards as f64,
            ),
            metric(
                "relocating_shards",
                "The number of shards that are currently moving from one node to another node.",
                |h| h.relocating_shards as f64,
            ),
            metric(
                "initializing_shards",
                "Count of shards that are being freshly created.",
                |h| h.initializing_shards as f64,
            ),
            metric(
                "unassigned_shards",
                "The number of shards that exist in the cluster state, but cannot be found in the cluster itself.",
                |h| h.unassigned_shards as f64,
            ),
            metric(
                "delayed_unassigned_shards",
                "Shards delayed to reduce reallocation overhead.",
                |h| h.delayed_unassigned_shards as f64,
            ),
            metric(
                "number_of_pending_tasks",
                "Cluster level changes which have not yet been executed.",
                |h| h.number_of_pending_tasks as f64,
            ),
            metric(
                "number_of_in_flight_fetch",
                "The number of ongoing shard info requests.",
                |h| h.number_of_in_flight_fetch as f64,
            ),
            metric(
                "task_max_waiting_in_queue_millis",
                "Tasks max time waiting in queue.",
                |h| h.task_max_waiting_in_queue_millis as f64,
            ),
            metric(
                "active_shards_percent_as_number",
                "Percentage of active shards across the cluster.",
                |h| h.active_shards_percent_as_number,
            ),
            metric(
                "timed_out",
                "Whether the health request timed out before the cluster answered.",
                |h| if h.timed_out { 1.0 } else { 0.0 },
            ),
        ];

        Self {
            client,
            url,
            up: gauge(
                SUBSYSTEM,
                "up",
                "Was the last scrape of the Elasticsearch cluster health endpoint successful.",
            ),
            status: gauge_vec(
                SUBSYSTEM,
                "status",
                "Whether all primary and replica shards are allocated.",
                &["cluster", "color"],
            ),
            metrics,
        }
    }

    fn update(&self, health: &ClusterHealthResponse) {
        let cluster = health.cluster_name.as_str();

        for metric in &self.metrics {
            metric
                .gauge
                .with_label_values(&[cluster])
                .set((metric.value)(health));
        }

        for color in COLORS {
            let current = if health.status.eq_ignore_ascii_case(color) {
                1.0
            } else {
                0.0
            };
            self.status.with_label_values(&[cluster, color]).set(current);
        }
    }
}

#[async_trait]
impl Collector for ClusterHealth {
    fn name(&self) -> &'static str {
        "cluster_health"
    }

    fn register_metrics(&self, registry: &prometheus::Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.up.clone()))?;
        let mut gauges: Vec<&GaugeVec> = self.metrics.iter().map(|m| &m.gauge).collect();
        gauges.push(&self.status);
        register_all(registry, &gauges)
    }

    async fn collect(&self) {
        let url = endpoint(&self.url, "/_cluster/health");

        match fetch_json::<ClusterHealthResponse>(&self.client, url).await {
            Ok(health) => {
                self.up.set(1.0);
                self.update(&health);
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch and decode cluster health");
                self.up.set(0.0);
            }
        }
    }
}
