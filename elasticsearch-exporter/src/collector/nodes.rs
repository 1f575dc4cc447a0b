use std::collections::HashMap;

use async_trait::async_trait;
use prometheus::{Gauge, GaugeVec};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use super::{gauge, gauge_vec, register_all, Collector};
use crate::client::{endpoint, fetch_json};

const NODE_LABELS: [&str; 5] = ["cluster", "host", "name", "es_master_node", "es_data_node"];

/// Which nodes the stats are requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelection {
    All,
    Named(String),
}

impl NodeSelection {
    pub fn new(all_nodes: bool, node: &str) -> Self {
        if all_nodes {
            NodeSelection::All
        } else {
            NodeSelection::Named(node.to_owned())
        }
    }

    fn path(&self) -> String {
        match self {
            NodeSelection::All => "/_nodes/stats".to_owned(),
            NodeSelection::Named(node) => format!("/_nodes/{node}/stats"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodesStatsResponse {
    pub cluster_name: String,
    pub nodes: HashMap<String, NodeStats>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeStats {
    pub name: String,
    pub host: String,
    pub roles: Vec<String>,
    pub jvm: JvmStats,
    pub indices: NodeIndicesStats,
    pub process: ProcessStats,
    pub os: OsStats,
    pub fs: FsStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JvmStats {
    pub mem: JvmMemStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JvmMemStats {
    pub heap_used_in_bytes: u64,
    pub heap_max_in_bytes: u64,
    pub non_heap_used_in_bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeIndicesStats {
    pub docs: DocsStats,
    pub store: StoreStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DocsStats {
    pub count: u64,
    pub deleted: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreStats {
    pub size_in_bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProcessStats {
    pub open_file_descriptors: i64,
    pub max_file_descriptors: i64,
    pub cpu: CpuStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CpuStats {
    pub percent: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OsStats {
    pub cpu: CpuStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FsStats {
    pub total: FsTotalStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FsTotalStats {
    pub total_in_bytes: u64,
    pub free_in_bytes: u64,
    pub available_in_bytes: u64,
}

struct NodeMetric {
    gauge: GaugeVec,
    value: fn(&NodeStats) -> f64,
}

/// Collector for `/_nodes/stats`, restricted to one node unless all nodes are selected.
pub struct Nodes {
    client: Client,
    url: Url,
    selection: NodeSelection,
    up: Gauge,
    jvm_memory_used: GaugeVec,
    metrics: Vec<NodeMetric>,
}

impl Nodes {
    pub fn new(client: Client, url: Url, selection: NodeSelection) -> Self {
        let metric = |subsystem: &str, name: &str, help: &str, value: fn(&NodeStats) -> f64| {
            NodeMetric {
                gauge: gauge_vec(subsystem, name, help, &NODE_LABELS),
                value,
            }
        };

        let metrics = vec![
            metric(
                "jvm",
                "memory_max_bytes",
                "JVM memory max",
                |n| n.jvm.mem.heap_max_in_bytes as f64,
            ),
            metric(
                "indices",
                "docs",
                "Count of documents on this node",
                |n| n.indices.docs.count as f64,
            ),
            metric(
                "indices",
                "docs_deleted",
                "Count of deleted documents on this node",
                |n| n.indices.docs.deleted as f64,
            ),
            metric(
                "indices",
                "store_size_bytes",
                "Current size of stored index data in bytes",
                |n| n.indices.store.size_in_bytes as f64,
            ),
            metric(
                "process",
                "cpu_percent",
                "Percent CPU used by process",
                |n| n.process.cpu.percent,
            ),
            metric(
                "process",
                "open_files_count",
                "Open file descriptors",
                |n| n.process.open_file_descriptors as f64,
            ),
            metric(
                "process",
                "max_files_descriptors",
                "Max file descriptors",
                |n| n.process.max_file_descriptors as f64,
            ),
            metric(
                "os",
                "cpu_percent",
                "Percent CPU used by the OS",
                |n| n.os.cpu.percent,
            ),
            metric(
                "filesystem_data",
                "size_bytes",
                "Size of block device in bytes",
                |n| n.fs.total.total_in_bytes as f64,
            ),
            metric(
                "filesystem_data",
                "free_bytes",
                "Free space on block device in bytes",
                |n| n.fs.total.free_in_bytes as f64,
            ),
            metric(
                "filesystem_data",
                "available_bytes",
                "Available space on block device in bytes",
                |n| n.fs.total.available_in_bytes as f64,
            ),
        ];

        let mut area_labels = NODE_LABELS.to_vec();
        area_labels.push("area");

        Self {
            client,
            url,
            selection,
            up: gauge(
                "node_stats",
                "up",
                "Was the last scrape of the Elasticsearch nodes endpoint successful.",
            ),
            jvm_memory_used: gauge_vec("jvm", "memory_used_bytes", "JVM memory currently used by area", &area_labels),
            metrics,
        }
    }

    fn update(&self, stats: &NodesStatsResponse) {
        for node in stats.nodes.values() {
            let is_master = node.roles.iter().any(|role| role == "master").to_string();
            let is_data = node
                .roles
                .iter()
                .any(|role| role == "data" || role.starts_with("data_"))
                .to_string();
            let labels = [
                stats.cluster_name.as_str(),
                node.host.as_str(),
                node.name.as_str(),
                is_master.as_str(),
                is_data.as_str(),
            ];

            for metric in &self.metrics {
                metric
                    .gauge
                    .with_label_values(&labels)
                    .set((metric.value)(node));
            }

            for (area, used) in [
                ("heap", node.jvm.mem.heap_used_in_bytes),
                ("non-heap", node.jvm.mem.non_heap_used_in_bytes),
            ] {
                let mut with_area = labels.to_vec();
                with_area.push(area);
                self.jvm_memory_used
                    .with_label_values(&with_area)
                    .set(used as f64);
            }
        }
    }
}

#[async_trait]
impl Collector for Nodes {
    fn name(&self) -> &'static str {
        "nodes"
    }

    fn register_metrics(&self, registry: &prometheus::Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.up.clone()))?;
        let mut gauges: Vec<&GaugeVec> = self.metrics.iter().map(|m| &m.gauge).collect();
        gauges.push(&self.jvm_memory_used);
        register_all(registry, &gauges)
    }

    async fn collect(&self) {
        let url = endpoint(&self.url, &self.selection.path());

        match fetch_json::<NodesStatsResponse>(&self.client, url).await {
            Ok(stats) => {
                self.up.set(1.0);
                self.update(&stats);
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch and decode node stats");
                self.up.set(0.0);
            }
        }
    }
}
