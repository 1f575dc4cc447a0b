use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use prometheus::{Gauge, GaugeVec};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{gauge, gauge_vec, register_all, Collector};
use crate::client::{endpoint, fetch_json};
use crate::clusterinfo::{ClusterInfo, Consumer};

const SUBSYSTEM: &str = "indices";
const UNKNOWN_CLUSTER: &str = "unknown_cluster";
const SHARD_LABELS: [&str; 5] = ["index", "shard", "node", "primary", "cluster"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexStatsResponse {
    pub indices: HashMap<String, IndexStats>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexStats {
    pub primaries: IndexStatsSection,
    pub total: IndexStatsSection,
    pub shards: HashMap<String, Vec<ShardStats>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexStatsSection {
    pub docs: Docs,
    pub store: Store,
    pub indexing: Indexing,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Docs {
    pub count: u64,
    pub deleted: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Store {
    pub size_in_bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Indexing {
    pub index_total: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ShardStats {
    pub routing: ShardRouting,
    pub docs: Docs,
    pub store: Store,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ShardRouting {
    pub node: String,
    pub primary: bool,
}

struct IndexMetric {
    gauge: GaugeVec,
    value: fn(&IndexStats) -> f64,
}

/// Collector for `/_all/_stats`. It is also a cluster info consumer: the `cluster` label on
/// every sample comes from the latest snapshot pushed by the retriever.
pub struct Indices {
    client: Client,
    url: Url,
    shards: bool,
    cluster_name: RwLock<String>,
    up: Gauge,
    metrics: Vec<IndexMetric>,
    shard_docs: GaugeVec,
    shard_store: GaugeVec,
}

impl Indices {
    pub fn new(client: Client, url: Url, shards: bool) -> Self {
        let metric = |name: &str, help: &str, value: fn(&IndexStats) -> f64| IndexMetric {
            gauge: gauge_vec(SUBSYSTEM, name, help, &["index", "cluster"]),
            value,
        };

        let metrics = vec![
            metric(
                "docs_primary",
                "Count of documents with only primary shards",
                |i| i.primaries.docs.count as f64,
            ),
            metric(
                "deleted_docs_primary",
                "Count of deleted documents with only primary shards",
                |i| i.primaries.docs.deleted as f64,
            ),
            metric(
                "store_size_bytes_primary",
                "Current total size of stored index data in bytes with only primary shards on all nodes",
                |i| i.primaries.store.size_in_bytes as f64,
            ),
            metric(
                "docs_total",
                "Total count of documents",
                |i| i.total.docs.count as f64,
            ),
            metric(
                "store_size_bytes_total",
                "Current total size of stored index data in bytes with all shards on all nodes",
                |i| i.total.store.size_in_bytes as f64,
            ),
            metric(
                "indexing_index_total",
                "Total indexing calls",
                |i| i.total.indexing.index_total as f64,
            ),
        ];

        Self {
            client,
            url,
            shards,
            cluster_name: RwLock::new(UNKNOWN_CLUSTER.to_owned()),
            up: gauge(
                "index_stats",
                "up",
                "Was the last scrape of the Elasticsearch index endpoint successful.",
            ),
            metrics,
            shard_docs: gauge_vec(
                "indices_shards",
                "docs",
                "Count of documents on this shard",
                &SHARD_LABELS,
            ),
            shard_store: gauge_vec(
                "indices_shards",
                "store_size_in_bytes",
                "Store size of this shard",
                &SHARD_LABELS,
            ),
        }
    }

    fn cluster_name(&self) -> String {
        self.cluster_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn stats_url(&self) -> Url {
        let mut url = endpoint(&self.url, "/_all/_stats");
        let level = if self.shards { "shards" } else { "indices" };
        url.query_pairs_mut()
            .append_pair("ignore_unavailable", "true")
            .append_pair("level", level);
        url
    }

    fn update(&self, stats: &IndexStatsResponse) {
        let cluster = self.cluster_name();

        for (index, index_stats) in &stats.indices {
            for metric in &self.metrics {
                metric
                    .gauge
                    .with_label_values(&[index.as_str(), cluster.as_str()])
                    .set((metric.value)(index_stats));
            }

            if !self.shards {
                continue;
            }

            for (shard, copies) in &index_stats.shards {
                for copy in copies {
                    let primary = copy.routing.primary.to_string();
                    let labels = [
                        index.as_str(),
                        shard.as_str(),
                        copy.routing.node.as_str(),
                        primary.as_str(),
                        cluster.as_str(),
                    ];
                    self.shard_docs
                        .with_label_values(&labels)
                        .set(copy.docs.count as f64);
                    self.shard_store
                        .with_label_values(&labels)
                        .set(copy.store.size_in_bytes as f64);
                }
            }
        }
    }
}

impl Consumer for Indices {
    fn name(&self) -> &'static str {
        "indices"
    }

    fn update_cluster_info(&self, info: Arc<ClusterInfo>) {
        debug!(cluster = %info.cluster_name, "indices collector received cluster info");
        *self
            .cluster_name
            .write()
            .unwrap_or_else(PoisonError::into_inner) = info.cluster_name.clone();
    }
}

#[async_trait]
impl Collector for Indices {
    fn name(&self) -> &'static str {
        "indices"
    }

    fn register_metrics(&self, registry: &prometheus::Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.up.clone()))?;
        let mut gauges: Vec<&GaugeVec> = self.metrics.iter().map(|m| &m.gauge).collect();
        if self.shards {
            gauges.push(&self.shard_docs);
            gauges.push(&self.shard_store);
        }
        register_all(registry, &gauges)
    }

    async fn collect(&self) {
        match fetch_json::<IndexStatsResponse>(&self.client, self.stats_url()).await {
            Ok(stats) => {
                self.up.set(1.0);
                self.update(&stats);
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch and decode index stats");
                self.up.set(0.0);
            }
        }
    }
}
