use async_trait::async_trait;
use prometheus::Gauge;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use url::Url;

use super::{gauge, setting, setting_f64, Collector};
use crate::client::{endpoint, fetch_json};

const SUBSYSTEM: &str = "clustersettings_stats";
const ALLOCATION_ENABLE: &str = "cluster.routing.allocation.enable";
const MAX_SHARDS_PER_NODE: &str = "cluster.max_shards_per_node";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClusterSettingsResponse {
    pub persistent: Value,
    pub transient: Value,
    pub defaults: Value,
}

impl ClusterSettingsResponse {
    /// Most specific layer wins: transient, then persistent, then defaults.
    fn layers(&self) -> [&Value; 3] {
        [&self.transient, &self.persistent, &self.defaults]
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        self.layers().into_iter().find_map(|layer| setting(layer, key))
    }

    fn lookup_f64(&self, key: &str) -> Option<f64> {
        self.layers()
            .into_iter()
            .find_map(|layer| setting_f64(layer, key))
    }
}

fn allocation_mode(mode: &str) -> Option<f64> {
    match mode {
        "all" => Some(0.0),
        "primaries" => Some(1.0),
        "new_primaries" => Some(2.0),
        "none" => Some(3.0),
        _ => None,
    }
}

/// Collector for `/_cluster/settings?include_defaults=true`.
pub struct ClusterSettings {
    client: Client,
    url: Url,
    up: Gauge,
    shard_allocation_enabled: Gauge,
    max_shards_per_node: Gauge,
}

impl ClusterSettings {
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            up: gauge(
                SUBSYSTEM,
                "up",
                "Was the last scrape of the Elasticsearch cluster settings endpoint successful.",
            ),
            shard_allocation_enabled: gauge(
                SUBSYSTEM,
                "shard_allocation_enabled",
                "Current mode of cluster wide shard routing allocation settings (0=all, 1=primaries, 2=new_primaries, 3=none).",
            ),
            max_shards_per_node: gauge(
                SUBSYSTEM,
                "max_shards_per_node",
                "Current maximum number of shards per node setting.",
            ),
        }
    }

    fn update(&self, settings: &ClusterSettingsResponse) {
        if let Some(mode) = settings
            .lookup(ALLOCATION_ENABLE)
            .and_then(Value::as_str)
            .and_then(allocation_mode)
        {
            self.shard_allocation_enabled.set(mode);
        }

        if let Some(max) = settings.lookup_f64(MAX_SHARDS_PER_NODE) {
            self.max_shards_per_node.set(max);
        }
    }
}

#[async_trait]
impl Collector for ClusterSettings {
    fn name(&self) -> &'static str {
        "cluster_settings"
    }

    fn register_metrics(&self, registry: &prometheus::Registry) -> prometheus::Result<()> {
        for gauge in [&self.up, &self.shard_allocation_enabled, &self.max_shards_per_node] {
            registry.register(Box::new(gauge.clone()))?;
        }
        Ok(())
    }

    async fn collect(&self) {
        let mut url = endpoint(&self.url, "/_cluster/settings");
        url.query_pairs_mut().append_pair("include_defaults", "true");

        match fetch_json::<ClusterSettingsResponse>(&self.client, url).await {
            Ok(settings) => {
                self.up.set(1.0);
                self.update(&settings);
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch and decode cluster settings");
                self.up.set(0.0);
            }
        }
    }
}
