use std::collections::HashMap;

use async_trait::async_trait;
use prometheus::{Gauge, GaugeVec};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use url::Url;

use super::{gauge, gauge_vec, setting_bool, setting_f64, Collector};
use crate::client::{endpoint, fetch_json};

const SUBSYSTEM: &str = "indices_settings_stats";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub settings: Value,
}

/// Collector for `/_all/_settings`.
pub struct IndicesSettings {
    client: Client,
    url: Url,
    up: Gauge,
    read_only_indices: Gauge,
    replicas: GaugeVec,
}

impl IndicesSettings {
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            up: gauge(
                SUBSYSTEM,
                "up",
                "Was the last scrape of the Elasticsearch indices settings endpoint successful.",
            ),
            read_only_indices: gauge(
                SUBSYSTEM,
                "read_only_indices",
                "Current number of read only indices within cluster",
            ),
            replicas: gauge_vec(
                "indices_settings",
                "replicas",
                "Number of replicas configured for the index",
                &["index"],
            ),
        }
    }

    fn update(&self, indices: &HashMap<String, IndexSettings>) {
        let mut read_only = 0u32;

        for (index, index_settings) in indices {
            let settings = &index_settings.settings;
            if setting_bool(settings, "index.blocks.read_only_allow_delete").unwrap_or(false) {
                read_only += 1;
            }
            if let Some(replicas) = setting_f64(settings, "index.number_of_replicas") {
                self.replicas
                    .with_label_values(&[index.as_str()])
                    .set(replicas);
            }
        }

        self.read_only_indices.set(f64::from(read_only));
    }
}

#[async_trait]
impl Collector for IndicesSettings {
    fn name(&self) -> &'static str {
        "indices_settings"
    }

    fn register_metrics(&self, registry: &prometheus::Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.up.clone()))?;
        registry.register(Box::new(self.read_only_indices.clone()))?;
        registry.register(Box::new(self.replicas.clone()))
    }

    async fn collect(&self) {
        let url = endpoint(&self.url, "/_all/_settings");

        match fetch_json::<HashMap<String, IndexSettings>>(&self.client, url).await {
            Ok(indices) => {
                self.up.set(1.0);
                self.update(&indices);
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch and decode indices settings");
                self.up.set(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::test_utils::{gather_text, test_client};

    #[tokio::test]
    async fn counts_read_only_indices_and_replicas() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/_all/_settings");
                then.status(200).json_body(json!({
                    "logs": {"settings": {"index": {
                        "number_of_replicas": "1",
                        "blocks": {"read_only_allow_delete": "true"}
                    }}},
                    "metrics": {"settings": {"index": {"number_of_replicas": "2"}}}
                }));
            })
            .await;

        let url = Url::parse(&server.base_url()).unwrap();
        let text = gather_text(&IndicesSettings::new(test_client(), url)).await;

        assert!(text.contains("elasticsearch_indices_settings_stats_read_only_indices 1"));
        assert!(text.contains("elasticsearch_indices_settings_replicas{index=\"logs\"} 1"));
        assert!(text.contains("elasticsearch_indices_settings_replicas{index=\"metrics\"} 2"));
    }
}
