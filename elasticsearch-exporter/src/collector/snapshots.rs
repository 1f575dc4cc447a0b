use std::collections::HashMap;

use async_trait::async_trait;
use prometheus::{Gauge, GaugeVec};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use super::{gauge, gauge_vec, register_all, Collector};
use crate::client::{endpoint, fetch_json};
use crate::error::FetchError;

const SUBSYSTEM: &str = "snapshot_stats";
const LATEST_LABELS: [&str; 3] = ["repository", "state", "version"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotsResponse {
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub snapshot: String,
    pub version: String,
    pub state: String,
    pub indices: Vec<String>,
    pub start_time_in_millis: i64,
    pub end_time_in_millis: i64,
    pub shards: SnapshotShards,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotShards {
    pub total: u64,
    pub failed: u64,
    pub successful: u64,
}

struct LatestMetric {
    gauge: GaugeVec,
    value: fn(&Snapshot) -> f64,
}

/// Collector for snapshot repositories: one listing of `/_snapshot`, then every snapshot of
/// each repository.
pub struct Snapshots {
    client: Client,
    url: Url,
    up: Gauge,
    number_of_snapshots: GaugeVec,
    oldest_snapshot_timestamp: GaugeVec,
    latest_snapshot_timestamp: GaugeVec,
    latest: Vec<LatestMetric>,
}

impl Snapshots {
    pub fn new(client: Client, url: Url) -> Self {
        let metric = |name: &str, help: &str, value: fn(&Snapshot) -> f64| LatestMetric {
            gauge: gauge_vec(SUBSYSTEM, name, help, &LATEST_LABELS),
            value,
        };

        let latest = vec![
            metric(
                "snapshot_number_of_indices",
                "Number of indices in the last snapshot",
                |s| s.indices.len() as f64,
            ),
            metric(
                "snapshot_start_time_timestamp",
                "Last snapshot start timestamp",
                |s| s.start_time_in_millis as f64 / 1000.0,
            ),
            metric(
                "snapshot_end_time_timestamp",
                "Last snapshot end timestamp",
                |s| s.end_time_in_millis as f64 / 1000.0,
            ),
            metric(
                "snapshot_number_of_failures",
                "Last snapshot number of failed shards",
                |s| s.shards.failed as f64,
            ),
            metric(
                "snapshot_total_shards",
                "Last snapshot total shards",
                |s| s.shards.total as f64,
            ),
            metric(
                "snapshot_successful_shards",
                "Last snapshot successful shards",
                |s| s.shards.successful as f64,
            ),
        ];

        Self {
            client,
            url,
            up: gauge(
                SUBSYSTEM,
                "up",
                "Was the last scrape of the Elasticsearch snapshots endpoint successful.",
            ),
            number_of_snapshots: gauge_vec(
                SUBSYSTEM,
                "number_of_snapshots",
                "Number of snapshots in a repository",
                &["repository"],
            ),
            oldest_snapshot_timestamp: gauge_vec(
                SUBSYSTEM,
                "oldest_snapshot_timestamp",
                "Timestamp of the oldest snapshot",
                &["repository"],
            ),
            latest_snapshot_timestamp: gauge_vec(
                SUBSYSTEM,
                "latest_snapshot_timestamp_seconds",
                "Timestamp of the latest SUCCESS or PARTIAL snapshot",
                &["repository"],
            ),
            latest,
        }
    }

    async fn fetch(&self) -> Result<HashMap<String, SnapshotsResponse>, FetchError> {
        let repositories: HashMap<String, serde_json::Value> =
            fetch_json(&self.client, endpoint(&self.url, "/_snapshot")).await?;

        let mut by_repository = HashMap::with_capacity(repositories.len());
        for repository in repositories.into_keys() {
            let url = endpoint(&self.url, &format!("/_snapshot/{repository}/_all"));
            let snapshots = fetch_json::<SnapshotsResponse>(&self.client, url).await?;
            by_repository.insert(repository, snapshots);
        }
        Ok(by_repository)
    }

    fn update(&self, repository: &str, response: &SnapshotsResponse) {
        let snapshots = &response.snapshots;
        self.number_of_snapshots
            .with_label_values(&[repository])
            .set(snapshots.len() as f64);

        let Some(oldest) = snapshots.iter().map(|s| s.start_time_in_millis).min() else {
            return;
        };
        self.oldest_snapshot_timestamp
            .with_label_values(&[repository])
            .set(oldest as f64 / 1000.0);

        let completed = snapshots
            .iter()
            .filter(|s| s.state == "SUCCESS" || s.state == "PARTIAL")
            .map(|s| s.start_time_in_millis)
            .max();
        if let Some(latest) = completed {
            self.latest_snapshot_timestamp
                .with_label_values(&[repository])
                .set(latest as f64 / 1000.0);
        }

        // Elasticsearch lists snapshots oldest first.
        if let Some(last) = snapshots.last() {
            let labels = [repository, last.state.as_str(), last.version.as_str()];
            for metric in &self.latest {
                metric
                    .gauge
                    .with_label_values(&labels)
                    .set((metric.value)(last));
            }
        }
    }
}

#[async_trait]
impl Collector for Snapshots {
    fn name(&self) -> &'static str {
        "snapshots"
    }

    fn register_metrics(&self, registry: &prometheus::Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.up.clone()))?;
        let mut gauges: Vec<&GaugeVec> = self.latest.iter().map(|m| &m.gauge).collect();
        gauges.extend([
            &self.number_of_snapshots,
            &self.oldest_snapshot_timestamp,
            &self.latest_snapshot_timestamp,
        ]);
        register_all(registry, &gauges)
    }

    async fn collect(&self) {
        match self.fetch().await {
            Ok(by_repository) => {
                self.up.set(1.0);
                for (repository, response) in &by_repository {
                    self.update(repository, response);
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch and decode snapshot stats");
                self.up.set(0.0);
            }
        }
    }
}
