//! Metric collectors for the Elasticsearch HTTP API.
//!
//! A collector is built fresh for every scrape. It registers the metric handles it owns on the
//! scrape's registry, then fills them in `collect` from one or more API calls. Collection
//! failures never fail the scrape: they are logged and reported through the collector's own
//! `up` gauge, so the remaining collectors still produce their samples.

use async_trait::async_trait;
use prometheus::{Gauge, GaugeVec, Opts};
use serde_json::Value;

mod cluster_health;
mod cluster_settings;
mod indices;
mod indices_settings;
mod nodes;
mod snapshots;
mod version;

pub use cluster_health::ClusterHealth;
pub use cluster_settings::ClusterSettings;
pub use indices::Indices;
pub use indices_settings::IndicesSettings;
pub use nodes::{NodeSelection, Nodes};
pub use snapshots::Snapshots;
pub use version::BuildInfo;

pub const NAMESPACE: &str = "elasticsearch";

/// Describe/collect capability shared by everything registered on a scrape registry.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Register every metric this collector may produce.
    fn register_metrics(&self, registry: &prometheus::Registry) -> prometheus::Result<()>;

    /// Refresh the registered metrics from the cluster.
    async fn collect(&self);
}

// Metric definitions below are static, so construction can only fail on a programming error.

pub(crate) fn gauge(subsystem: &str, name: &str, help: &str) -> Gauge {
    Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE).subsystem(subsystem))
        .expect("static gauge definition is valid")
}

pub(crate) fn gauge_vec(subsystem: &str, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    GaugeVec::new(
        Opts::new(name, help).namespace(NAMESPACE).subsystem(subsystem),
        labels,
    )
    .expect("static gauge vector definition is valid")
}

pub(crate) fn register_all(
    registry: &prometheus::Registry,
    gauges: &[&GaugeVec],
) -> prometheus::Result<()> {
    for gauge in gauges {
        registry.register(Box::new((*gauge).clone()))?;
    }
    Ok(())
}

/// Look a dotted setting up in a settings document. Elasticsearch returns settings either
/// flat (`"cluster.routing.allocation.enable": "all"`), nested, or any mix of both.
pub(crate) fn setting<'a>(document: &'a Value, key: &str) -> Option<&'a Value> {
    let object = document.as_object()?;

    if let Some(value) = object.get(key) {
        return Some(value);
    }

    let mut split = key.len();
    while let Some(dot) = key[..split].rfind('.') {
        if let Some(nested) = object.get(&key[..dot]) {
            if let Some(value) = setting(nested, &key[dot + 1..]) {
                return Some(value);
            }
        }
        split = dot;
    }

    None
}

/// Settings values come back as strings ("2", "true"); accept both strings and numbers.
pub(crate) fn setting_f64(document: &Value, key: &str) -> Option<f64> {
    match setting(document, key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

pub(crate) fn setting_bool(document: &Value, key: &str) -> Option<bool> {
    match setting(document, key)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}
