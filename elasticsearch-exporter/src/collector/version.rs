use async_trait::async_trait;
use prometheus::{GaugeVec, Opts};

use super::Collector;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exposes `elasticsearch_exporter_build_info`, a constant 1 labelled with build metadata.
pub struct BuildInfo {
    info: GaugeVec,
}

impl BuildInfo {
    pub fn new() -> Self {
        let info = GaugeVec::new(
            Opts::new(
                "elasticsearch_exporter_build_info",
                "A metric with a constant '1' value labeled by version, revision and branch from which elasticsearch_exporter was built.",
            ),
            &["version", "revision", "branch"],
        )
        .expect("static gauge vector definition is valid");

        info.with_label_values(&[
            VERSION,
            option_env!("EXPORTER_BUILD_REVISION").unwrap_or("unknown"),
            option_env!("EXPORTER_BUILD_BRANCH").unwrap_or("unknown"),
        ])
        .set(1.0);

        Self { info }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for BuildInfo {
    fn name(&self) -> &'static str {
        "version"
    }

    fn register_metrics(&self, registry: &prometheus::Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.info.clone()))
    }

    async fn collect(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::gather_text;

    #[tokio::test]
    async fn exposes_crate_version() {
        let text = gather_text(&BuildInfo::new()).await;

        assert!(text.contains(&format!(
            "elasticsearch_exporter_build_info{{branch=\"unknown\",revision=\"unknown\",version=\"{VERSION}\"}} 1"
        )));
    }
}
