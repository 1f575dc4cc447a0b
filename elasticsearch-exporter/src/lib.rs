pub mod client;
pub mod clusterinfo;
pub mod collector;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod registry;
pub mod router;
pub mod scrape;

#[cfg(test)]
mod test_utils {
    use std::time::Duration;

    use prometheus::{Encoder, TextEncoder};

    use crate::client::build_http_client;
    use crate::collector::Collector;
    use crate::config::TlsConfig;

    pub fn test_client() -> reqwest::Client {
        build_http_client(&TlsConfig::default(), Duration::from_secs(5))
            .expect("failed to build test client")
    }

    /// Register `collector` on a fresh registry, collect once and render the text format.
    pub async fn gather_text(collector: &dyn Collector) -> String {
        let registry = prometheus::Registry::new();
        collector
            .register_metrics(&registry)
            .expect("failed to register collector");
        collector.collect().await;

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .expect("failed to encode metrics");
        String::from_utf8(buffer).expect("metrics are not utf-8")
    }
}
