use std::fmt;
use std::sync::Arc;

use common_metrics::Gatherer;
use prometheus::proto::MetricFamily;
use tracing::debug;

use crate::collector::Collector;
use crate::error::ScrapeError;

/// Metrics of a single scrape. Built per request and dropped once the response is rendered.
#[derive(Default)]
pub struct Registry {
    metrics: prometheus::Registry,
    collectors: Vec<Arc<dyn Collector>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<(), ScrapeError> {
        collector
            .register_metrics(&self.metrics)
            .map_err(|source| ScrapeError::CollectorRegistration {
                collector: collector.name(),
                source,
            })?;
        self.collectors.push(collector);
        Ok(())
    }

    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Run every collector, one after the other, in registration order.
    pub async fn collect(&self) {
        for collector in &self.collectors {
            debug!(collector = collector.name(), "collecting");
            collector.collect().await;
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("collectors", &self.collector_names())
            .finish_non_exhaustive()
    }
}

impl Gatherer for Registry {
    fn gather(&self) -> Vec<MetricFamily> {
        self.metrics.gather()
    }
}
