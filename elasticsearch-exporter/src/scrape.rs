use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, error, warn};
use url::Url;

use crate::client::redacted;
use crate::clusterinfo::{Consumer, RetrieverProvider, RunOutcome};
use crate::collector::{
    BuildInfo, ClusterHealth, ClusterSettings, Indices, IndicesSettings, NodeSelection, Nodes,
    Snapshots,
};
use crate::config::ElasticsearchConfig;
use crate::error::{ScrapeError, TargetParseError};
use crate::registry::Registry;

/// Builds and fills the registry of one scrape.
pub struct Scraper {
    es: ElasticsearchConfig,
    client: Client,
    retrievers: Arc<dyn RetrieverProvider>,
}

impl Scraper {
    pub fn new(
        es: ElasticsearchConfig,
        client: Client,
        retrievers: Arc<dyn RetrieverProvider>,
    ) -> Self {
        Self {
            es,
            client,
            retrievers,
        }
    }

    /// The target of a scrape: the request override when present and non-empty, the
    /// configured URI otherwise.
    pub fn resolve_target(&self, target: Option<&str>) -> Result<Url, TargetParseError> {
        let raw = match target {
            Some(target) if !target.is_empty() => target,
            _ => self.es.uri.as_str(),
        };

        let url = Url::parse(raw)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(TargetParseError::UnsupportedScheme(other.to_owned())),
        }
    }

    pub async fn scrape(&self, target: Option<&str>) -> Result<Registry, ScrapeError> {
        let url = self.resolve_target(target)?;
        let redacted_url = redacted(&url);
        let mut registry = Registry::new();

        registry.register(Arc::new(BuildInfo::new()))?;

        let retriever = self.retrievers.retriever(&url);
        match retriever.run().await {
            RunOutcome::Ready => debug!(url = %redacted_url, "cluster info available"),
            RunOutcome::Degraded(reason) => {
                warn!(url = %redacted_url, ?reason, "cluster info not available, collectors use default labels")
            }
            RunOutcome::Fatal(err) => {
                error!(url = %redacted_url, error = %err, "failed to run cluster info retriever");
                self.retrievers.invalidate(&url, &retriever);
                return Err(ScrapeError::RetrieverFatal(err));
            }
        }
        registry.register(retriever.clone().collector())?;

        registry.register(Arc::new(ClusterHealth::new(
            self.client.clone(),
            url.clone(),
        )))?;
        registry.register(Arc::new(Nodes::new(
            self.client.clone(),
            url.clone(),
            NodeSelection::new(self.es.all_nodes, &self.es.node),
        )))?;

        let mut consumer: Option<Arc<dyn Consumer>> = None;
        if self.es.indices_enabled() {
            let indices = Arc::new(Indices::new(
                self.client.clone(),
                url.clone(),
                self.es.shards,
            ));
            registry.register(indices.clone())?;
            let indices: Arc<dyn Consumer> = indices;
            consumer = Some(indices);
        }

        if self.es.snapshots {
            registry.register(Arc::new(Snapshots::new(self.client.clone(), url.clone())))?;
        }

        if self.es.cluster_settings {
            registry.register(Arc::new(ClusterSettings::new(
                self.client.clone(),
                url.clone(),
            )))?;
        }

        if self.es.indices_settings {
            registry.register(Arc::new(IndicesSettings::new(self.client.clone(), url)))?;
        }

        // Consumers only live for this scrape's collection.
        if let Some(consumer) = &consumer {
            retriever
                .register_consumer(consumer.clone())
                .map_err(|source| {
                    error!(url = %redacted_url, error = %source, "failed to register indices collector in cluster info");
                    ScrapeError::ConsumerRegistration {
                        consumer: consumer.name(),
                        source,
                    }
                })?;
        }

        registry.collect().await;

        if let Some(consumer) = &consumer {
            retriever.unregister_consumer(consumer);
        }
        Ok(registry)
    }
}
