//! Cluster metadata shared between collectors.
//!
//! A [`MetadataRetriever`] polls `GET /` of one Elasticsearch target and pushes every snapshot
//! it obtains to its registered [`Consumer`]s, which use it for labels such as the cluster name.
//! Retrievers outlive a single scrape: they are looked up through a [`RetrieverProvider`] keyed
//! by target URL.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::collector::Collector;
use crate::error::RetrieverError;

mod cache;
mod retriever;

pub use cache::RetrieverCache;
pub use retriever::Retriever;

/// Response of the Elasticsearch root endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_uuid: String,
    #[serde(default)]
    pub version: VersionInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    pub number: String,
    pub build_hash: String,
    pub build_date: String,
    pub lucene_version: String,
}

/// Receives every cluster info snapshot a retriever obtains.
pub trait Consumer: Send + Sync {
    /// Consumers are keyed by name; registering a second consumer with the same name
    /// replaces the first.
    fn name(&self) -> &'static str;

    fn update_cluster_info(&self, info: Arc<ClusterInfo>);
}

/// Why a bootstrap did not produce cluster info, while still letting the scrape go on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedReason {
    BootstrapTimeout,
    FetchFailed(String),
}

/// Result of [`MetadataRetriever::run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Cluster info is known.
    Ready,
    /// Not known yet. Consumers fall back to their defaults until a later refresh succeeds.
    Degraded(DegradedReason),
    /// The retriever cannot serve this target; the scrape must fail.
    Fatal(RetrieverError),
}

#[async_trait]
pub trait MetadataRetriever: Send + Sync {
    /// Start the background refresh on first call, then wait for the first fetch to resolve
    /// for at most the bootstrap window. Later calls return the current state, triggering an
    /// immediate refresh if the last one did not succeed.
    async fn run(&self) -> RunOutcome;

    fn register_consumer(&self, consumer: Arc<dyn Consumer>) -> Result<(), RetrieverError>;

    /// Remove `consumer` if it is still the one registered under its name.
    fn unregister_consumer(&self, consumer: &Arc<dyn Consumer>);

    /// The retriever's own metrics, for registration on a scrape registry.
    fn collector(self: Arc<Self>) -> Arc<dyn Collector>;
}

/// Hands out the retriever responsible for a target.
pub trait RetrieverProvider: Send + Sync {
    fn retriever(&self, target: &Url) -> Arc<dyn MetadataRetriever>;

    /// Forget `failed` if it is still the retriever cached for `target`. It stops once its last
    /// user drops it, and the next lookup starts a fresh one.
    fn invalidate(&self, target: &Url, failed: &Arc<dyn MetadataRetriever>);
}

/// Whether two handles point to the same allocation, ignoring trait object metadata.
pub(crate) fn same_allocation<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}
