use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common_metrics::get_current_timestamp_seconds;
use prometheus::{GaugeVec, Opts};
use reqwest::Client;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{same_allocation, ClusterInfo, Consumer, DegradedReason, MetadataRetriever, RunOutcome};
use crate::client::{endpoint, fetch_json, redacted};
use crate::collector::{Collector, NAMESPACE};
use crate::error::RetrieverError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    NotStarted,
    BootstrapPending,
    Ready,
    TimedOut,
    Failed { fatal: bool, reason: String },
}

#[derive(Debug, Clone)]
struct Status {
    /// Completed fetches, successful or not.
    attempts: u64,
    phase: Phase,
}

#[derive(Default)]
struct Snapshot {
    latest: Option<Arc<ClusterInfo>>,
    up: bool,
    last_success: Option<f64>,
    last_failure: Option<f64>,
}

struct Inner {
    client: Client,
    url: Url,
    display: String,
    interval: Duration,
    bootstrap_timeout: Duration,
    token: CancellationToken,
    started: AtomicBool,
    status: watch::Sender<Status>,
    refresh_now: Notify,
    snapshot: RwLock<Snapshot>,
    consumers: RwLock<HashMap<&'static str, Arc<dyn Consumer>>>,
}

/// Polls the root endpoint of one Elasticsearch target until its token is cancelled or the
/// last handle is dropped.
pub struct Retriever {
    inner: Arc<Inner>,
}

impl Drop for Retriever {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Retriever {
    pub fn new(
        client: Client,
        url: Url,
        interval: Duration,
        bootstrap_timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(Status {
            attempts: 0,
            phase: Phase::NotStarted,
        });

        Self {
            inner: Arc::new(Inner {
                client,
                display: redacted(&url),
                url,
                interval,
                bootstrap_timeout,
                token,
                started: AtomicBool::new(false),
                status,
                refresh_now: Notify::new(),
                snapshot: RwLock::new(Snapshot::default()),
                consumers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Stop the refresh loop. Further `run` calls and consumer registrations fail.
    pub fn shutdown(&self) {
        self.inner.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    fn stopped(&self) -> RetrieverError {
        RetrieverError::Stopped(self.inner.display.clone())
    }

    fn outcome(&self, phase: &Phase) -> RunOutcome {
        match phase {
            Phase::Ready => RunOutcome::Ready,
            Phase::Failed { fatal: true, reason } => {
                RunOutcome::Fatal(RetrieverError::InvalidResponse(reason.clone()))
            }
            Phase::Failed { fatal: false, reason } => {
                if self.inner.latest().is_some() {
                    RunOutcome::Ready
                } else {
                    RunOutcome::Degraded(DegradedReason::FetchFailed(reason.clone()))
                }
            }
            Phase::NotStarted | Phase::BootstrapPending | Phase::TimedOut => {
                RunOutcome::Degraded(DegradedReason::BootstrapTimeout)
            }
        }
    }
}

impl Inner {
    fn latest(&self) -> Option<Arc<ClusterInfo>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }

    async fn refresh_loop(self: Arc<Self>) {
        debug!(url = %self.display, "starting cluster info retriever");

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = self.refresh() => {}
            }

            let tick = async {
                if self.interval.is_zero() {
                    future::pending::<()>().await
                } else {
                    tokio::time::sleep(self.interval).await
                }
            };

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = self.refresh_now.notified() => {}
                _ = tick => {}
            }
        }

        debug!(url = %self.display, "cluster info retriever stopped");
    }

    async fn refresh(&self) {
        match fetch_json::<ClusterInfo>(&self.client, endpoint(&self.url, "/")).await {
            Ok(info) => {
                let info = Arc::new(info);
                {
                    let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
                    snapshot.latest = Some(info.clone());
                    snapshot.up = true;
                    snapshot.last_success = Some(get_current_timestamp_seconds());
                }

                let consumers: Vec<Arc<dyn Consumer>> = self
                    .consumers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .cloned()
                    .collect();
                for consumer in consumers {
                    consumer.update_cluster_info(info.clone());
                }

                debug!(url = %self.display, cluster = %info.cluster_name, "retrieved cluster info");
                self.status.send_modify(|status| {
                    status.attempts += 1;
                    status.phase = Phase::Ready;
                });
            }
            Err(err) => {
                warn!(url = %self.display, error = %err, "failed to retrieve cluster info");
                {
                    let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
                    snapshot.up = false;
                    snapshot.last_failure = Some(get_current_timestamp_seconds());
                }

                let phase = Phase::Failed {
                    fatal: err.is_decode(),
                    reason: err.to_string(),
                };
                self.status.send_modify(|status| {
                    status.attempts += 1;
                    status.phase = phase;
                });
            }
        }
    }
}

#[async_trait]
impl MetadataRetriever for Retriever {
    async fn run(&self) -> RunOutcome {
        let inner = &self.inner;
        if inner.token.is_cancelled() {
            return RunOutcome::Fatal(self.stopped());
        }

        let mut status = inner.status.subscribe();

        let seen = if !inner.started.swap(true, Ordering::SeqCst) {
            info!(url = %inner.display, timeout_ms = inner.bootstrap_timeout.as_millis() as u64, "bootstrapping cluster info retriever");
            inner
                .status
                .send_modify(|status| status.phase = Phase::BootstrapPending);
            tokio::spawn(inner.clone().refresh_loop());
            0
        } else {
            let current = status.borrow().clone();
            match current.phase {
                Phase::Ready | Phase::Failed { fatal: true, .. } => {
                    return self.outcome(&current.phase)
                }
                Phase::Failed { fatal: false, .. } | Phase::TimedOut => {
                    inner.refresh_now.notify_one()
                }
                Phase::NotStarted | Phase::BootstrapPending => {}
            }
            current.attempts
        };

        let wait = async {
            status
                .wait_for(|status| status.attempts > seen)
                .await
                .map(|_| ())
        };

        let waited = tokio::select! {
            _ = inner.token.cancelled() => return RunOutcome::Fatal(self.stopped()),
            waited = tokio::time::timeout(inner.bootstrap_timeout, wait) => waited,
        };

        if waited.is_err() {
            inner.status.send_if_modified(|status| {
                if status.phase == Phase::BootstrapPending {
                    status.phase = Phase::TimedOut;
                    true
                } else {
                    false
                }
            });
        }

        let phase = inner.status.borrow().phase.clone();
        self.outcome(&phase)
    }

    fn register_consumer(&self, consumer: Arc<dyn Consumer>) -> Result<(), RetrieverError> {
        let inner = &self.inner;
        if inner.token.is_cancelled() {
            return Err(self.stopped());
        }

        inner
            .consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(consumer.name(), consumer.clone());

        if let Some(info) = inner.latest() {
            consumer.update_cluster_info(info);
        }
        Ok(())
    }

    fn unregister_consumer(&self, consumer: &Arc<dyn Consumer>) {
        let mut consumers = self
            .inner
            .consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let current = consumers
            .get(consumer.name())
            .is_some_and(|registered| same_allocation(registered, consumer));
        if current {
            consumers.remove(consumer.name());
        }
    }

    fn collector(self: Arc<Self>) -> Arc<dyn Collector> {
        Arc::new(ClusterInfoMetrics::new(self.inner.clone()))
    }
}

fn clusterinfo_gauge_vec(name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    GaugeVec::new(
        Opts::new(name, help).namespace(NAMESPACE).subsystem("clusterinfo"),
        labels,
    )
    .expect("static gauge vector definition is valid")
}

/// The retriever's health as seen by one scrape.
struct ClusterInfoMetrics {
    inner: Arc<Inner>,
    up: GaugeVec,
    last_success: GaugeVec,
    last_failure: GaugeVec,
    version_info: GaugeVec,
}

impl ClusterInfoMetrics {
    fn new(inner: Arc<Inner>) -> Self {
        Self {
            inner,
            up: clusterinfo_gauge_vec(
                "up",
                "Up metric for the cluster info collector",
                &["url"],
            ),
            last_success: clusterinfo_gauge_vec(
                "last_retrieval_success_ts",
                "Timestamp of the last successful cluster info retrieval",
                &["url"],
            ),
            last_failure: clusterinfo_gauge_vec(
                "last_retrieval_failure_ts",
                "Timestamp of the last failed cluster info retrieval",
                &["url"],
            ),
            version_info: clusterinfo_gauge_vec(
                "version_info",
                "Constant metric with ES version information as labels",
                &[
                    "cluster",
                    "cluster_uuid",
                    "build_date",
                    "build_hash",
                    "version",
                    "lucene_version",
                ],
            ),
        }
    }
}

#[async_trait]
impl Collector for ClusterInfoMetrics {
    fn name(&self) -> &'static str {
        "clusterinfo"
    }

    fn register_metrics(&self, registry: &prometheus::Registry) -> prometheus::Result<()> {
        for gauge in [
            &self.up,
            &self.last_success,
            &self.last_failure,
            &self.version_info,
        ] {
            registry.register(Box::new(gauge.clone()))?;
        }
        Ok(())
    }

    async fn collect(&self) {
        let url = self.inner.display.as_str();
        let snapshot = self
            .inner
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        self.up
            .with_label_values(&[url])
            .set(if snapshot.up { 1.0 } else { 0.0 });
        if let Some(ts) = snapshot.last_success {
            self.last_success.with_label_values(&[url]).set(ts);
        }
        if let Some(ts) = snapshot.last_failure {
            self.last_failure.with_label_values(&[url]).set(ts);
        }
        if let Some(info) = &snapshot.latest {
            self.version_info
                .with_label_values(&[
                    info.cluster_name.as_str(),
                    info.cluster_uuid.as_str(),
                    info.version.build_date.as_str(),
                    info.version.build_hash.as_str(),
                    info.version.number.as_str(),
                    info.version.lucene_version.as_str(),
                ])
                .set(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::test_utils::{gather_text, test_client};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Consumer for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn update_cluster_info(&self, info: Arc<ClusterInfo>) {
            self.0.lock().unwrap().push(info.cluster_name.clone());
        }
    }

    fn root_body(cluster: &str) -> serde_json::Value {
        json!({
            "name": "es-0",
            "cluster_name": cluster,
            "cluster_uuid": "uuid-1",
            "version": {
                "number": "8.11.0",
                "build_hash": "abc",
                "build_date": "2023-11-04",
                "lucene_version": "9.8.0"
            }
        })
    }

    fn retriever_for(server: &MockServer, bootstrap_timeout: Duration) -> Arc<Retriever> {
        Arc::new(Retriever::new(
            test_client(),
            Url::parse(&server.base_url()).unwrap(),
            Duration::ZERO,
            bootstrap_timeout,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn ready_after_first_fetch_and_pushes_to_consumers() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).json_body(root_body("prod"));
            })
            .await;

        let retriever = retriever_for(&server, Duration::from_secs(5));
        let early = Arc::new(Recorder::default());
        retriever.register_consumer(early.clone()).unwrap();

        assert!(matches!(retriever.run().await, RunOutcome::Ready));
        assert_eq!(*early.0.lock().unwrap(), vec!["prod".to_owned()]);

        // Late consumers get the current snapshot immediately.
        let late = Arc::new(Recorder::default());
        retriever.register_consumer(late.clone()).unwrap();
        assert_eq!(*late.0.lock().unwrap(), vec!["prod".to_owned()]);

        // Already ready: no new fetch needed.
        assert!(matches!(retriever.run().await, RunOutcome::Ready));
        retriever.shutdown();
    }

    #[tokio::test]
    async fn slow_cluster_degrades_after_bootstrap_window() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200)
                    .delay(Duration::from_secs(2))
                    .json_body(root_body("prod"));
            })
            .await;

        let retriever = retriever_for(&server, Duration::from_millis(100));
        let outcome = retriever.run().await;

        assert!(matches!(
            outcome,
            RunOutcome::Degraded(DegradedReason::BootstrapTimeout)
        ));
        retriever.shutdown();
    }

    #[tokio::test]
    async fn unavailable_cluster_degrades_then_recovers() {
        let server = MockServer::start_async().await;
        let unavailable = server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(503);
            })
            .await;

        let retriever = retriever_for(&server, Duration::from_secs(5));
        assert!(matches!(
            retriever.run().await,
            RunOutcome::Degraded(DegradedReason::FetchFailed(_))
        ));

        unavailable.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).json_body(root_body("prod"));
            })
            .await;

        assert!(matches!(retriever.run().await, RunOutcome::Ready));
        retriever.shutdown();
    }

    #[tokio::test]
    async fn undecodable_root_is_fatal() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).body("this is not elasticsearch");
            })
            .await;

        let retriever = retriever_for(&server, Duration::from_secs(5));
        assert!(matches!(
            retriever.run().await,
            RunOutcome::Fatal(RetrieverError::InvalidResponse(_))
        ));
        assert!(matches!(retriever.run().await, RunOutcome::Fatal(_)));
        retriever.shutdown();
    }

    #[tokio::test]
    async fn stopped_retriever_refuses_work() {
        let server = MockServer::start_async().await;
        let retriever = retriever_for(&server, Duration::from_secs(5));
        retriever.shutdown();

        assert!(matches!(
            retriever.run().await,
            RunOutcome::Fatal(RetrieverError::Stopped(_))
        ));
        assert!(retriever
            .register_consumer(Arc::new(Recorder::default()))
            .is_err());
    }

    #[tokio::test]
    async fn unregistering_a_replaced_consumer_keeps_the_current_one() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).json_body(root_body("prod"));
            })
            .await;

        let retriever = retriever_for(&server, Duration::from_secs(5));
        let replaced = Arc::new(Recorder::default());
        let current = Arc::new(Recorder::default());
        retriever.register_consumer(replaced.clone()).unwrap();
        retriever.register_consumer(current.clone()).unwrap();

        let stale: Arc<dyn Consumer> = replaced.clone();
        retriever.unregister_consumer(&stale);

        assert!(matches!(retriever.run().await, RunOutcome::Ready));
        assert!(replaced.0.lock().unwrap().is_empty());
        assert_eq!(*current.0.lock().unwrap(), vec!["prod".to_owned()]);

        let current: Arc<dyn Consumer> = current;
        retriever.unregister_consumer(&current);
        assert!(retriever.inner.consumers.read().unwrap().is_empty());
        retriever.shutdown();
    }

    #[tokio::test]
    async fn dropping_the_last_handle_stops_the_refresh_loop() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).json_body(root_body("prod"));
            })
            .await;

        let token = CancellationToken::new();
        let retriever = Arc::new(Retriever::new(
            test_client(),
            Url::parse(&server.base_url()).unwrap(),
            Duration::ZERO,
            Duration::from_secs(5),
            token.clone(),
        ));
        assert!(matches!(retriever.run().await, RunOutcome::Ready));

        let in_use = retriever.clone();
        drop(retriever);
        assert!(!token.is_cancelled());

        drop(in_use);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn exposes_health_and_version_info() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).json_body(root_body("prod"));
            })
            .await;

        let retriever = retriever_for(&server, Duration::from_secs(5));
        assert!(matches!(retriever.run().await, RunOutcome::Ready));

        let text = gather_text(retriever.clone().collector().as_ref()).await;
        let url = Url::parse(&server.base_url()).unwrap();

        assert!(text.contains(&format!("elasticsearch_clusterinfo_up{{url=\"{url}\"}} 1")));
        assert!(text.contains("elasticsearch_clusterinfo_last_retrieval_success_ts{"));
        assert!(!text.contains("elasticsearch_clusterinfo_last_retrieval_failure_ts{"));
        assert!(text.contains(
            "elasticsearch_clusterinfo_version_info{build_date=\"2023-11-04\",build_hash=\"abc\",cluster=\"prod\",cluster_uuid=\"uuid-1\",lucene_version=\"9.8.0\",version=\"8.11.0\"} 1"
        ));
        retriever.shutdown();
    }
}
