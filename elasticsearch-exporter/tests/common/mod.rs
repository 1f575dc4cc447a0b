#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use envconfig::Envconfig;
use httpmock::prelude::*;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use elasticsearch_exporter::config::Config;
use elasticsearch_exporter::error::LifecycleError;
use elasticsearch_exporter::lifecycle;

/// Test configuration pointing at `es_uri`, with short timeouts and extra overrides.
pub fn config_for(es_uri: &str, overrides: &[(&str, &str)]) -> Config {
    let mut env = HashMap::from([
        ("WEB_LISTEN_ADDRESS".to_owned(), "127.0.0.1:0".to_owned()),
        ("ES_URI".to_owned(), es_uri.to_owned()),
        ("ES_TIMEOUT_MS".to_owned(), "2000".to_owned()),
        ("ES_CLUSTERINFO_BOOTSTRAP_TIMEOUT_MS".to_owned(), "1000".to_owned()),
        ("ES_CLUSTERINFO_INTERVAL_MS".to_owned(), "0".to_owned()),
        ("SHUTDOWN_TIMEOUT_MS".to_owned(), "500".to_owned()),
    ]);
    for (key, value) in overrides {
        env.insert((*key).to_owned(), (*value).to_owned());
    }
    Config::init_from_hashmap(&env).unwrap()
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<Result<(), LifecycleError>>>,
}

impl ServerHandle {
    pub async fn for_config(config: Config) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        let task = tokio::spawn(async move {
            lifecycle::run(config, listener, async move { notify.notified().await }).await
        });
        ServerHandle {
            addr,
            shutdown,
            task: Some(task),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn scrape(&self, target: Option<&str>) -> reqwest::Response {
        let mut request = reqwest::Client::new().get(self.url("/metrics"));
        if let Some(target) = target {
            request = request.query(&[("target", target)]);
        }
        request.send().await.expect("failed to send scrape request")
    }

    /// Signal shutdown and wait for the lifecycle to return.
    pub async fn stop(mut self) -> Result<(), LifecycleError> {
        self.shutdown.notify_one();
        let task = self.task.take().expect("server already stopped");
        task.await.expect("lifecycle task panicked")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}

/// Mock the endpoints scraped with default flags, plus index stats, for one cluster.
pub async fn mock_elasticsearch(server: &MockServer, cluster: &str) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200).json_body(json!({
                "name": format!("{cluster}-node"),
                "cluster_name": cluster,
                "cluster_uuid": format!("{cluster}-uuid"),
                "version": {
                    "number": "8.11.0",
                    "build_hash": "abc",
                    "build_date": "2023-11-04",
                    "lucene_version": "9.8.0"
                }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/_cluster/health");
            then.status(200).json_body(json!({
                "cluster_name": cluster,
                "status": "green",
                "number_of_nodes": 1,
                "number_of_data_nodes": 1
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/_nodes/_local/stats");
            then.status(200).json_body(json!({
                "cluster_name": cluster,
                "nodes": {
                    "n1": {
                        "name": format!("{cluster}-node"),
                        "host": "127.0.0.1",
                        "roles": ["master", "data"],
                        "indices": {"docs": {"count": 3}}
                    }
                }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/_all/_stats");
            then.status(200).json_body(json!({
                "indices": {
                    "events": {
                        "primaries": {"docs": {"count": 3}},
                        "total": {"docs": {"count": 6}},
                        "shards": {
                            "0": [{"routing": {"node": "n1", "primary": true}, "docs": {"count": 3}}]
                        }
                    }
                }
            }));
        })
        .await;
}

/// Metric series of a text exposition, without values, restricted to the exporter's own families.
pub fn series(text: &str) -> Vec<String> {
    let mut series: Vec<String> = text
        .lines()
        .filter(|line| line.starts_with("elasticsearch_"))
        .filter_map(|line| line.rsplit_once(' ').map(|(series, _)| series.to_owned()))
        .collect();
    series.sort();
    series
}
