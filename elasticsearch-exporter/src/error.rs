use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// The scrape target could not be turned into a usable Elasticsearch URL.
#[derive(Error, Debug)]
pub enum TargetParseError {
    #[error("failed to parse es.uri or target: {0}")]
    Malformed(#[from] url::ParseError),
    #[error("failed to parse es.uri or target: unsupported scheme {0:?}")]
    UnsupportedScheme(String),
}

/// Failure of a single request against the Elasticsearch HTTP API.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("{url} answered with HTTP status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },
}

impl FetchError {
    /// A body that reached us but is not what the endpoint should return. Retrying the
    /// same endpoint will not help.
    pub fn is_decode(&self) -> bool {
        matches!(self, FetchError::Decode { .. })
    }
}

/// Enumeration of errors returned by the cluster info retriever.
#[derive(Error, Debug, Clone)]
pub enum RetrieverError {
    #[error("cluster info retriever for {0} has been shut down")]
    Stopped(String),
    #[error("invalid cluster info response: {0}")]
    InvalidResponse(String),
}

/// Enumeration of errors that abort a scrape. Nothing is rendered but the error message.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error(transparent)]
    Target(#[from] TargetParseError),
    #[error("failed to run cluster info retriever: {0}")]
    RetrieverFatal(RetrieverError),
    #[error("failed to register {consumer} collector in cluster info: {source}")]
    ConsumerRegistration {
        consumer: &'static str,
        source: RetrieverError,
    },
    #[error("failed to register {collector} collector: {source}")]
    CollectorRegistration {
        collector: &'static str,
        source: prometheus::Error,
    },
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        match self {
            ScrapeError::Target(_) => (StatusCode::BAD_REQUEST, self.to_string()),

            ScrapeError::RetrieverFatal(_)
            | ScrapeError::ConsumerRegistration { .. }
            | ScrapeError::CollectorRegistration { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        }
        .into_response()
    }
}

/// Errors raised while building the outbound HTTP client from TLS material.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid CA certificate in {path}: {source}")]
    Certificate {
        path: PathBuf,
        source: reqwest::Error,
    },
    #[error("invalid client certificate or private key: {0}")]
    Identity(reqwest::Error),
    #[error("a client certificate and a private key must be configured together")]
    IncompleteIdentity,
    #[error("failed to build HTTP client: {0}")]
    Build(reqwest::Error),
}

/// Errors that end the process with a non-zero status.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to create elasticsearch HTTP client: {0}")]
    Client(#[from] ClientError),
    #[error("invalid ES_URI: {0}")]
    DefaultTarget(#[from] TargetParseError),
    #[error("failed to install {name} handler: {source}")]
    Signal {
        name: &'static str,
        source: std::io::Error,
    },
    #[error("http server quit: {0}")]
    Serve(std::io::Error),
    #[error("http server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_errors_are_client_errors() {
        let err: ScrapeError = TargetParseError::UnsupportedScheme("ftp".to_owned()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn signal_errors_name_the_signal() {
        let err = LifecycleError::Signal {
            name: "SIGTERM",
            source: std::io::Error::other("not supported"),
        };
        assert_eq!(
            err.to_string(),
            "failed to install SIGTERM handler: not supported"
        );
    }

    #[test]
    fn retriever_errors_are_server_errors() {
        let fatal = ScrapeError::RetrieverFatal(RetrieverError::Stopped("http://es:9200/".into()));
        assert_eq!(
            fatal.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let consumer = ScrapeError::ConsumerRegistration {
            consumer: "indices",
            source: RetrieverError::Stopped("http://es:9200/".into()),
        };
        assert_eq!(
            consumer.to_string(),
            "failed to register indices collector in cluster info: cluster info retriever for http://es:9200/ has been shut down"
        );
        assert_eq!(
            consumer.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
