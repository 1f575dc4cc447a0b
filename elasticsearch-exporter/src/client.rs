use std::path::Path;
use std::time::Duration;

use reqwest::{Certificate, Client, Identity};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::TlsConfig;
use crate::error::{ClientError, FetchError};

const USER_AGENT: &str = concat!("elasticsearch-exporter/", env!("CARGO_PKG_VERSION"));

fn read_pem(path: &Path) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|source| ClientError::Read {
        path: path.to_owned(),
        source,
    })
}

/// Build the client used for every request to Elasticsearch. Proxies are taken from the
/// environment. Without any TLS material the client falls back to the system roots.
pub fn build_http_client(tls: &TlsConfig, timeout: Duration) -> Result<Client, ClientError> {
    let mut builder = Client::builder().user_agent(USER_AGENT).timeout(timeout);

    if let Some(ca) = &tls.ca {
        let pem = read_pem(ca)?;
        let certificate = Certificate::from_pem(&pem).map_err(|source| ClientError::Certificate {
            path: ca.to_owned(),
            source,
        })?;
        builder = builder.add_root_certificate(certificate);
    }

    match (&tls.client_cert, &tls.client_private_key) {
        (Some(cert), Some(key)) => {
            let mut pem = read_pem(cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(key)?);
            let identity = Identity::from_pem(&pem).map_err(ClientError::Identity)?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => return Err(ClientError::IncompleteIdentity),
    }

    if tls.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(ClientError::Build)
}

/// Resolve an API path against the node URL, keeping any path prefix the node is served under.
pub fn endpoint(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    url
}

/// Render a URL for labels and logs, hiding any password it carries.
pub fn redacted(url: &Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut url = url.clone();
    // Only fails for URLs that cannot carry credentials, which already have none.
    let _ = url.set_password(Some("xxxxx"));
    url.to_string()
}

/// GET a JSON document from Elasticsearch. Credentials embedded in the URL are sent as basic auth.
pub async fn fetch_json<T: DeserializeOwned>(client: &Client, url: Url) -> Result<T, FetchError> {
    let display = redacted(&url);

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| FetchError::Request {
            url: display.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: display,
            status,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|source| FetchError::Request {
            url: display.clone(),
            source,
        })?;

    serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
        url: display,
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use httpmock::prelude::*;
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn endpoint_keeps_path_prefix() {
        let base = Url::parse("https://es.internal/proxy/es/?pretty").unwrap();
        assert_eq!(
            endpoint(&base, "/_cluster/health").as_str(),
            "https://es.internal/proxy/es/_cluster/health"
        );

        let bare = Url::parse("http://localhost:9200").unwrap();
        assert_eq!(
            endpoint(&bare, "_nodes/_local/stats").as_str(),
            "http://localhost:9200/_nodes/_local/stats"
        );
    }

    #[test]
    fn redacts_passwords_only() {
        let with_secret = Url::parse("http://elastic:changeme@es:9200/").unwrap();
        assert_eq!(redacted(&with_secret), "http://elastic:xxxxx@es:9200/");

        let plain = Url::parse("http://es:9200/").unwrap();
        assert_eq!(redacted(&plain), "http://es:9200/");
    }

    #[test]
    fn identity_needs_cert_and_key() {
        let tls = TlsConfig {
            client_cert: Some(PathBuf::from("/does/not/matter.pem")),
            ..Default::default()
        };
        assert!(matches!(
            build_http_client(&tls, Duration::from_secs(1)),
            Err(ClientError::IncompleteIdentity)
        ));
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let tls = TlsConfig {
            ca: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        assert!(matches!(
            build_http_client(&tls, Duration::from_secs(1)),
            Err(ClientError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn fetch_json_classifies_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ok");
                then.status(200).json_body(json!({"status": "green"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/garbage");
                then.status(200).body("<html>not elasticsearch</html>");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        let client = build_http_client(&TlsConfig::default(), Duration::from_secs(5)).unwrap();
        let base = Url::parse(&server.base_url()).unwrap();

        let ok: Value = fetch_json(&client, endpoint(&base, "/ok")).await.unwrap();
        assert_eq!(ok["status"], "green");

        let garbage = fetch_json::<Value>(&client, endpoint(&base, "/garbage"))
            .await
            .unwrap_err();
        assert!(garbage.is_decode());

        let missing = fetch_json::<Value>(&client, endpoint(&base, "/missing"))
            .await
            .unwrap_err();
        assert!(matches!(missing, FetchError::Status { .. }));
    }
}
