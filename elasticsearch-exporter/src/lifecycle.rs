use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::build_http_client;
use crate::clusterinfo::RetrieverCache;
use crate::config::Config;
use crate::error::LifecycleError;
use crate::router::router;
use crate::scrape::Scraper;

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, LifecycleError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| LifecycleError::Bind { addr, source })
}

/// Serve scrapes on `listener` until `shutdown` resolves, then drain in-flight requests for at
/// most the configured shutdown timeout. Background retrievers are stopped on every exit path.
pub async fn run<F>(config: Config, listener: TcpListener, shutdown: F) -> Result<(), LifecycleError>
where
    F: Future<Output = ()> + Send,
{
    let client = build_http_client(&config.tls, config.es.timeout.0)?;

    let root = CancellationToken::new();
    let retrievers = Arc::new(RetrieverCache::new(
        client.clone(),
        &config.clusterinfo,
        root.clone(),
    ));
    let scraper = Arc::new(Scraper::new(config.es.clone(), client, retrievers));
    scraper.resolve_target(None)?;
    let app = router(scraper, &config.telemetry_path);

    match listener.local_addr() {
        Ok(addr) => info!(address = %addr, path = %config.telemetry_path, "listening"),
        Err(err) => warn!(error = %err, "listening on an unknown address"),
    }

    let drain = CancellationToken::new();
    let server_drain = drain.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_drain.cancelled().await })
            .await
    });

    let result = tokio::select! {
        joined = &mut server => match joined {
            Ok(Ok(())) => Err(LifecycleError::Serve(io::Error::other("http server stopped unexpectedly"))),
            Ok(Err(err)) => Err(LifecycleError::Serve(err)),
            Err(err) => Err(LifecycleError::Join(err)),
        },
        _ = shutdown => {
            info!("shutting down gracefully");
            drain.cancel();

            match tokio::time::timeout(config.shutdown_timeout.0, &mut server).await {
                Ok(Ok(Ok(()))) => info!("http server stopped"),
                Ok(Ok(Err(err))) => error!(error = %err, "http server failed while draining"),
                Ok(Err(err)) => error!(error = %err, "http server task failed while draining"),
                Err(_) => {
                    warn!(
                        timeout_ms = config.shutdown_timeout.0.as_millis() as u64,
                        "graceful shutdown deadline exceeded, dropping in-flight requests"
                    );
                    server.abort();
                    if let Err(err) = server.await {
                        if !err.is_cancelled() {
                            error!(error = %err, "http server task failed while aborting");
                        }
                    }
                }
            }
            Ok(())
        }
    };

    root.cancel();
    result
}

/// Install SIGTERM and SIGINT handlers. The returned future resolves on the first of either.
pub fn shutdown_signal() -> Result<impl Future<Output = ()> + Send, LifecycleError> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|source| LifecycleError::Signal { name: "SIGTERM", source })?;

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|source| LifecycleError::Signal { name: "SIGINT", source })?;

    Ok(async move {
        tokio::select! {
            _ = term.recv() => info!("received SIGTERM"),
            _ = interrupt.recv() => info!("received SIGINT"),
        };
    })
}

#[cfg(test)]
mod tests {
    use tokio::time::{timeout, Duration};

    use super::*;

    #[tokio::test]
    async fn shutdown_signal_waits_for_a_signal() {
        let signal = shutdown_signal().unwrap();
        let result = timeout(Duration::from_millis(100), signal).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn bind_reports_address_in_use() {
        let taken = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = taken.local_addr().unwrap();

        let err = bind(addr).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Bind { addr: failed, .. } if failed == addr));
    }
}
