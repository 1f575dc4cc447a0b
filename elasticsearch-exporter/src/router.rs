use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use common_metrics::{render, track_metrics, DefaultGatherer, Gatherers};
use serde::Deserialize;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::scrape::Scraper;

#[derive(Clone)]
pub struct AppState {
    pub scraper: Arc<Scraper>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScrapeParams {
    pub target: Option<String>,
}

async fn healthz() -> &'static str {
    "OK"
}

fn landing_page(telemetry_path: &str) -> String {
    format!(
        "<html>\n\
         <head><title>Elasticsearch Exporter</title></head>\n\
         <body>\n\
         <h1>Elasticsearch Exporter</h1>\n\
         <p><a href=\"{telemetry_path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n"
    )
}

async fn metrics(
    State(state): State<AppState>,
    Query(params): Query<ScrapeParams>,
    headers: HeaderMap,
) -> Response {
    match state.scraper.scrape(params.target.as_deref()).await {
        Ok(registry) => {
            let gatherers = Gatherers::new().with(&DefaultGatherer).with(&registry);
            render(&gatherers, &headers)
        }
        Err(err) => err.into_response(),
    }
}

pub fn router(scraper: Arc<Scraper>, telemetry_path: &str) -> Router {
    let telemetry_path = if telemetry_path.starts_with('/') {
        telemetry_path.to_owned()
    } else {
        format!("/{telemetry_path}")
    };

    let state = AppState { scraper };

    let mut router = Router::new()
        .route(&telemetry_path, get(metrics).post(metrics))
        .route("/healthz", get(healthz));

    if telemetry_path != "/" {
        let page = landing_page(&telemetry_path);
        router = router.route("/", get(move || async move { Html(page) }));
    }

    router
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state)
}
