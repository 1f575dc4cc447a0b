//! Merging metric sources and rendering them for a scrape.
//!
//! A [`Gatherer`] is anything that can produce metric families on demand. Several gatherers
//! can be read together through [`Gatherers`], which merges families sharing a name so a
//! response never carries the same family twice. [`render`] encodes the merged result in the
//! format requested by the client's `Accept` header.

use std::collections::BTreeMap;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, ProtobufEncoder, TextEncoder};
use tracing::{error, warn};

pub trait Gatherer {
    fn gather(&self) -> Vec<MetricFamily>;
}

impl Gatherer for prometheus::Registry {
    fn gather(&self) -> Vec<MetricFamily> {
        prometheus::Registry::gather(self)
    }
}

/// The process-wide registry the `prometheus` crate registers into by default.
pub struct DefaultGatherer;

impl Gatherer for DefaultGatherer {
    fn gather(&self) -> Vec<MetricFamily> {
        prometheus::gather()
    }
}

/// Read-only union of several gatherers.
#[derive(Default)]
pub struct Gatherers<'a>(Vec<&'a dyn Gatherer>);

impl<'a> Gatherers<'a> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, gatherer: &'a dyn Gatherer) -> Self {
        self.0.push(gatherer);
        self
    }
}

impl Gatherer for Gatherers<'_> {
    fn gather(&self) -> Vec<MetricFamily> {
        let mut merged: BTreeMap<String, MetricFamily> = BTreeMap::new();

        for gatherer in &self.0 {
            for mut family in gatherer.gather() {
                match merged.get_mut(family.get_name()) {
                    Some(existing) if existing.get_field_type() == family.get_field_type() => {
                        for metric in family.take_metric().into_iter() {
                            existing.mut_metric().push(metric);
                        }
                    }
                    Some(_) => {
                        warn!(
                            family = family.get_name(),
                            "dropping metric family gathered with a conflicting type"
                        );
                    }
                    None => {
                        merged.insert(family.get_name().to_owned(), family);
                    }
                }
            }
        }

        merged.into_values().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Protobuf,
}

impl Format {
    /// Picks the exposition format from an `Accept` header. Only the delimited protobuf
    /// encoding of `io.prometheus.client.MetricFamily` is honoured; anything else gets text.
    pub fn negotiate(headers: &HeaderMap) -> Self {
        let accepts_protobuf = headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|candidate| {
                let candidate = candidate.trim();
                candidate.starts_with("application/vnd.google.protobuf")
                    && candidate.contains("proto=io.prometheus.client.MetricFamily")
                    && candidate.contains("encoding=delimited")
            });

        if accepts_protobuf {
            Format::Protobuf
        } else {
            Format::Text
        }
    }
}

fn encode<E: Encoder>(encoder: E, families: &[MetricFamily]) -> Response {
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(families, &mut buffer) {
        error!(error = %err, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    match HeaderValue::from_str(encoder.format_type()) {
        Ok(content_type) => ([(header::CONTENT_TYPE, content_type)], buffer).into_response(),
        Err(_) => buffer.into_response(),
    }
}

/// Gathers from `gatherer` and encodes the result according to the request headers.
pub fn render(gatherer: &dyn Gatherer, headers: &HeaderMap) -> Response {
    let families = gatherer.gather();

    match Format::negotiate(headers) {
        Format::Text => encode(TextEncoder::new(), &families),
        Format::Protobuf => encode(ProtobufEncoder::new(), &families),
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use prometheus::{IntCounterVec, Opts, Registry};

    use super::*;

    fn registry_with(value: &str) -> Registry {
        let registry = Registry::new();
        let counter =
            IntCounterVec::new(Opts::new("widgets_total", "Widgets seen."), &["source"]).unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.with_label_values(&[value]).inc();
        registry
    }

    #[test]
    fn merges_families_with_the_same_name() {
        let first = registry_with("first");
        let second = registry_with("second");

        let families = Gatherers::new().with(&first).with(&second).gather();

        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "widgets_total");
        assert_eq!(families[0].get_metric().len(), 2);
    }

    #[test]
    fn negotiates_protobuf_only_when_delimited() {
        let mut headers = HeaderMap::new();
        assert_eq!(Format::negotiate(&headers), Format::Text);

        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=text"),
        );
        assert_eq!(Format::negotiate(&headers), Format::Text);

        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited;q=0.7,text/plain;version=0.0.4;q=0.3"),
        );
        assert_eq!(Format::negotiate(&headers), Format::Protobuf);
    }

    #[tokio::test]
    async fn renders_text_with_content_type() {
        let registry = registry_with("only");

        let response = render(&registry, &HeaderMap::new());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("widgets_total{source=\"only\"} 1"));
    }
}
