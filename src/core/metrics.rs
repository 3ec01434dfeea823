// Prometheus counters exposed on /metrics

use std::sync::OnceLock;

use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::core::errors::AegisError;

struct AppMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    logins_total: IntCounterVec,
}

impl AppMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("aegis_http_requests_total", "HTTP requests by method and status"),
            &["method", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "aegis_http_request_duration_seconds",
                "HTTP request latency by method",
            )
            .buckets(vec![0.005, 0.025, 0.1, 0.25, 1.0, 5.0]),
            &["method"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let logins_total = IntCounterVec::new(
            Opts::new("aegis_logins_total", "Login attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(logins_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            logins_total,
        })
    }
}

/// Registration only fails on duplicate metric names; a failure here is
/// logged once and metrics become no-ops.
fn inner() -> Option<&'static AppMetrics> {
    static METRICS: OnceLock<Option<AppMetrics>> = OnceLock::new();
    METRICS
        .get_or_init(|| match AppMetrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::error!(error = %e, "metrics registration failed");
                None
            }
        })
        .as_ref()
}

pub fn record_request(method: &str, status: u16, seconds: f64) {
    if let Some(metrics) = inner() {
        metrics
            .requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[method])
            .observe(seconds);
    }
}

pub fn record_login(outcome: &str) {
    if let Some(metrics) = inner() {
        metrics.logins_total.with_label_values(&[outcome]).inc();
    }
}

/// Prometheus text exposition of every registered family.
pub fn encode_text() -> Result<String, AegisError> {
    let Some(metrics) = inner() else {
        return Ok(String::new());
    };
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metrics.registry.gather(), &mut buffer)
        .map_err(|e| AegisError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| AegisError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_families_after_recording() {
        record_request("GET", 200, 0.01);
        record_login("success");
        let text = encode_text().unwrap();
        assert!(text.contains("aegis_http_requests_total"));
        assert!(text.contains("aegis_logins_total"));
    }
}
