//! Prometheus metrics for the checker
//!
//! Tracks cycle outcomes, the busy streak, the adaptive frequency, browser
//! session restarts and notifications.
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.
//!
//! With `[metrics] listen_addr` set, [`serve_metrics`] exposes the registry
//! as `GET /metrics` in the Prometheus text format.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::future::Future;
use std::sync::OnceLock;
use tokio::net::TcpListener;

// ============================================================================
// Metrics Storage
// ============================================================================

struct CheckerMetrics {
    cycles: CounterVec,
    cycle_duration: Histogram,
    busy_streak: Gauge,
    adaptive_frequency: Gauge,
    backoff_active: Gauge,
    session_restarts: CounterVec,
    notifications: CounterVec,
    earlier_dates_found: Counter,
}

static CHECKER_METRICS: OnceLock<CheckerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; later calls return `Ok(())` without
/// registering anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = slotwatch::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {e}");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = CheckerMetrics {
        cycles: register_counter_vec!(
            "slotwatch_cycles_total",
            "Check cycles by outcome",
            &["outcome"]
        )?,
        cycle_duration: register_histogram!(
            "slotwatch_cycle_duration_seconds",
            "Wall-clock duration of a check cycle",
            vec![1.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0]
        )?,
        busy_streak: register_gauge!(
            "slotwatch_busy_streak",
            "Consecutive busy calendar responses"
        )?,
        adaptive_frequency: register_gauge!(
            "slotwatch_adaptive_frequency_minutes",
            "Current adaptive check frequency in minutes"
        )?,
        backoff_active: register_gauge!(
            "slotwatch_backoff_active",
            "1 while a backoff deadline is pending"
        )?,
        session_restarts: register_counter_vec!(
            "slotwatch_session_restarts_total",
            "Browser sessions torn down, by reason",
            &["reason"]
        )?,
        notifications: register_counter_vec!(
            "slotwatch_notifications_total",
            "Notifications by kind and result",
            &["kind", "result"]
        )?,
        earlier_dates_found: register_counter!(
            "slotwatch_earlier_dates_found_total",
            "Earlier-than-current dates seen across all probes"
        )?,
    };

    CHECKER_METRICS
        .set(metrics)
        .map_err(|_| "Checker metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

pub fn metrics_initialized() -> bool {
    CHECKER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Scrape Endpoint
// ============================================================================

/// Router with the single `GET /metrics` route
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    match encode_metrics().map_err(|e| e.to_string()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}

/// Serve `/metrics` on `listener` until `shutdown` resolves
pub async fn serve_metrics(
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Serving metrics on /metrics");
    }
    axum::serve(listener, metrics_router())
        .with_graceful_shutdown(shutdown)
        .await
}

/// Record a finished cycle
pub fn record_cycle(outcome: &str, duration_secs: f64) {
    if let Some(m) = CHECKER_METRICS.get() {
        m.cycles.with_label_values(&[outcome]).inc();
        m.cycle_duration.observe(duration_secs);
    }
}

/// Publish the scheduler state after a cycle
pub fn update_scheduler_state(busy_streak: u32, adaptive_frequency: f64, backoff_active: bool) {
    if let Some(m) = CHECKER_METRICS.get() {
        m.busy_streak.set(f64::from(busy_streak));
        m.adaptive_frequency.set(adaptive_frequency);
        m.backoff_active.set(if backoff_active { 1.0 } else { 0.0 });
    }
}

pub fn record_session_restart(reason: &str) {
    if let Some(m) = CHECKER_METRICS.get() {
        m.session_restarts.with_label_values(&[reason]).inc();
    }
}

pub fn record_notification(kind: &str, delivered: bool) {
    if let Some(m) = CHECKER_METRICS.get() {
        let result = if delivered { "delivered" } else { "failed" };
        m.notifications.with_label_values(&[kind, result]).inc();
    }
}

pub fn record_earlier_dates(count: usize) {
    if let Some(m) = CHECKER_METRICS.get() {
        m.earlier_dates_found.inc_by(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_recorded_values_are_encoded() {
        let _ = init_metrics();
        record_cycle("available", 12.5);
        update_scheduler_state(2, 7.2, true);
        record_session_restart("scheduled");
        record_notification("availability", true);
        record_earlier_dates(2);

        let text = encode_metrics().unwrap();
        assert!(text.contains("slotwatch_cycles_total"));
        assert!(text.contains("slotwatch_busy_streak 2"));
        assert!(text.contains("slotwatch_notifications_total"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_registry() {
        let _ = init_metrics();
        record_cycle("no_change", 3.0);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_metrics(listener, async move {
            let _ = stop_rx.await;
        }));

        let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
        assert_eq!(response.status(), 200);
        let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"), "{content_type}");
        let body = response.text().await.unwrap();
        assert!(body.contains("slotwatch_cycles_total"));

        let missing = reqwest::get(format!("http://{addr}/other")).await.unwrap();
        assert_eq!(missing.status(), 404);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
