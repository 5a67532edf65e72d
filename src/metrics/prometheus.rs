//! Prometheus metrics definitions and the metrics/health HTTP server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Notifications handled, by the kind of object that triggered them
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "memcached_operator_reconciliations_total",
        "Total number of handled change notifications",
        &["trigger"]
    ).unwrap();

    /// Notifications whose handling returned an error
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "memcached_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["trigger"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "memcached_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["trigger"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Pod owner chain resolutions, by outcome (governed, not_governed)
    pub static ref OWNER_RESOLUTIONS: CounterVec = register_counter_vec!(
        "memcached_operator_owner_resolutions_total",
        "Total number of pod owner chain resolutions by outcome",
        &["outcome"]
    ).unwrap();

    /// Deployment replica corrections
    pub static ref DEPLOYMENT_SCALES: CounterVec = register_counter_vec!(
        "memcached_operator_deployment_scales_total",
        "Total number of Deployment replica count updates",
        &["namespace", "name"]
    ).unwrap();

    /// Memcached status writes
    pub static ref STATUS_UPDATES: CounterVec = register_counter_vec!(
        "memcached_operator_status_updates_total",
        "Total number of Memcached status node list updates",
        &["namespace", "name"]
    ).unwrap();

    /// Notifications handed back to the reconciler after a failure
    pub static ref REDELIVERIES: CounterVec = register_counter_vec!(
        "memcached_operator_redeliveries_total",
        "Total number of redelivered notifications",
        &["trigger"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "memcached_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Set once both watchers have completed their initial listing
static READY: AtomicBool = AtomicBool::new(false);

/// Mark the operator ready to serve `/readyz`
pub fn set_ready(ready: bool) {
    READY.store(ready, Ordering::Relaxed);
}

/// Start the metrics and health HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => text_response(StatusCode::OK, "ok"),
        "/readyz" | "/ready" if READY.load(Ordering::Relaxed) => {
            text_response(StatusCode::OK, "ok")
        }
        "/readyz" | "/ready" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
