use std::net::SocketAddr;
use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::{Router, routing::get};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

const REGISTRY_PREFIX: &str = "mirrorflow";

// Note: We do not add a suffix to the metric name, as the suffix is inferred through the metric type
// by the prometheus client library
const READ_TOTAL: &str = "read";
const ROUTED_TOTAL: &str = "routed";
const WRITE_TOTAL: &str = "write";
const WRITE_ERROR_TOTAL: &str = "write_error";
const CHANNEL_DEPTH: &str = "channel_depth";

const READER_LABEL: &str = "reader";
const ROUTE_LABEL: &str = "route";
const SLOT_LABEL: &str = "slot";

pub(crate) const ROUTE_SHARED: &str = "shared";
pub(crate) const ROUTE_DIRECT: &str = "direct";

type Labels = Vec<(String, String)>;

/// The global register of all metrics.
struct GlobalRegistry {
    // It is okay to use a blocking mutex because we register each metric only one time.
    registry: parking_lot::Mutex<Registry>,
}

static GLOBAL_REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTRY.get_or_init(|| GlobalRegistry {
        registry: parking_lot::Mutex::new(Registry::with_prefix(REGISTRY_PREFIX)),
    })
}

/// Counters of the relay, differentiated by their label values.
pub(crate) struct RelayMetrics {
    /// Records pulled, per reader.
    pub(crate) read_total: Family<Labels, Counter>,
    /// Records handed off, per route.
    pub(crate) routed_total: Family<Labels, Counter>,
    /// Records written to a sink, per slot and route.
    pub(crate) write_total: Family<Labels, Counter>,
    /// Failed sink writes, per slot and route.
    pub(crate) write_error_total: Family<Labels, Counter>,
    pub(crate) channel_depth: Gauge,
}

impl RelayMetrics {
    fn new() -> Self {
        let metrics = Self {
            read_total: Family::default(),
            routed_total: Family::default(),
            write_total: Family::default(),
            write_error_total: Family::default(),
            channel_depth: Gauge::default(),
        };
        let mut registry = global_registry().registry.lock();
        registry.register(
            READ_TOTAL,
            "Total number of records read from the source streams",
            metrics.read_total.clone(),
        );
        registry.register(
            ROUTED_TOTAL,
            "Total number of records routed, by route",
            metrics.routed_total.clone(),
        );
        registry.register(
            WRITE_TOTAL,
            "Total number of records written to the sinks",
            metrics.write_total.clone(),
        );
        registry.register(
            WRITE_ERROR_TOTAL,
            "Total number of failed sink writes",
            metrics.write_error_total.clone(),
        );
        registry.register(
            CHANNEL_DEPTH,
            "Records waiting in the shared relay channel",
            metrics.channel_depth.clone(),
        );
        metrics
    }
}

static RELAY_METRICS: OnceLock<RelayMetrics> = OnceLock::new();

pub(crate) fn relay_metrics() -> &'static RelayMetrics {
    RELAY_METRICS.get_or_init(RelayMetrics::new)
}

pub(crate) fn reader_labels(reader: usize) -> Labels {
    vec![(READER_LABEL.to_string(), reader.to_string())]
}

pub(crate) fn route_labels(route: &str) -> Labels {
    vec![(ROUTE_LABEL.to_string(), route.to_string())]
}

pub(crate) fn write_labels(slot: usize, route: &str) -> Labels {
    vec![
        (SLOT_LABEL.to_string(), slot.to_string()),
        (ROUTE_LABEL.to_string(), route.to_string()),
    ]
}

/// Snapshot of the current state of the metrics in the global registry.
pub async fn metrics_handler() -> impl IntoResponse {
    // make sure the relay metrics are registered even before the first record
    relay_metrics();
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &global_registry().registry.lock()) {
        error!(?e, "Encoding metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    debug!("Exposing metrics: {:?}", buffer);
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        Body::from(buffer),
    )
        .into_response()
}

/// Serves the metrics and liveness endpoints until the process exits.
pub(crate) async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Metrics(format!("Binding metrics server to {addr}: {e}")))?;
    info!(?addr, "Started metrics server");
    axum::serve(listener, metrics_router())
        .await
        .map_err(|e| Error::Metrics(format!("Starting web server for metrics: {e}")))
}

fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/livez", get(livez))
}

async fn livez() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .unwrap_or_default()
}
