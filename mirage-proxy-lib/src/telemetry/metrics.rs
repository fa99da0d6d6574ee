use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

pub mod labels {
    pub const ERROR_TYPE: &str = "error_type";
    pub const KIND: &str = "kind";
    pub const STATUS_CODE: &str = "status_code";
    pub const METHOD: &str = "method";
    pub const TRANSFORM: &str = "transform";
    pub const DIRECTION: &str = "direction";
    pub const REASON: &str = "reason";
    pub const VERSION: &str = "version";
}

pub mod values {
    pub const DIRECTION_CLIENT_TO_ORIGIN: &str = "client_to_origin";
    pub const DIRECTION_ORIGIN_TO_CLIENT: &str = "origin_to_client";
}

#[derive(Clone)]
pub struct Metrics {
    pub connections_total: Counter<u64>,
    pub connections_active: UpDownCounter<i64>,

    // Engine
    pub requests_total: Counter<u64>,
    pub requests_duration_seconds: Histogram<f64>,
    pub engine_errors_total: Counter<u64>,
    pub transforms_total: Counter<u64>,
    pub asset_passthrough_total: Counter<u64>,

    // Relay backend
    pub relay_requests_total: Counter<u64>,
    pub relay_errors_total: Counter<u64>,
    pub relay_duration_seconds: Histogram<f64>,

    // Tunnels
    pub tunnels_total: Counter<u64>,
    pub tunnels_active: UpDownCounter<i64>,
    pub tunnel_messages_total: Counter<u64>,
    pub tunnel_errors_total: Counter<u64>,

    pub build_info: Gauge<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            connections_total: meter
                .u64_counter("mirage_connections_total")
                .with_description("Total number of connections accepted")
                .build(),
            connections_active: meter
                .i64_up_down_counter("mirage_connections_active")
                .with_description("Number of active connections")
                .build(),

            requests_total: meter
                .u64_counter("mirage_requests_total")
                .with_description("Total number of intercepted requests handled by the engine")
                .build(),
            requests_duration_seconds: meter
                .f64_histogram("mirage_requests_duration_seconds")
                .with_description("Engine request duration in seconds")
                .build(),
            engine_errors_total: meter
                .u64_counter("mirage_engine_errors_total")
                .with_description("Engine failures converted to synthesized responses")
                .build(),
            transforms_total: meter
                .u64_counter("mirage_transforms_total")
                .with_description("Response bodies processed, by transform")
                .build(),
            asset_passthrough_total: meter
                .u64_counter("mirage_asset_passthrough_total")
                .with_description("Requests for the proxy's own assets")
                .build(),

            relay_requests_total: meter
                .u64_counter("mirage_relay_requests_total")
                .with_description("Outbound fetches performed by the relay backend")
                .build(),
            relay_errors_total: meter
                .u64_counter("mirage_relay_errors_total")
                .with_description("Relay backend failures")
                .build(),
            relay_duration_seconds: meter
                .f64_histogram("mirage_relay_duration_seconds")
                .with_description("Relay backend outbound fetch duration in seconds")
                .build(),

            tunnels_total: meter
                .u64_counter("mirage_tunnels_total")
                .with_description("WebSocket tunnels opened")
                .build(),
            tunnels_active: meter
                .i64_up_down_counter("mirage_tunnels_active")
                .with_description("Number of open WebSocket tunnels")
                .build(),
            tunnel_messages_total: meter
                .u64_counter("mirage_tunnel_messages_total")
                .with_description("Messages relayed through tunnels, by direction")
                .build(),
            tunnel_errors_total: meter
                .u64_counter("mirage_tunnel_errors_total")
                .with_description("Rejected or failed WebSocket upgrades")
                .build(),

            build_info: meter
                .u64_gauge("mirage_build_info")
                .with_description("Build information")
                .build(),
        }
    }

    pub fn set_build_info(&self) {
        self.build_info
            .record(1, &[KeyValue::new(labels::VERSION, env!("CARGO_PKG_VERSION"))]);
    }

    pub fn record_request(&self, method: &str, kind: &str, status_code: u16, duration: f64) {
        let attrs = [
            KeyValue::new(labels::METHOD, method.to_string()),
            KeyValue::new(labels::KIND, kind.to_string()),
            KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
        ];
        self.requests_total.add(1, &attrs);
        self.requests_duration_seconds.record(duration, &attrs);
    }

    pub fn record_engine_error(&self, error_type: &str) {
        self.engine_errors_total
            .add(1, &[KeyValue::new(labels::ERROR_TYPE, error_type.to_string())]);
    }

    pub fn record_transform(&self, transform: &str) {
        self.transforms_total
            .add(1, &[KeyValue::new(labels::TRANSFORM, transform.to_string())]);
    }

    pub fn record_asset_passthrough(&self) {
        self.asset_passthrough_total.add(1, &[]);
    }

    pub fn record_relay(&self, status_code: u16, duration: f64) {
        let attrs = [KeyValue::new(labels::STATUS_CODE, status_code.to_string())];
        self.relay_requests_total.add(1, &attrs);
        self.relay_duration_seconds.record(duration, &attrs);
    }

    pub fn record_relay_error(&self, reason: &str) {
        self.relay_errors_total
            .add(1, &[KeyValue::new(labels::REASON, reason.to_string())]);
    }

    pub fn record_tunnel_opened(&self) {
        self.tunnels_total.add(1, &[]);
        self.tunnels_active.add(1, &[]);
    }

    pub fn record_tunnel_closed(&self) {
        self.tunnels_active.add(-1, &[]);
    }

    pub fn record_tunnel_message(&self, direction: &'static str) {
        self.tunnel_messages_total
            .add(1, &[KeyValue::new(labels::DIRECTION, direction)]);
    }

    pub fn record_tunnel_error(&self, error_type: &str) {
        self.tunnel_errors_total
            .add(1, &[KeyValue::new(labels::ERROR_TYPE, error_type.to_string())]);
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("mirage-proxy");
    let metrics = Arc::new(Metrics::new(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}
