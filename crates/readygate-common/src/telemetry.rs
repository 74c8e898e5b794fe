//! Logging, tracing and metrics setup
//!
//! Logs always go to stdout through `tracing-subscriber`. When an OTLP
//! endpoint is configured, spans and the metrics in [`crate::metrics`] are
//! exported too. The returned [`TelemetryGuard`] flushes both on drop.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,readygate=debug,kube=info,tower=warn,hyper=warn";

/// Telemetry setup failures
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The OTLP span exporter could not be built
    #[error("failed to initialize tracer: {0}")]
    TracerInit(String),

    /// The OTLP metric exporter could not be built
    #[error("failed to initialize metrics exporter: {0}")]
    MetricsInit(String),

    /// A global subscriber was already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable lines for local runs
    Text,
}

/// Telemetry settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute and tracer name
    pub service_name: String,
    /// OTLP gRPC endpoint; logs only when unset
    pub otlp_endpoint: Option<String>,
    /// Log line format
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "readygate".to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            log_format: LogFormat::default(),
        }
    }
}

/// Holds the OTLP providers; shuts them down (flushing pending data) on drop
#[must_use = "dropping the guard stops telemetry export"]
pub struct TelemetryGuard {
    tracer: Option<TracerProvider>,
    meter: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    /// Whether spans and metrics are exported
    pub fn is_exporting(&self) -> bool {
        self.tracer.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(tracer) = self.tracer.take() {
            if let Err(e) = tracer.shutdown() {
                eprintln!("failed to flush traces: {e}");
            }
        }
        if let Some(meter) = self.meter.take() {
            if let Err(e) = meter.shutdown() {
                eprintln!("failed to flush metrics: {e}");
            }
        }
    }
}

/// Install the global subscriber and, if configured, the OTLP exporters
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let mut guard = TelemetryGuard {
        tracer: None,
        meter: None,
    };

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let resource = build_resource(&config.service_name);
            let meter = otlp_meter_provider(endpoint, resource.clone())?;
            global::set_meter_provider(meter.clone());
            guard.meter = Some(meter);

            let provider = otlp_tracer_provider(endpoint, resource)?;
            global::set_tracer_provider(provider.clone());
            let tracer = provider.tracer(config.service_name.clone());
            guard.tracer = Some(provider);

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    Ok(guard)
}

/// Resource attributes: service identity plus downward-API pod placement
fn build_resource(service_name: &str) -> Resource {
    let mut attributes = vec![
        KeyValue::new(SERVICE_NAME, service_name.to_string()),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ];

    for (var, key) in [
        ("POD_NAME", "k8s.pod.name"),
        ("POD_NAMESPACE", "k8s.namespace.name"),
        ("NODE_NAME", "k8s.node.name"),
    ] {
        if let Ok(value) = std::env::var(var) {
            attributes.push(KeyValue::new(key, value));
        }
    }

    Resource::new(attributes)
}

fn otlp_tracer_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build())
}

fn otlp_meter_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<SdkMeterProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    Ok(SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
        .with_resource(resource)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_json_logs_for_readygate() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "readygate");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn resource_carries_service_identity() {
        let resource = build_resource("readygate-test");
        assert_eq!(
            resource.get(opentelemetry::Key::from_static_str(SERVICE_NAME)),
            Some(opentelemetry::Value::from("readygate-test"))
        );
    }

    #[test]
    fn guard_without_exporters_is_inert() {
        let guard = TelemetryGuard {
            tracer: None,
            meter: None,
        };
        assert!(!guard.is_exporting());
    }
}
