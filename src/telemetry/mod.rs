//! Log filtering and optional OTLP export for the bridge.
//!
//! Human-readable logs always go to stderr, leaving stdout to the one-shot
//! commands' output. With an OTLP endpoint the same events are exported
//! as logs, dispatch and session spans become traces, and the
//! `hubbridge.*` instruments in [`metrics`] start reporting.

pub mod hub;
pub mod metrics;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use url::Url;

use crate::error::{Error, Result};

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint (e.g. "http://localhost:4317"). `None` = stderr only.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// `LOG_LEVEL`: filter directives applied when `RUST_LOG` is unset.
    pub log_level: String,
    /// Hubs this process talks to, by role. Exported as resource attributes
    /// so traces from several bridges can be told apart.
    pub servers: Vec<(&'static str, Url)>,
}

/// Shuts the OTLP providers down on drop, flushing whatever is batched.
/// Hold it for as long as the process should report.
#[derive(Default)]
pub struct TelemetryGuard {
    pipelines: Option<Pipelines>,
}

struct Pipelines {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // Logs first so shutdown records still reach the collector.
        if let Some(p) = self.pipelines.take() {
            let _ = p.logger.shutdown();
            let _ = p.meter.shutdown();
            let _ = p.tracer.shutdown();
        }
    }
}

/// Pick the log filter. A non-empty `RUST_LOG` wins over `log_level`.
/// Either one failing to parse is a configuration error rather than a
/// silent fallback, so a typo never hides the logs an operator asked for.
pub fn log_filter(rust_log: Option<&str>, log_level: &str) -> Result<EnvFilter> {
    let (source, directives) = match rust_log.map(str::trim) {
        Some(d) if !d.is_empty() => ("RUST_LOG", d),
        _ => ("LOG_LEVEL", log_level.trim()),
    };
    EnvFilter::try_new(directives)
        .map_err(|e| Error::Config(format!("invalid {source} {directives:?}: {e}")))
}

/// Install the global subscriber.
///
/// # Errors
///
/// A bad filter, an exporter that cannot be built, or a subscriber that was
/// already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(rust_log.as_deref(), &config.log_level)?;
    let stderr = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr);

    let Some(endpoint) = config.endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .try_init()
            .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;
        return Ok(TelemetryGuard::default());
    };

    let pipelines = otlp_pipelines(endpoint, resource(&config))?;
    opentelemetry::global::set_meter_provider(pipelines.meter.clone());
    let traces = tracing_opentelemetry::layer().with_tracer(pipelines.tracer.tracer("hubbridge"));
    let logs =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&pipelines.logger);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(traces)
        .with(logs)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    tracing::info!(%endpoint, servers = config.servers.len(), "exporting telemetry");
    Ok(TelemetryGuard {
        pipelines: Some(pipelines),
    })
}

/// `service.name`, `service.version` and one `hubbridge.<role>.server`
/// attribute per hub. Only host and port are reported; base URLs may carry
/// credentials.
fn resource(config: &TelemetryConfig) -> Resource {
    let servers = config.servers.iter().map(|(role, url)| {
        KeyValue::new(format!("hubbridge.{role}.server"), server_address(url))
    });
    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attribute(KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ))
        .with_attributes(servers)
        .build()
}

fn server_address(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown");
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn otlp_pipelines(endpoint: &str, resource: Resource) -> Result<Pipelines> {
    let exporter_error = |signal: &str, e: &dyn std::fmt::Display| {
        Error::Config(format!("OTLP {signal} exporter for {endpoint}: {e}"))
    };

    let spans = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| exporter_error("span", &e))?;
    let metrics = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| exporter_error("metric", &e))?;
    let logs = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| exporter_error("log", &e))?;

    Ok(Pipelines {
        tracer: SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .with_resource(resource.clone())
            .build(),
        meter: SdkMeterProvider::builder()
            .with_periodic_exporter(metrics)
            .with_resource(resource.clone())
            .build(),
        logger: SdkLoggerProvider::builder()
            .with_batch_exporter(logs)
            .with_resource(resource)
            .build(),
    })
}
