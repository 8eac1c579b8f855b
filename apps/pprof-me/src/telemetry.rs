// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::TelemetryConfig;

/// Build OTLP metrics exporter with optional custom headers.
fn build_otlp_exporter(
    endpoint: &str,
    headers: &HashMap<String, String>,
) -> Result<opentelemetry_otlp::MetricExporter, Box<dyn std::error::Error>> {
    let mut exporter_builder = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(10));

    if !headers.is_empty() {
        tracing::info!("Adding {} custom headers to OTLP exporter", headers.len());
        exporter_builder = exporter_builder.with_headers(headers.clone());
    }

    exporter_builder.build().map_err(|e| {
        tracing::error!("Failed to build OTLP metrics exporter: {}", e);
        e.into()
    })
}

/// Initializes the OpenTelemetry metrics provider with optional OTLP export.
///
/// Without an endpoint, metrics are still collected so instruments stay
/// cheap and usable, but nothing leaves the process.
///
/// # Errors
///
/// Returns an error if the OTLP metrics exporter fails to build.
pub fn init_metrics(
    config: &TelemetryConfig,
) -> Result<SdkMeterProvider, Box<dyn std::error::Error>> {
    let resource = Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", "pprof-me"),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let builder = SdkMeterProvider::builder().with_resource(resource);

    let provider = if let Some(endpoint) = &config.otlp_endpoint {
        tracing::info!(endpoint = %endpoint, "Configuring OTLP metrics exporter");
        let exporter = build_otlp_exporter(endpoint, &config.otlp_headers)?;
        let reader =
            PeriodicReader::builder(exporter).with_interval(Duration::from_secs(5)).build();
        builder.with_reader(reader).build()
    } else {
        tracing::info!("No OTLP endpoint configured, metrics will be collected but not exported");
        builder.build()
    };

    global::set_meter_provider(provider.clone());
    Ok(provider)
}

/// Instruments for the visualizer sidecars and ingest paths.
pub struct ServiceMetrics {
    pub instances_active: Gauge<u64>,
    pub instances_created: Counter<u64>,
    pub profiles_ingested: Counter<u64>,
}

static SERVICE_METRICS: OnceLock<ServiceMetrics> = OnceLock::new();

/// Lazily built against whichever meter provider is global at first use.
pub fn service_metrics() -> &'static ServiceMetrics {
    SERVICE_METRICS.get_or_init(|| {
        let meter = global::meter("pprof_me");
        ServiceMetrics {
            instances_active: meter
                .u64_gauge("visualizer.instances.active")
                .with_description("Number of live visualizer sidecars")
                .build(),
            instances_created: meter
                .u64_counter("visualizer.instances.created")
                .with_description("Total number of visualizer sidecars started")
                .build(),
            profiles_ingested: meter
                .u64_counter("profiles.ingested")
                .with_description("Profiles committed to the store, by source")
                .build(),
        }
    })
}

/// HTTP request counter and latency histogram used by the router middleware.
pub fn http_metrics() -> &'static (Counter<u64>, Histogram<f64>) {
    static HTTP_METRICS: OnceLock<(Counter<u64>, Histogram<f64>)> = OnceLock::new();
    HTTP_METRICS.get_or_init(|| {
        let meter = global::meter("pprof_me_server");
        (
            meter.u64_counter("http.server.requests").build(),
            meter.f64_histogram("http.server.duration").with_unit("s").build(),
        )
    })
}
