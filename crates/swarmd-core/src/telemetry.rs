//! Logging and tracing bootstrap: a `clap` `ValueEnum` for the output
//! format, one `init` entry point called once from `main`, and a
//! `get_trace_id` helper long-running tasks can stamp onto their spans.

use clap::ValueEnum;
use opentelemetry::trace::{TraceContextExt, TraceId};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Initializes the global tracing subscriber. When `tracing_url` is set,
/// spans are additionally exported over OTLP at the given `sample_ratio`
/// (0.0–1.0); otherwise only the local fmt layer is installed.
pub async fn init(
    log_filter: &str,
    log_format: LogFormat,
    tracing_url: Option<&str>,
    sample_ratio: f64,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = match log_format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().flatten_event(true).boxed(),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if let Some(endpoint) = tracing_url {
        let provider = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map(|exporter| {
                opentelemetry_sdk::trace::SdkTracerProvider::builder()
                    .with_batch_exporter(exporter)
                    .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
                        sample_ratio,
                    ))
                    .build()
            })?;
        opentelemetry::global::set_tracer_provider(provider.clone());
        let tracer = provider.tracer("swarmd");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry.with(otel_layer).try_init()?;
    } else {
        registry.try_init()?;
    }

    Ok(())
}

/// The current span's OpenTelemetry trace id, or the all-zero id when
/// tracing export is disabled.
pub fn get_trace_id() -> TraceId {
    Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}
