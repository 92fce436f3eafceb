use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use opentelemetry::{
    global,
    trace::{Span as _, Tracer as _, TracerProvider as _},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{Tracer, TracerProvider},
    Resource,
};
use tracing::Span;
use tracing_core::Subscriber;
use tracing_opentelemetry::{OpenTelemetryLayer, OpenTelemetrySpanExt};
use tracing_subscriber::registry::LookupSpan;

use crate::{config::Config, error::AgentError};

/// Target used for every span opened by [`Agent`].
pub const TARGET: &str = "scout";

/// A span that already finished somewhere the agent could not observe,
/// e.g. a query timed by the storage layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub operation: String,
    pub start: SystemTime,
    pub end: SystemTime,
    pub tags: Vec<(&'static str, String)>,
}

/// Capabilities the instruments need from an APM agent.
///
/// A single instance is built at process start and shared by every
/// instrument. Per-request scoping comes from the span the request future
/// is instrumented with, so implementations keep no request state.
#[cfg_attr(test, mockall::automock)]
pub trait ScoutApmAgent: Send + Sync {
    /// Establishes the channel to the collector. Calling it again after a
    /// successful connect is a no-op.
    fn connect(&self) -> Result<(), AgentError>;

    fn enabled(&self) -> bool;

    fn connected(&self) -> bool;

    /// Whether requests to `path` are excluded from instrumentation.
    fn ignored(&self, path: &str) -> bool;

    /// Opens the root span of a request trace.
    fn start_request(&self, uri: &str) -> Span;

    /// Opens a span as a child of the current one.
    fn start_span(&self, operation: &str) -> Span;

    /// Records a finished span under the current one, or detached if there is
    /// no current span.
    fn record_span(&self, record: SpanRecord);

    /// Transmits everything recorded so far.
    fn send(&self) -> Result<(), AgentError>;
}

/// Instruments are active only while the agent is both enabled and connected.
pub(crate) fn is_active(agent: &dyn ScoutApmAgent) -> bool {
    agent.enabled() && agent.connected()
}

/// The agent owns its provider, so installing another pipeline elsewhere in
/// the process never cuts this one off.
struct Pipeline {
    provider: TracerProvider,
    tracer: Tracer,
}

impl Pipeline {
    fn new(provider: TracerProvider) -> Self {
        let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
        Pipeline { provider, tracer }
    }
}

/// [`ScoutApmAgent`] backed by an OTLP trace pipeline.
pub struct Agent {
    config: Config,
    pipeline: Mutex<Option<Pipeline>>,
}

impl Agent {
    pub fn from_config(config: Config) -> Self {
        Agent {
            config,
            pipeline: Mutex::new(None),
        }
    }

    /// An agent that is already connected to `provider`.
    #[cfg(test)]
    pub(crate) fn with_provider(config: Config, provider: TracerProvider) -> Self {
        Agent {
            config,
            pipeline: Mutex::new(Some(Pipeline::new(provider))),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Layer bridging `tracing` spans into the connected pipeline.
    ///
    /// Returns `None` until [`ScoutApmAgent::connect`] succeeds, which leaves
    /// the subscriber without any export.
    pub fn telemetry_layer<S>(&self) -> Option<OpenTelemetryLayer<S, Tracer>>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        self.tracer()
            .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer))
    }

    /// Drops the pipeline, which exports whatever is still buffered. The
    /// agent counts as disconnected afterwards.
    pub fn shutdown(&self) {
        drop(self.pipeline().take());
    }

    fn pipeline(&self) -> MutexGuard<'_, Option<Pipeline>> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracer(&self) -> Option<Tracer> {
        self.pipeline().as_ref().map(|pipeline| pipeline.tracer.clone())
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            self.config.name.clone(),
        )])
    }
}

impl ScoutApmAgent for Agent {
    fn connect(&self) -> Result<(), AgentError> {
        if !self.config.monitor {
            return Ok(());
        }

        // held while building, so concurrent connects build a single pipeline
        let mut pipeline = self.pipeline();
        if pipeline.is_some() {
            return Ok(());
        }

        global::set_text_map_propagator(opentelemetry_jaeger_propagator::Propagator::new());
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(self.config.collector.as_str())
            .build_span_exporter()
            .map_err(AgentError::Connect)?;
        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(opentelemetry_sdk::trace::config().with_resource(self.resource()))
            .build();

        *pipeline = Some(Pipeline::new(provider));
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.config.monitor
    }

    fn connected(&self) -> bool {
        self.pipeline().is_some()
    }

    fn ignored(&self, path: &str) -> bool {
        self.config
            .ignore
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn start_request(&self, uri: &str) -> Span {
        if !self.enabled() {
            return Span::none();
        }

        tracing::info_span!(
            target: TARGET,
            "request",
            otel.name = "Request",
            otel.kind = "server",
            http.uri = uri
        )
    }

    fn start_span(&self, operation: &str) -> Span {
        if !self.enabled() {
            return Span::none();
        }

        tracing::info_span!(target: TARGET, "span", otel.name = operation)
    }

    fn record_span(&self, record: SpanRecord) {
        let Some(tracer) = self.tracer() else {
            return;
        };

        // without a current span the context is empty and the span becomes a root
        let parent = Span::current().context();
        let attributes: Vec<KeyValue> = record
            .tags
            .into_iter()
            .map(|(key, value)| KeyValue::new(key, value))
            .collect();

        let mut span = tracer
            .span_builder(record.operation)
            .with_start_time(record.start)
            .with_attributes(attributes)
            .start_with_context(&tracer, &parent);
        span.end_with_timestamp(record.end);
    }

    fn send(&self) -> Result<(), AgentError> {
        // flushing blocks, so it must not happen under the lock
        let provider = self
            .pipeline()
            .as_ref()
            .map(|pipeline| pipeline.provider.clone())
            .ok_or(AgentError::NotConnected)?;

        let failures: Vec<String> = provider
            .force_flush()
            .into_iter()
            .filter_map(Result::err)
            .map(|err| err.to_string())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Send(failures.join("; ")))
        }
    }
}
