use http::HeaderMap;
use opentelemetry::{global, propagation::Extractor};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Parents `span` on the trace context carried by incoming `headers`, so a
/// request arriving from another instrumented service continues its trace.
///
/// Must be called before `span` is first entered. Without a recognisable
/// header the span stays a root.
pub fn continue_remote_trace(span: &Span, headers: &HeaderMap) {
    if span.is_none() {
        return;
    }

    let context = global::get_text_map_propagator(|extractor| {
        extractor.extract(&HeaderExtractor::new(headers))
    });

    span.set_parent(context);
}

/// Lets the installed propagator read the trace context out of request
/// headers, for Jaeger the `uber-trace-id` header
/// (<https://www.jaegertracing.io/docs/1.21/client-libraries/#propagation-format>).
/// Headers that are not valid strings are treated as missing.
struct HeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl<'a> HeaderExtractor<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        HeaderExtractor { headers }
    }
}

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|h| h.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|k| k.as_str()).collect()
    }
}
