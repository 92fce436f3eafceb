//! Helpers shared by the unit tests.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use opentelemetry_sdk::{
    testing::trace::{InMemorySpanExporter, InMemorySpanExporterBuilder},
    trace::TracerProvider,
};
use tracing::{
    field::{Field, Visit},
    subscriber::DefaultGuard,
    Event, Level, Subscriber,
};
use tracing_subscriber::{layer::Context, layer::SubscriberExt, Layer, Registry};

/// Log lines captured while the guard from [`CapturedLogs::install`] is
/// alive on the current thread.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<(Level, String)>>>);

impl CapturedLogs {
    pub(crate) fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(Registry::default().with(CaptureLayer(self.clone())))
    }

    /// Debug messages starting with `prefix`.
    pub(crate) fn debug(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, message)| *level == Level::DEBUG && message.starts_with(prefix))
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Like [`CapturedLogs::debug`], but waits up to a second for the first
    /// matching line, for events logged by background tasks.
    pub(crate) async fn next_debug(&self, prefix: &str) -> Vec<String> {
        for _ in 0..100 {
            let lines = self.debug(prefix);
            if !lines.is_empty() {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Vec::new()
    }
}

/// A provider exporting synchronously into memory, plus the exporter to
/// read finished spans back from.
pub(crate) fn recording_provider() -> (TracerProvider, InMemorySpanExporter) {
    let exporter = InMemorySpanExporterBuilder::new().build();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    (provider, exporter)
}

struct CaptureLayer(CapturedLogs);

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = Message::default();
        event.record(&mut message);

        let CapturedLogs(lines) = &self.0;
        lines
            .lock()
            .unwrap()
            .push((*event.metadata().level(), message.0));
    }
}

#[derive(Default)]
struct Message(String);

impl Visit for Message {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}
