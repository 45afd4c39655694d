//! JSONL layer. Each event becomes one line:
//!
//! ```json
//! {"timestamp":"…","level":"INFO","service":"teamsync","pid":7,
//!  "target":"collection_sync::synchronizer","message":"Mounting collection",
//!  "fields":{"topic":"tasks"},"spans":["watch"],"location":"src/synchronizer.rs:104"}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry<'a> {
    pub timestamp: String,
    pub level: &'a str,
    pub service: &'a str,
    pub pid: u32,
    pub target: &'a str,
    pub message: String,
    /// Event fields, sorted by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
    /// Enclosing spans, outermost first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<&'a str>,
    /// `file:line` of the callsite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(text)) => self.message = Some(text),
            (name, value) => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }
}

/// Writes every event as a [`LogEntry`] line through `make_writer`.
pub struct JsonLayer<W> {
    service_name: String,
    pid: u32,
    make_writer: W,
}

impl<W> JsonLayer<W> {
    pub fn new(service_name: String, make_writer: W) -> Self {
        Self {
            service_name,
            pid: std::process::id(),
            make_writer,
        }
    }

    fn entry<'a, S>(&'a self, event: &'a Event<'_>, ctx: &Context<'_, S>) -> LogEntry<'a>
    where
        S: Subscriber + for<'l> LookupSpan<'l>,
    {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();

        let spans = ctx
            .event_scope(event)
            .map(|scope| scope.from_root().map(|span| span.name()).collect())
            .unwrap_or_default();
        let location = metadata
            .file()
            .map(|file| format!("{}:{}", file, metadata.line().unwrap_or(0)));

        LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            level: metadata.level().as_str(),
            service: &self.service_name,
            pid: self.pid,
            target: metadata.target(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            spans,
            location,
        }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'l> LookupSpan<'l>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Ok(line) = serde_json::to_string(&self.entry(event, &ctx)) else {
            return;
        };
        let mut writer = self.make_writer.make_writer();
        let _ = writeln!(writer, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'w> MakeWriter<'w> for Capture {
        type Writer = Capture;

        fn make_writer(&'w self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Value> {
        let sink = Capture::default();
        let subscriber = tracing_subscriber::registry()
            .with(JsonLayer::new("teamsync".to_string(), sink.clone()));
        tracing::subscriber::with_default(subscriber, f);

        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn event_fields_are_structured() {
        let lines = capture(|| {
            tracing::info!(table = "tasks", seq = 7u64, stale = false, "Applied snapshot");
        });

        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["service"], "teamsync");
        assert_eq!(line["level"], "INFO");
        assert_eq!(line["message"], "Applied snapshot");
        assert_eq!(line["fields"]["table"], "tasks");
        assert_eq!(line["fields"]["seq"], 7);
        assert_eq!(line["fields"]["stale"], false);
        assert!(line.get("spans").is_none());
    }

    #[test]
    fn spans_are_listed_outermost_first() {
        let lines = capture(|| {
            let outer = tracing::info_span!("watch");
            let _outer = outer.enter();
            let inner = tracing::info_span!("fetch");
            let _inner = inner.enter();
            tracing::debug!("inside");
        });

        assert_eq!(lines[0]["spans"], serde_json::json!(["watch", "fetch"]));
        assert!(lines[0].get("fields").is_none());
    }
}
