//! Backing store for `GET /logs/events`: a `tracing_subscriber::Layer` that renders each
//! event to a line, keeps a bounded in-memory ring buffer so a newly-connected admin client
//! can replay recent history, and fans new lines out over a broadcast channel for the SSE
//! stream.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// How many recent log lines are kept for replay to a client that connects to the SSE
/// stream after the lines were emitted.
const MAX_BUFFERED_LINES: usize = 500;

/// Shared handle: clone freely, each clone sees the same buffer and broadcast channel.
#[derive(Clone)]
pub struct LogBroadcast {
    inner: Arc<Inner>,
}

struct Inner {
    buffer: Mutex<VecDeque<String>>,
    sender: broadcast::Sender<String>,
}

impl LogBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(VecDeque::with_capacity(MAX_BUFFERED_LINES)),
                sender,
            }),
        }
    }

    fn push(&self, line: String) {
        let mut buffer = self.inner.buffer.lock();
        if buffer.len() >= MAX_BUFFERED_LINES {
            buffer.pop_front();
        }
        buffer.push_back(line.clone());
        drop(buffer);
        // No receivers yet (no admin client connected) is the common case; ignore it.
        let _ = self.inner.sender.send(line);
    }

    /// A snapshot of recently buffered lines, oldest first.
    pub fn recent(&self) -> Vec<String> {
        self.inner.buffer.lock().iter().cloned().collect()
    }

    /// A fresh receiver that observes every line pushed from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inner.sender.subscribe()
    }
}

impl Default for LogBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }
}

/// The `tracing_subscriber::Layer` registered alongside the `fmt` layer in `main.rs`; it
/// never suppresses anything the `fmt` layer would print, it only mirrors events into the
/// dashboard's log stream.
pub struct DashboardLogLayer {
    sink: LogBroadcast,
}

impl DashboardLogLayer {
    pub fn new(sink: LogBroadcast) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for DashboardLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut line = format!(
            "{} {} {}",
            event.metadata().level(),
            event.metadata().target(),
            visitor.message
        );
        if !visitor.fields.is_empty() {
            let fields = visitor
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            line.push(' ');
            line.push_str(&fields);
        }

        self.sink.push(line);
    }
}
