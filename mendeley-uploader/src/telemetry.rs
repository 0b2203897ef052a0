//! Tracing setup: console, log file and an in-memory tail for the dashboard.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tfmt, EnvFilter, Layer};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Bounded buffer of the most recent log lines, formatted `LEVEL: message key=value`.
///
/// Cloning shares the same buffer. It is also a [`Layer`], so it can be stacked onto any subscriber.
#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Oldest first.
    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        lines.iter().cloned().collect()
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S> Layer<S> for LogBuffer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        self.push(format!(
            "{}: {}{}",
            event.metadata().level(),
            visitor.message,
            visitor.fields
        ));
    }
}

/// Run `f` with a console-only subscriber, for work that happens before the log file is known.
pub fn with_startup_logging<T>(f: impl FnOnce() -> T) -> T {
    let subscriber = tfmt().with_env_filter(env_filter()).finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Install the global subscriber: console, `log_file` (truncated, no colours) and `buffer`.
pub fn init_tracing(log_file: &Path, buffer: &LogBuffer) -> Result<()> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = File::create(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tfmt::layer())
        .with(tfmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .with(buffer.clone())
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}
