use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;

/// A timestamped operator-facing event: session lifecycle, kicks, room
/// churn. Broadcast to connected operator dashboards and optionally
/// retained for REST retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayEvent {
    pub timestamp: String,
    pub message: String,
}

/// Formats timestamped entries, prints to tracing, broadcasts to operator
/// subscribers, and optionally buffers for REST retrieval.
pub struct UiLogger<T: Clone + Send + 'static> {
    tx: broadcast::Sender<T>,
    map_fn: Arc<dyn Fn(String) -> T + Send + Sync>,
    buffer: Option<Arc<RwLock<VecDeque<String>>>>,
    max_entries: usize,
}

impl<T: Clone + Send> UiLogger<T> {
    /// Create a broadcast-only logger (no buffer).
    pub fn new(tx: broadcast::Sender<T>, map_fn: impl Fn(String) -> T + Send + Sync + 'static) -> Self {
        Self {
            tx,
            map_fn: Arc::new(map_fn),
            buffer: None,
            max_entries: 0,
        }
    }

    /// Create a logger with an in-memory ring buffer for REST retrieval.
    pub fn with_buffer(
        tx: broadcast::Sender<T>,
        map_fn: impl Fn(String) -> T + Send + Sync + 'static,
        max_entries: usize,
    ) -> Self {
        Self {
            tx,
            map_fn: Arc::new(map_fn),
            buffer: Some(Arc::new(RwLock::new(VecDeque::with_capacity(max_entries)))),
            max_entries,
        }
    }

    /// Format a timestamped log entry, print to tracing, broadcast, and optionally buffer.
    pub fn log(&self, msg: impl Display) {
        let entry = format!("{} {}", chrono::Utc::now().format("%H:%M:%S"), msg);
        tracing::info!("{}", entry);
        if let Some(ref buf) = self.buffer {
            if let Ok(mut entries) = buf.write() {
                entries.push_back(entry.clone());
                while entries.len() > self.max_entries {
                    entries.pop_front();
                }
            }
        }
        let _ = self.tx.send((self.map_fn)(entry));
    }

    /// Return a snapshot of buffered entries. Returns empty vec if no buffer.
    pub fn entries(&self) -> Vec<String> {
        match &self.buffer {
            Some(buf) => buf.read().map(|b| b.iter().cloned().collect()).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

/// Construct a [`UiLogger`] mapping raw entries into [`GatewayEvent`]s, the
/// shape the gateway's operator dashboard and admin endpoints consume.
pub fn gateway_logger(tx: broadcast::Sender<GatewayEvent>, max_entries: usize) -> UiLogger<GatewayEvent> {
    UiLogger::with_buffer(
        tx,
        |entry| {
            let (timestamp, message) = entry.split_once(' ').unwrap_or(("", entry.as_str()));
            GatewayEvent {
                timestamp: timestamp.to_owned(),
                message: message.to_owned(),
            }
        },
        max_entries,
    )
}
