//! Progress event emission.
//!
//! Every status transition and progress change of an update session is
//! published as a [`ProgressEvent`]. Events go through a [`ProgressEmitter`];
//! the CLI wires a human renderer or a JSONL writer, embedders subscribe to
//! an [`EventBus`].

use crate::update::session::UpdateStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{mpsc, Arc, Mutex};

/// Standard progress event names.
pub mod event_names {
    pub const SESSION_STARTED: &str = "session_started";
    pub const STATUS_CHANGED: &str = "status_changed";
    pub const PROGRESS: &str = "progress";
    pub const LOG: &str = "log";
    pub const SESSION_COMPLETED: &str = "session_completed";
    pub const SESSION_FAILED: &str = "session_failed";
    pub const ROLLBACK_STARTED: &str = "rollback_started";
    pub const ROLLBACK_COMPLETE: &str = "rollback_complete";
}

/// Structured progress event for CLI and embedding consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: UpdateStatus,
    pub percent: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,
}

impl ProgressEvent {
    pub fn new(
        event: impl Into<String>,
        status: UpdateStatus,
        percent: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            session_id: None,
            status,
            percent: percent.min(100),
            message: message.into(),
            current_version: None,
            new_version: None,
            details: HashMap::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_versions(mut self, current: Option<&str>, new: Option<&str>) -> Self {
        self.current_version = current.map(str::to_string);
        self.new_version = new.map(str::to_string);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

/// Trait for emitting progress events.
pub trait ProgressEmitter: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Emitter that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEmitter;

impl ProgressEmitter for NullEmitter {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Broadcast event bus supporting multiple subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    senders: Mutex<Vec<mpsc::Sender<ProgressEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to receive progress events.
    pub fn subscribe(&self) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel();
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.push(tx);
        rx
    }

    /// Emit a progress event to all subscribers, dropping disconnected ones.
    pub fn emit(&self, event: ProgressEvent) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

impl ProgressEmitter for EventBus {
    fn emit(&self, event: ProgressEvent) {
        EventBus::emit(self, event);
    }
}

/// JSONL writer for progress events.
pub struct JsonlWriter<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> ProgressEmitter for JsonlWriter<W> {
    fn emit(&self, event: ProgressEvent) {
        let line = event.to_jsonl();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

/// Human progress renderer: `[ 35%] replacing-files  Replacing application files`.
///
/// Installer output lines (`log` events) are indented under the current step.
pub struct HumanProgressWriter<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> HumanProgressWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> ProgressEmitter for HumanProgressWriter<W> {
    fn emit(&self, event: ProgressEvent) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        let _ = if event.event == event_names::LOG {
            writeln!(writer, "        {}", event.message)
        } else {
            writeln!(
                writer,
                "[{:>3}%] {:<26} {}",
                event.percent,
                event.status.as_str(),
                event.message
            )
        };
    }
}

/// Fan-out progress emitter that forwards events to multiple emitters.
pub struct FanoutEmitter {
    emitters: Vec<Arc<dyn ProgressEmitter>>,
}

impl FanoutEmitter {
    pub fn new(emitters: Vec<Arc<dyn ProgressEmitter>>) -> Self {
        Self { emitters }
    }
}

impl ProgressEmitter for FanoutEmitter {
    fn emit(&self, event: ProgressEvent) {
        for emitter in &self.emitters {
            emitter.emit(event.clone());
        }
    }
}

/// Records every event; handy for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Distinct statuses in the order they were first reported.
    pub fn statuses(&self) -> Vec<UpdateStatus> {
        let mut seen = Vec::new();
        for event in self.events() {
            if seen.last() != Some(&event.status) {
                seen.push(event.status);
            }
        }
        seen
    }
}

impl ProgressEmitter for RecordingEmitter {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
