use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Append-only audit record. Never mutated or deleted by the core;
/// retention is the sink's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// ISO-8601 timestamp.
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl Event {
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            kind: kind.to_string(),
            data,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn append(&self, event: Event) -> Result<()>;
}

/// Fire-and-forget append. A sink failure must never fail the caller;
/// it is logged and the strategy carries on.
pub fn emit(sink: &dyn EventSink, event: Event) {
    let kind = event.kind.clone();
    if let Err(e) = sink.append(event) {
        warn!(event = %kind, error = %format!("{e:#}"), "event sink append failed");
    }
}

/// JSON-lines event log on disk, pruned to the most recent `keep_last`
/// entries on every append.
pub struct JsonlEventSink {
    path: PathBuf,
    keep_last: usize,
}

impl JsonlEventSink {
    pub fn new(path: impl AsRef<Path>, keep_last: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            keep_last,
        }
    }

    pub fn recent(&self) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(raw
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    fn prune(&self) -> Result<()> {
        let raw = fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = raw.lines().collect();
        if lines.len() <= self.keep_last {
            return Ok(());
        }
        let kept = &lines[lines.len() - self.keep_last..];
        fs::write(&self.path, format!("{}\n", kept.join("\n")))?;
        Ok(())
    }
}

impl EventSink for JsonlEventSink {
    fn append(&self, event: Event) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", serde_json::to_string(&event)?)?;
        drop(f);
        self.prune()
    }
}
