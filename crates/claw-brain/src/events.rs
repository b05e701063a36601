// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only decision log.
//!
//! Line-delimited JSON. Writes append and never rewrite; reads drop
//! malformed lines instead of failing, so a torn write cannot poison the
//! history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// One recorded decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// When it happened.
    pub ts: DateTime<Utc>,
    /// Which subsystem acted (`discovery`, `router`, `dispatcher`, …).
    pub source: String,
    /// Machine-readable action tag.
    pub action: String,
    /// Human-readable reason.
    pub reason: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Append-only JSONL event log.
pub struct EventLog {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl EventLog {
    /// A log that discards everything (tests).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// A log appending to `path`.
    #[must_use]
    pub fn at(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            write_lock: Mutex::new(()),
        }
    }

    /// Append an event stamped with the current time. Failures are logged
    /// and swallowed: the log is advisory and must never take the node
    /// down.
    pub fn log(&self, source: &str, action: &str, reason: &str, details: Option<Value>) {
        let Some(path) = &self.path else { return };
        let event = Event {
            ts: Utc::now(),
            source: source.to_string(),
            action: action.to_string(),
            reason: reason.to_string(),
            details,
        };
        let _guard = self.write_lock.lock().expect("event log poisoned");
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!(error = %e, "event append failed");
        }
    }

    /// The last `limit` events, optionally filtered by action tag.
    /// Malformed lines are dropped.
    #[must_use]
    pub fn list(&self, limit: usize, action_filter: Option<&str>) -> Vec<Event> {
        let Some(path) = &self.path else {
            return Vec::new();
        };
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        let mut events: Vec<Event> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .filter(|e: &Event| action_filter.is_none_or(|a| e.action == a))
            .collect();
        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::at(&dir.path().join("brain-events.jsonl"));
        log.log("discovery", "peer-discovered", "new peer", Some(json!({"peer": "02ab"})));
        log.log("router", "sweep-complete", "1 job", None);

        let events = log.list(10, None);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "peer-discovered");
        assert_eq!(events[1].source, "router");
    }

    #[test]
    fn filter_and_limit_keep_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::at(&dir.path().join("events.jsonl"));
        for i in 0..5 {
            log.log("router", "sweep-complete", &format!("sweep {i}"), None);
        }
        log.log("discovery", "peer-discovered", "x", None);

        let sweeps = log.list(3, Some("sweep-complete"));
        assert_eq!(sweeps.len(), 3);
        assert_eq!(sweeps[2].reason, "sweep 4");
        assert!(log.list(10, Some("peer-discovered")).len() == 1);
    }

    #[test]
    fn malformed_lines_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EventLog::at(&path);
        log.log("router", "sweep-complete", "ok", None);
        // Simulate a torn write.
        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{ torn").unwrap();
        }
        log.log("router", "sweep-complete", "ok2", None);
        assert_eq!(log.list(10, None).len(), 2);
    }

    #[test]
    fn disabled_log_is_silent() {
        let log = EventLog::disabled();
        log.log("router", "x", "y", None);
        assert!(log.list(10, None).is_empty());
    }
}
