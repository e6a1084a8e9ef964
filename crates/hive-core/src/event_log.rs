use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Map, Value};

use hive_types::{EventRecord, HiveError};

use crate::{EventBus, TraceContext};

/// Append-only JSONL event stream. Each record is enriched with the run,
/// trace, and current span ids; payload fields merge into the top level.
/// A single writer appends per process; readers tolerate a partial last
/// line left by a crashed writer.
#[derive(Clone)]
pub struct EventLog {
    path: PathBuf,
    trace: TraceContext,
    bus: EventBus,
    write_lock: Arc<Mutex<()>>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, trace: TraceContext, bus: EventBus) -> Self {
        Self {
            path: path.into(),
            trace,
            bus,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Log a structured event. A payload that is not a JSON object is
    /// replaced with an empty one so a minimally valid record still lands.
    pub fn log_event(
        &self,
        event: &str,
        payload: Value,
        duration_ms: Option<u64>,
    ) -> Result<EventRecord, HiveError> {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let (span_id, parent_span_id) = self.trace.current_ids();
        let record = EventRecord {
            ts: Utc::now(),
            event: event.to_string(),
            run_id: self.trace.run_id().to_string(),
            trace_id: self.trace.trace_id().to_string(),
            span_id,
            parent_span_id,
            duration_ms,
            payload,
        };
        self.append(&record)?;
        self.bus.publish(record.clone());
        Ok(record)
    }

    fn append(&self, record: &EventRecord) -> Result<(), HiveError> {
        let line = serde_json::to_string(record)
            .map_err(|err| HiveError::LogWriteError(err.to_string()))?;
        let _guard = self.write_lock.lock().expect("event log lock poisoned");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| HiveError::LogWriteError(err.to_string()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| HiveError::LogWriteError(err.to_string()))?;
        writeln!(file, "{line}").map_err(|err| HiveError::LogWriteError(err.to_string()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Offline query filters over an events file. Unparseable lines (including
/// a truncated final line) are skipped.
pub fn read_events(path: &Path) -> Vec<EventRecord> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .filter_map(|line| serde_json::from_str::<EventRecord>(line).ok())
        .collect()
}

pub fn events_by_run(path: &Path, run_id: &str) -> Vec<EventRecord> {
    read_events(path)
        .into_iter()
        .filter(|event| event.run_id == run_id)
        .collect()
}

pub fn events_by_trace(path: &Path, trace_id: &str) -> Vec<EventRecord> {
    read_events(path)
        .into_iter()
        .filter(|event| event.trace_id == trace_id)
        .collect()
}

pub fn events_by_span(path: &Path, span_id: &str) -> Vec<EventRecord> {
    read_events(path)
        .into_iter()
        .filter(|event| event.span_id.as_deref() == Some(span_id))
        .collect()
}

pub fn events_by_type(path: &Path, event_type: &str) -> Vec<EventRecord> {
    read_events(path)
        .into_iter()
        .filter(|event| event.event == event_type)
        .collect()
}

pub fn events_by_agent(path: &Path, agent: &str) -> Vec<EventRecord> {
    read_events(path)
        .into_iter()
        .filter(|event| event.field_str("agent") == Some(agent))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_in(dir: &Path) -> (EventLog, PathBuf) {
        let trace = TraceContext::init("run_1", dir.join(".trace")).expect("trace");
        let path = dir.join("events.jsonl");
        (EventLog::new(&path, trace, EventBus::new()), path)
    }

    #[test]
    fn events_are_enriched_and_appended() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (log, path) = log_in(temp.path());
        log.log_event("run_start", json!({"workflow": "quick"}), None)
            .expect("write");
        log.log_event("agent_start", json!({"agent": "implementer"}), None)
            .expect("write");

        let events = read_events(&path);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].run_id, "run_1");
        assert_eq!(events[0].field_str("workflow"), Some("quick"));
        assert!(events[0].ts <= events[1].ts);
        assert_eq!(events_by_agent(&path, "implementer").len(), 1);
        assert_eq!(events_by_type(&path, "run_start").len(), 1);
    }

    #[test]
    fn invalid_payload_degrades_to_empty_object() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (log, path) = log_in(temp.path());
        log.log_event("odd", json!("not an object"), None)
            .expect("write");
        let events = read_events(&path);
        assert_eq!(events.len(), 1);
        assert!(events[0].payload.is_empty());
    }

    #[test]
    fn partial_last_line_is_tolerated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (log, path) = log_in(temp.path());
        log.log_event("run_start", json!({}), None).expect("write");
        // simulate a crashed writer
        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        file.write_all(b"{\"ts\":\"2026-01-01T").expect("truncated");

        let events = read_events(&path);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn events_inside_a_span_carry_its_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let trace = TraceContext::init("run_1", temp.path().join(".trace")).expect("trace");
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, trace.clone(), EventBus::new());

        let outer = trace.span_start("phase");
        let inner = trace.span_start("agent.run");
        log.log_event("agent_start", json!({"agent": "tester"}), None)
            .expect("write");

        let events = events_by_span(&path, &inner);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].parent_span_id.as_deref(), Some(outer.as_str()));
    }
}
