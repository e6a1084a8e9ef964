use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Running,
    Complete,
    Failed,
    Canceled,
}

/// A file the span touched, in touch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTouch {
    pub path: String,
    pub action: String,
    pub ts: DateTime<Utc>,
}

/// A node in the distributed trace. Spans form a rooted forest ordered by
/// start time; a child starts no earlier and ends no later than its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub id: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub operation: String,
    pub start_ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub status: SpanStatus,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub files_modified: Vec<FileTouch>,
}

impl SpanRecord {
    pub fn start(
        trace_id: impl Into<String>,
        parent_span_id: Option<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trace_id: trace_id.into(),
            parent_span_id,
            operation: operation.into(),
            start_ts: Utc::now(),
            end_ts: None,
            duration_ms: None,
            status: SpanStatus::Running,
            tags: BTreeMap::new(),
            files_modified: Vec::new(),
        }
    }

    /// Close the span, computing wall-clock duration in milliseconds.
    pub fn finish(&mut self, status: SpanStatus) {
        let end = Utc::now();
        self.duration_ms = Some(
            end.signed_duration_since(self.start_ts)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.end_ts = Some(end);
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_span_has_end_after_start() {
        let mut span = SpanRecord::start("trace-1", None, "agent.run");
        span.finish(SpanStatus::Complete);
        assert!(span.end_ts.expect("end ts") >= span.start_ts);
        assert!(span.duration_ms.is_some());
        assert_eq!(span.status, SpanStatus::Complete);
    }
}
