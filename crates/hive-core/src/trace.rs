use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;

use hive_types::{FileTouch, HiveError, SpanRecord, SpanStatus};

use crate::write_json_atomic;

/// Trace state for one run. Cloning shares the span store; `fork` gives a
/// worker its own current-span stack seeded from the parent's top, so
/// parallel workers nest under the span that spawned them.
#[derive(Clone)]
pub struct TraceContext {
    run_id: String,
    trace_id: String,
    dir: PathBuf,
    spans: Arc<RwLock<HashMap<String, SpanRecord>>>,
    stack: Arc<Mutex<Vec<String>>>,
}

impl TraceContext {
    /// Open the trace for a run and persist its id under `.trace/`.
    pub fn init(run_id: impl Into<String>, trace_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let run_id = run_id.into();
        let dir = trace_dir.into();
        fs::create_dir_all(&dir)?;
        let trace_id = uuid::Uuid::new_v4().to_string();
        fs::write(dir.join("trace_id"), &trace_id)?;
        Ok(Self {
            run_id,
            trace_id,
            dir,
            spans: Arc::new(RwLock::new(HashMap::new())),
            stack: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Child context for a parallel worker: shared spans, private stack
    /// inherited from this context's current span.
    pub fn fork(&self) -> Self {
        let seed = self.current_span_id();
        Self {
            run_id: self.run_id.clone(),
            trace_id: self.trace_id.clone(),
            dir: self.dir.clone(),
            spans: self.spans.clone(),
            stack: Arc::new(Mutex::new(seed.into_iter().collect())),
        }
    }

    pub fn span_start(&self, operation: &str) -> String {
        let parent = self.current_span_id();
        let span = SpanRecord::start(self.trace_id.clone(), parent, operation);
        let id = span.id.clone();
        self.spans
            .write()
            .expect("span store poisoned")
            .insert(id.clone(), span);
        self.stack.lock().expect("span stack poisoned").push(id.clone());
        id
    }

    /// Close a span and restore the previous current span. Wall-clock
    /// duration in milliseconds is returned for event enrichment.
    pub fn span_end(&self, span_id: &str, status: SpanStatus) -> Result<u64, HiveError> {
        let duration = {
            let mut spans = self.spans.write().expect("span store poisoned");
            let span = spans
                .get_mut(span_id)
                .ok_or_else(|| HiveError::SpanNotFound(span_id.to_string()))?;
            span.finish(status);
            let persisted = span.clone();
            drop(spans);
            let _ = write_json_atomic(&self.dir.join(format!("{span_id}.json")), &persisted);
            persisted.duration_ms.unwrap_or(0)
        };
        let mut stack = self.stack.lock().expect("span stack poisoned");
        if let Some(pos) = stack.iter().rposition(|id| id.as_str() == span_id) {
            stack.remove(pos);
        }
        Ok(duration)
    }

    pub fn span_add_tag(&self, span_id: &str, key: &str, value: &str) -> Result<(), HiveError> {
        let mut spans = self.spans.write().expect("span store poisoned");
        let span = spans
            .get_mut(span_id)
            .ok_or_else(|| HiveError::SpanNotFound(span_id.to_string()))?;
        span.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn span_record_file(
        &self,
        span_id: &str,
        path: &str,
        action: &str,
    ) -> Result<(), HiveError> {
        let mut spans = self.spans.write().expect("span store poisoned");
        let span = spans
            .get_mut(span_id)
            .ok_or_else(|| HiveError::SpanNotFound(span_id.to_string()))?;
        span.files_modified.push(FileTouch {
            path: path.to_string(),
            action: action.to_string(),
            ts: Utc::now(),
        });
        Ok(())
    }

    pub fn current_span_id(&self) -> Option<String> {
        self.stack
            .lock()
            .expect("span stack poisoned")
            .last()
            .cloned()
    }

    /// (span_id, parent_span_id) of the current span, for event enrichment.
    pub fn current_ids(&self) -> (Option<String>, Option<String>) {
        let Some(current) = self.current_span_id() else {
            return (None, None);
        };
        let parent = self
            .spans
            .read()
            .expect("span store poisoned")
            .get(&current)
            .and_then(|span| span.parent_span_id.clone());
        (Some(current), parent)
    }

    pub fn get_span(&self, span_id: &str) -> Option<SpanRecord> {
        self.spans
            .read()
            .expect("span store poisoned")
            .get(span_id)
            .cloned()
    }

    /// Snapshot every span to `spans.json`, start-time ordered.
    pub fn save_all(&self) -> anyhow::Result<()> {
        let mut spans: Vec<SpanRecord> = self
            .spans
            .read()
            .expect("span store poisoned")
            .values()
            .cloned()
            .collect();
        spans.sort_by_key(|span| span.start_ts);
        write_json_atomic(&self.dir.join("spans.json"), &spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (tempfile::TempDir, TraceContext) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = TraceContext::init("run_1", temp.path().join(".trace")).expect("init");
        (temp, ctx)
    }

    #[test]
    fn nested_spans_restore_previous_current() {
        let (_temp, ctx) = context();
        let outer = ctx.span_start("phase");
        let inner = ctx.span_start("agent.run");
        assert_eq!(ctx.current_span_id().as_deref(), Some(inner.as_str()));

        ctx.span_end(&inner, SpanStatus::Complete).expect("end inner");
        assert_eq!(ctx.current_span_id().as_deref(), Some(outer.as_str()));

        let inner_span = ctx.get_span(&inner).expect("span");
        assert_eq!(inner_span.parent_span_id.as_deref(), Some(outer.as_str()));
        assert!(inner_span.end_ts.expect("end") >= inner_span.start_ts);
    }

    #[test]
    fn unknown_span_end_fails() {
        let (_temp, ctx) = context();
        assert!(matches!(
            ctx.span_end("missing", SpanStatus::Complete),
            Err(HiveError::SpanNotFound(_))
        ));
    }

    #[test]
    fn forked_context_inherits_current_span() {
        let (_temp, ctx) = context();
        let phase = ctx.span_start("phase");
        let worker = ctx.fork();
        let child = worker.span_start("worker.review");
        assert_eq!(
            worker.get_span(&child).expect("span").parent_span_id.as_deref(),
            Some(phase.as_str())
        );
        // worker stack does not leak into the parent
        assert_eq!(ctx.current_span_id().as_deref(), Some(phase.as_str()));
    }

    #[test]
    fn tags_and_files_attach_to_spans() {
        let (_temp, ctx) = context();
        let span = ctx.span_start("agent.run");
        ctx.span_add_tag(&span, "agent", "implementer").expect("tag");
        ctx.span_record_file(&span, "src/config.ts", "modified")
            .expect("file");
        let record = ctx.get_span(&span).expect("span");
        assert_eq!(record.tags.get("agent").map(String::as_str), Some("implementer"));
        assert_eq!(record.files_modified.len(), 1);
    }
}
