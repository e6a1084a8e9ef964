use std::path::PathBuf;

use chrono::Utc;
use serde_json::Value;

use hive_types::{Handoff, HiveError};

use crate::{read_json, write_json_atomic};

/// Store for inter-agent handoff documents. A handoff is immutable once
/// written; marking it received is the only later mutation, applied on the
/// consumer's first read.
#[derive(Debug, Clone)]
pub struct HandoffStore {
    dir: PathBuf,
}

impl HandoffStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn create(
        &self,
        from_agent: &str,
        to_agent: &str,
        summary: &str,
        payload: Value,
        epic_id: Option<String>,
    ) -> anyhow::Result<Handoff> {
        let handoff = Handoff::new(from_agent, to_agent, summary, payload, epic_id);
        write_json_atomic(&self.path_for(&handoff.id), &handoff)?;
        Ok(handoff)
    }

    pub fn get(&self, id: &str) -> Result<Handoff, HiveError> {
        read_json(&self.path_for(id)).map_err(|_| HiveError::HandoffMissing(id.to_string()))
    }

    /// Idempotent: the timestamp is set once, on the first consumer read.
    pub fn mark_received(&self, id: &str) -> Result<Handoff, HiveError> {
        let mut handoff = self.get(id)?;
        if handoff.received_at.is_none() {
            handoff.received_at = Some(Utc::now());
            write_json_atomic(&self.path_for(id), &handoff)
                .map_err(|_| HiveError::HandoffMissing(id.to_string()))?;
        }
        Ok(handoff)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn received_marker_is_set_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = HandoffStore::new(temp.path().join("handoffs"));
        let handoff = store
            .create("architect", "implementer", "schema ready", json!({}), None)
            .expect("create");
        assert!(handoff.received_at.is_none());

        let first = store.mark_received(&handoff.id).expect("first");
        let stamped = first.received_at.expect("stamped");
        let second = store.mark_received(&handoff.id).expect("second");
        assert_eq!(second.received_at.expect("still stamped"), stamped);
    }

    #[test]
    fn missing_handoff_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = HandoffStore::new(temp.path().join("handoffs"));
        assert!(matches!(
            store.get("handoff-unknown"),
            Err(HiveError::HandoffMissing(_))
        ));
    }
}
