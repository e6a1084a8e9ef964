use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Complete,
    Blocked,
    Failed,
}

/// One end-to-end execution. Immutable history: runs are created at
/// workflow start and never destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub objective: String,
    pub workflow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(objective: impl Into<String>, workflow: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: new_run_id(now),
            objective: objective.into(),
            workflow: workflow.into(),
            epic_id: None,
            status: RunStatus::InProgress,
            started_at: now,
            updated_at: now,
        }
    }
}

pub fn new_run_id(now: DateTime<Utc>) -> String {
    format!("run_{}", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_timestamp_based() {
        let run = Run::new("rename flag in config", "quick");
        assert!(run.run_id.starts_with("run_"));
        assert_eq!(run.run_id.len(), "run_20260101_000000".len());
        assert_eq!(run.status, RunStatus::InProgress);
    }
}
