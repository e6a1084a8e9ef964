use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A task as seen through the external tracker's interface. The tracker
/// itself is an external collaborator; the core only reads these views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl TaskRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority: None,
            status: None,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.priority.as_deref() == Some("P0")
    }
}

#[async_trait]
pub trait TaskTracker: Send + Sync {
    async fn epic_exists(&self, epic_id: &str) -> bool;
    async fn ready_tasks(&self, epic_id: &str) -> Vec<TaskRef>;
    async fn in_progress_tasks(&self, epic_id: &str) -> Vec<TaskRef>;
    /// P0 items for the fix-blocking phase.
    async fn blocking_items(&self, epic_id: &str) -> Vec<TaskRef>;
}

/// Tracker stand-in when no external tracker is wired up.
pub struct NullTracker;

#[async_trait]
impl TaskTracker for NullTracker {
    async fn epic_exists(&self, _epic_id: &str) -> bool {
        true
    }

    async fn ready_tasks(&self, _epic_id: &str) -> Vec<TaskRef> {
        Vec::new()
    }

    async fn in_progress_tasks(&self, _epic_id: &str) -> Vec<TaskRef> {
        Vec::new()
    }

    async fn blocking_items(&self, _epic_id: &str) -> Vec<TaskRef> {
        Vec::new()
    }
}

/// Fixed-answer tracker for tests and offline runs.
#[derive(Default)]
pub struct StaticTracker {
    pub exists: bool,
    pub ready: Vec<TaskRef>,
    pub in_progress: Vec<TaskRef>,
    pub blocking: Vec<TaskRef>,
}

#[async_trait]
impl TaskTracker for StaticTracker {
    async fn epic_exists(&self, _epic_id: &str) -> bool {
        self.exists
    }

    async fn ready_tasks(&self, _epic_id: &str) -> Vec<TaskRef> {
        self.ready.clone()
    }

    async fn in_progress_tasks(&self, _epic_id: &str) -> Vec<TaskRef> {
        self.in_progress.clone()
    }

    async fn blocking_items(&self, _epic_id: &str) -> Vec<TaskRef> {
        self.blocking.clone()
    }
}

pub fn render_ready_tasks(tasks: &[TaskRef]) -> String {
    if tasks.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Ready tasks\n\n");
    for task in tasks {
        out.push_str(&format!("- [{}] {}\n", task.id, task.title));
    }
    out
}
