use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable typed message from a producing agent to a consuming agent.
/// The received marker is the only post-creation mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub summary: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl Handoff {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        summary: impl Into<String>,
        payload: Value,
        epic_id: Option<String>,
    ) -> Self {
        Self {
            id: format!("handoff-{}", uuid::Uuid::new_v4()),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            summary: summary.into(),
            payload,
            epic_id,
            created_at: Utc::now(),
            received_at: None,
        }
    }

    /// Canonical markdown form rendered into the consumer's prompt.
    pub fn render_markdown(&self) -> String {
        let mut out = format!(
            "## Handoff from {}\n\n{}\n",
            self.from_agent, self.summary
        );
        if !self.payload.is_null() {
            let detail = serde_json::to_string_pretty(&self.payload).unwrap_or_default();
            out.push_str("\n```json\n");
            out.push_str(&detail);
            out.push_str("\n```\n");
        }
        out
    }
}
