use serde::{Deserialize, Serialize};

pub const MAX_WORKFLOW_DEPTH: usize = 5;

/// Built-in workflow names, in selection-priority order.
pub const BUILTIN_WORKFLOWS: [&str; 8] = [
    "feature",
    "bugfix",
    "refactor",
    "test",
    "review",
    "quick",
    "docs",
    "migration",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Agent,
    BuildVerify,
    FixBlocking,
    Interview,
}

/// One step of a declarative workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(rename = "type")]
    pub phase_type: PhaseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_handoff_from: Option<String>,
    #[serde(default)]
    pub human_checkpoint_after: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    #[serde(default)]
    pub injected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Phase {
    pub fn agent_phase(name: impl Into<String>, agent: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name,
            phase_type: PhaseType::Agent,
            agent: Some(agent.into()),
            required: false,
            task: None,
            condition: None,
            needs_handoff_from: None,
            human_checkpoint_after: false,
            on_failure: None,
            injected: false,
            reason: None,
        }
    }

    pub fn injected(name: impl Into<String>, agent: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut phase = Self::agent_phase(name, agent);
        phase.injected = true;
        phase.reason = Some(reason.into());
        phase
    }

    /// Task template with `{{EPIC_ID}}` substituted. Falls back to the
    /// phase name when no template is set.
    pub fn render_task(&self, epic_id: Option<&str>) -> String {
        let template = self.task.as_deref().unwrap_or(&self.name);
        template.replace("{{EPIC_ID}}", epic_id.unwrap_or(""))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub description: String,
    pub phases: Vec<Phase>,
}
