use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Phase, RunStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub ts: DateTime<Utc>,
    pub agent: String,
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    pub ts: DateTime<Utc>,
    pub agent: String,
    pub text: String,
    pub status: BlockerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Shared context the run accumulates. Set-typed fields are ordered
/// vectors deduplicated on insert; the on-disk format is an array.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScratchpadContext {
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub key_files: Vec<String>,
    #[serde(default)]
    pub patterns_established: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub history: Vec<String>,
}

impl Default for IterationState {
    fn default() -> Self {
        Self {
            phase: None,
            attempt: 0,
            max_attempts: 3,
            history: Vec::new(),
        }
    }
}

/// The single mutable state document of a run. Persisted to disk after
/// every mutation; read by every agent curator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scratchpad {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    pub trace_id: String,
    pub objective: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_agent: Option<String>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub blockers: Vec<Blocker>,
    #[serde(default)]
    pub context: ScratchpadContext,
    #[serde(default)]
    pub iteration: IterationState,
    #[serde(default)]
    pub completed_agents: Vec<String>,
    #[serde(default)]
    pub injected_phases: VecDeque<Phase>,
}

impl Scratchpad {
    pub fn new(
        run_id: impl Into<String>,
        trace_id: impl Into<String>,
        objective: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            epic_id: None,
            trace_id: trace_id.into(),
            objective: objective.into(),
            status: RunStatus::InProgress,
            current_phase: None,
            current_agent: None,
            decisions: Vec::new(),
            blockers: Vec::new(),
            context: ScratchpadContext::default(),
            iteration: IterationState::default(),
            completed_agents: Vec::new(),
            injected_phases: VecDeque::new(),
        }
    }

    pub fn add_decision(
        &mut self,
        agent: impl Into<String>,
        decision: impl Into<String>,
        rationale: Option<String>,
    ) {
        self.decisions.push(Decision {
            ts: Utc::now(),
            agent: agent.into(),
            decision: decision.into(),
            rationale,
        });
    }

    pub fn add_blocker(&mut self, agent: impl Into<String>, text: impl Into<String>) {
        self.blockers.push(Blocker {
            ts: Utc::now(),
            agent: agent.into(),
            text: text.into(),
            status: BlockerStatus::Open,
            resolution: None,
        });
    }

    pub fn resolve_blocker(&mut self, text: &str, resolution: impl Into<String>) -> bool {
        for blocker in self.blockers.iter_mut() {
            if blocker.status == BlockerStatus::Open && blocker.text == text {
                blocker.status = BlockerStatus::Resolved;
                blocker.resolution = Some(resolution.into());
                return true;
            }
        }
        false
    }

    pub fn add_tech(&mut self, tech: impl Into<String>) {
        push_unique(&mut self.context.tech_stack, tech.into());
    }

    pub fn add_key_file(&mut self, path: impl Into<String>) {
        push_unique(&mut self.context.key_files, path.into());
    }

    pub fn add_pattern(&mut self, pattern: impl Into<String>) {
        push_unique(&mut self.context.patterns_established, pattern.into());
    }

    pub fn mark_agent_complete(&mut self, agent: &str) {
        push_unique(&mut self.completed_agents, agent.to_string());
        self.current_agent = None;
    }

    pub fn open_blockers(&self) -> Vec<&Blocker> {
        self.blockers
            .iter()
            .filter(|blocker| blocker.status == BlockerStatus::Open)
            .collect()
    }

    /// The projection injected into agent prompts: objective, status,
    /// current phase, last 5 decisions, open blockers, context, pending
    /// task titles, completed count.
    pub fn summary(&self) -> ScratchpadSummary {
        let decisions = self
            .decisions
            .iter()
            .rev()
            .take(5)
            .rev()
            .cloned()
            .collect();
        ScratchpadSummary {
            objective: self.objective.clone(),
            status: self.status,
            current_phase: self.current_phase.clone(),
            recent_decisions: decisions,
            open_blockers: self.open_blockers().into_iter().cloned().collect(),
            context: self.context.clone(),
            pending_tasks: self
                .injected_phases
                .iter()
                .map(|phase| phase.name.clone())
                .collect(),
            completed_count: self.completed_agents.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchpadSummary {
    pub objective: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    pub recent_decisions: Vec<Decision>,
    pub open_blockers: Vec<Blocker>,
    pub context: ScratchpadContext,
    pub pending_tasks: Vec<String>,
    pub completed_count: usize,
}

impl ScratchpadSummary {
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("## Run state\n\n");
        out.push_str(&format!("Objective: {}\n", self.objective));
        if let Some(phase) = &self.current_phase {
            out.push_str(&format!("Current phase: {}\n", phase));
        }
        out.push_str(&format!("Completed agents: {}\n", self.completed_count));
        if !self.recent_decisions.is_empty() {
            out.push_str("\nRecent decisions:\n");
            for decision in &self.recent_decisions {
                out.push_str(&format!("- [{}] {}\n", decision.agent, decision.decision));
            }
        }
        if !self.open_blockers.is_empty() {
            out.push_str("\nOpen blockers:\n");
            for blocker in &self.open_blockers {
                out.push_str(&format!("- [{}] {}\n", blocker.agent, blocker.text));
            }
        }
        if !self.context.tech_stack.is_empty() {
            out.push_str(&format!(
                "\nTech stack: {}\n",
                self.context.tech_stack.join(", ")
            ));
        }
        if !self.context.key_files.is_empty() {
            out.push_str(&format!("Key files: {}\n", self.context.key_files.join(", ")));
        }
        if !self.pending_tasks.is_empty() {
            out.push_str(&format!("Pending: {}\n", self.pending_tasks.join(", ")));
        }
        out
    }
}

fn push_unique(items: &mut Vec<String>, value: String) {
    if !items.iter().any(|existing| existing == &value) {
        items.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_fields_deduplicate_on_insert() {
        let mut pad = Scratchpad::new("run_1", "trace-1", "add /users endpoint");
        pad.add_tech("typescript");
        pad.add_tech("typescript");
        pad.add_key_file("src/api/users.ts");
        pad.add_key_file("src/api/users.ts");
        assert_eq!(pad.context.tech_stack.len(), 1);
        assert_eq!(pad.context.key_files.len(), 1);
    }

    #[test]
    fn summary_keeps_last_five_decisions_and_open_blockers() {
        let mut pad = Scratchpad::new("run_1", "trace-1", "obj");
        for i in 0..7 {
            pad.add_decision("architect", format!("decision {i}"), None);
        }
        pad.add_blocker("tester", "tests fail");
        pad.add_blocker("tester", "flaky CI");
        assert!(pad.resolve_blocker("flaky CI", "rerun"));

        let summary = pad.summary();
        assert_eq!(summary.recent_decisions.len(), 5);
        assert_eq!(summary.recent_decisions[0].decision, "decision 2");
        assert_eq!(summary.open_blockers.len(), 1);
        assert_eq!(summary.open_blockers[0].text, "tests fail");
    }

    #[test]
    fn injected_phases_are_fifo() {
        let mut pad = Scratchpad::new("run_1", "trace-1", "obj");
        pad.injected_phases
            .push_back(Phase::injected("extra_review", "reviewer", "many files"));
        pad.injected_phases
            .push_back(Phase::injected("security_review", "security", "high issues"));
        assert_eq!(pad.injected_phases.pop_front().expect("first").name, "extra_review");
        assert_eq!(
            pad.injected_phases.pop_front().expect("second").name,
            "security_review"
        );
    }
}
