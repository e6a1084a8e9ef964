use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;
pub const AGENT_HISTORY_LIMIT: usize = 50;
pub const CHALLENGE_HISTORY_LIMIT: usize = 100;
pub const SKIP_PATTERNS_LIMIT: usize = 20;
pub const SKIP_MAX_CHALLENGE_RATE: f64 = 0.05;

/// Scalar facts about the project, filled once by the detector and never
/// overwritten when already present.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectFacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunRecord {
    pub ts: DateTime<Utc>,
    pub agent: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Running averages per agent, updated with
/// `avg ← (avg·runs + x) / (runs + 1)`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentCostAvg {
    pub input_tokens: f64,
    pub output_tokens: f64,
    pub cost: f64,
    pub runs: u32,
}

impl AgentCostAvg {
    pub fn record(&mut self, input_tokens: f64, output_tokens: f64, cost: f64) {
        let runs = self.runs as f64;
        self.input_tokens = (self.input_tokens * runs + input_tokens) / (runs + 1.0);
        self.output_tokens = (self.output_tokens * runs + output_tokens) / (runs + 1.0);
        self.cost = (self.cost * runs + cost) / (runs + 1.0);
        self.runs += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipPattern {
    pub pattern: String,
    pub samples: u32,
    pub successes: u32,
    pub challenges: u32,
    pub success_rate: f64,
    pub challenge_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentSkipPatterns {
    pub patterns: Vec<SkipPattern>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PairStats {
    pub runs: u32,
    pub challenges: u32,
    pub challenge_rate: f64,
    pub resolved: u32,
    pub escalated: u32,
}

/// Aggregated outcome statistics for one agent across runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentPattern {
    pub runs: u32,
    pub avg_confidence: f64,
    #[serde(default)]
    pub statuses: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub ts: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub category: String,
    pub issue: String,
    pub resolution: String,
}

/// The one-per-project learning document (`memory.json`). Set-typed fields
/// are deduplicated ordered arrays; ring buffers trim from the front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMemory {
    pub schema_version: u32,
    #[serde(default)]
    pub facts: ProjectFacts,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub conventions: Vec<String>,
    #[serde(default)]
    pub gotchas: Vec<String>,
    #[serde(default)]
    pub file_map: BTreeMap<String, String>,
    #[serde(default)]
    pub agent_history: Vec<AgentRunRecord>,
    #[serde(default)]
    pub agent_costs: BTreeMap<String, AgentCostAvg>,
    #[serde(default)]
    pub skip_patterns: BTreeMap<String, AgentSkipPatterns>,
    #[serde(default)]
    pub pair_performance: BTreeMap<String, PairStats>,
    #[serde(default)]
    pub agent_patterns: BTreeMap<String, AgentPattern>,
    #[serde(default)]
    pub challenge_history: Vec<ChallengeRecord>,
}

impl Default for ProjectMemory {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            facts: ProjectFacts::default(),
            tech_stack: Vec::new(),
            conventions: Vec::new(),
            gotchas: Vec::new(),
            file_map: BTreeMap::new(),
            agent_history: Vec::new(),
            agent_costs: BTreeMap::new(),
            skip_patterns: BTreeMap::new(),
            pair_performance: BTreeMap::new(),
            agent_patterns: BTreeMap::new(),
            challenge_history: Vec::new(),
        }
    }
}

impl ProjectMemory {
    pub fn add_tech(&mut self, tech: impl Into<String>) {
        push_unique(&mut self.tech_stack, tech.into());
    }

    pub fn add_convention(&mut self, convention: impl Into<String>) {
        push_unique(&mut self.conventions, convention.into());
    }

    pub fn add_gotcha(&mut self, gotcha: impl Into<String>) {
        push_unique(&mut self.gotchas, gotcha.into());
    }

    pub fn set_file_purpose(&mut self, path: impl Into<String>, purpose: impl Into<String>) {
        self.file_map.insert(path.into(), purpose.into());
    }

    pub fn record_agent_run(
        &mut self,
        agent: &str,
        status: &str,
        confidence: Option<f64>,
        summary: Option<String>,
    ) {
        self.agent_history.push(AgentRunRecord {
            ts: Utc::now(),
            agent: agent.to_string(),
            status: status.to_string(),
            confidence,
            summary,
        });
        trim_front(&mut self.agent_history, AGENT_HISTORY_LIMIT);

        let pattern = self.agent_patterns.entry(agent.to_string()).or_default();
        if let Some(confidence) = confidence {
            let runs = pattern.runs as f64;
            pattern.avg_confidence = (pattern.avg_confidence * runs + confidence) / (runs + 1.0);
        }
        pattern.runs += 1;
        *pattern.statuses.entry(status.to_string()).or_insert(0) += 1;
    }

    pub fn record_cost(&mut self, agent: &str, input_tokens: u64, output_tokens: u64, cost: f64) {
        self.agent_costs
            .entry(agent.to_string())
            .or_default()
            .record(input_tokens as f64, output_tokens as f64, cost);
    }

    pub fn estimated_cost(&self, agent: &str) -> Option<f64> {
        self.agent_costs
            .get(agent)
            .filter(|avg| avg.runs > 0)
            .map(|avg| avg.cost)
    }

    /// Record one outcome against the (agent, objective word-bag) row.
    pub fn record_skip_outcome(
        &mut self,
        agent: &str,
        objective: &str,
        success: bool,
        challenged: bool,
    ) {
        let pattern = word_bag(objective);
        if pattern.is_empty() {
            return;
        }
        let rows = self.skip_patterns.entry(agent.to_string()).or_default();
        let row = match rows.patterns.iter_mut().position(|row| row.pattern == pattern) {
            Some(index) => &mut rows.patterns[index],
            None => {
                if rows.patterns.len() >= SKIP_PATTERNS_LIMIT {
                    rows.patterns.remove(0);
                }
                rows.patterns.push(SkipPattern {
                    pattern,
                    samples: 0,
                    successes: 0,
                    challenges: 0,
                    success_rate: 0.0,
                    challenge_rate: 0.0,
                });
                rows.patterns.last_mut().expect("just pushed")
            }
        };
        row.samples += 1;
        if success {
            row.successes += 1;
        }
        if challenged {
            row.challenges += 1;
        }
        row.success_rate = row.successes as f64 / row.samples as f64;
        row.challenge_rate = row.challenges as f64 / row.samples as f64;
    }

    /// The predictive-skip gate. True only when the matching pattern row has
    /// enough samples, a high enough success rate, and a low challenge rate.
    pub fn is_skip_safe(
        &self,
        agent: &str,
        objective: &str,
        min_samples: u32,
        success_threshold: f64,
    ) -> bool {
        let pattern = word_bag(objective);
        let Some(rows) = self.skip_patterns.get(agent) else {
            return false;
        };
        rows.patterns
            .iter()
            .find(|row| row.pattern == pattern)
            .map(|row| {
                row.samples >= min_samples
                    && row.success_rate >= success_threshold
                    && row.challenge_rate <= SKIP_MAX_CHALLENGE_RATE
            })
            .unwrap_or(false)
    }

    pub fn record_pair_run(&mut self, from: &str, to: &str, challenged: bool) {
        let stats = self
            .pair_performance
            .entry(pair_key(from, to))
            .or_default();
        stats.runs += 1;
        if challenged {
            stats.challenges += 1;
        }
        stats.challenge_rate = stats.challenges as f64 / stats.runs as f64;
    }

    pub fn pair_stats(&self, from: &str, to: &str) -> Option<&PairStats> {
        self.pair_performance.get(&pair_key(from, to))
    }

    /// Append to challenge history (ring ≤ 100) and bump the pair's
    /// resolved/escalated counter.
    pub fn record_challenge(&mut self, record: ChallengeRecord) {
        let stats = self
            .pair_performance
            .entry(pair_key(&record.from, &record.to))
            .or_default();
        match record.resolution.as_str() {
            "resolved" => stats.resolved += 1,
            "escalated" => stats.escalated += 1,
            _ => {}
        }
        self.challenge_history.push(record);
        trim_front(&mut self.challenge_history, CHALLENGE_HISTORY_LIMIT);
    }

    pub fn challenges_against(&self, agent: &str) -> Vec<&ChallengeRecord> {
        self.challenge_history
            .iter()
            .filter(|record| record.to == agent)
            .collect()
    }

    /// Compact markdown digest injected into prompts.
    pub fn render_markdown(&self) -> String {
        let mut out = String::from("## Project memory\n\n");
        if let Some(name) = &self.facts.name {
            out.push_str(&format!("Project: {name}\n"));
        }
        if let Some(language) = &self.facts.language {
            out.push_str(&format!("Language: {language}\n"));
        }
        if let Some(framework) = &self.facts.framework {
            out.push_str(&format!("Framework: {framework}\n"));
        }
        if let Some(build) = &self.facts.build_command {
            out.push_str(&format!("Build: {build}\n"));
        }
        if let Some(test) = &self.facts.test_command {
            out.push_str(&format!("Test: {test}\n"));
        }
        if !self.tech_stack.is_empty() {
            out.push_str(&format!("Tech stack: {}\n", self.tech_stack.join(", ")));
        }
        if !self.conventions.is_empty() {
            out.push_str("\nConventions:\n");
            for convention in &self.conventions {
                out.push_str(&format!("- {convention}\n"));
            }
        }
        if !self.gotchas.is_empty() {
            out.push_str("\nGotchas:\n");
            for gotcha in &self.gotchas {
                out.push_str(&format!("- {gotcha}\n"));
            }
        }
        out
    }

    /// Recent history digest for one agent, for its own prompt.
    pub fn render_agent_history(&self, agent: &str) -> String {
        let recent: Vec<&AgentRunRecord> = self
            .agent_history
            .iter()
            .filter(|record| record.agent == agent)
            .rev()
            .take(5)
            .collect();
        if recent.is_empty() {
            return String::new();
        }
        let mut out = format!("## Your recent runs ({agent})\n\n");
        for record in recent.into_iter().rev() {
            let summary = record.summary.as_deref().unwrap_or("");
            out.push_str(&format!("- {}: {}\n", record.status, summary));
        }
        out
    }
}

/// Word-bag pattern key: lowercase, alphabetic words of length ≥ 4, first
/// 3 unique, joined by spaces.
pub fn word_bag(objective: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    for word in objective.to_lowercase().split_whitespace() {
        if word.len() < 4 || !word.chars().all(|c| c.is_ascii_alphabetic()) {
            continue;
        }
        if !words.iter().any(|existing| existing.as_str() == word) {
            words.push(word.to_string());
        }
        if words.len() == 3 {
            break;
        }
    }
    words.join(" ")
}

pub fn pair_key(from: &str, to: &str) -> String {
    format!("{from}->{to}")
}

fn push_unique(items: &mut Vec<String>, value: String) {
    if !items.iter().any(|existing| existing == &value) {
        items.push(value);
    }
}

fn trim_front<T>(items: &mut Vec<T>, limit: usize) {
    if items.len() > limit {
        let excess = items.len() - limit;
        items.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_bag_takes_first_three_unique_alphabetic_words() {
        assert_eq!(word_bag("Docs readme update pass"), "docs readme update");
        assert_eq!(word_bag("fix fix fix the bug #123"), "");
        assert_eq!(word_bag("update UPDATE config values"), "update config values");
    }

    #[test]
    fn skip_gate_requires_all_three_thresholds() {
        let mut memory = ProjectMemory::default();
        for _ in 0..12 {
            memory.record_skip_outcome("reviewer", "docs readme update", true, false);
        }
        assert!(memory.is_skip_safe("reviewer", "docs readme update", 10, 0.95));

        // violate challenge rate
        let mut challenged = memory.clone();
        challenged.record_skip_outcome("reviewer", "docs readme update", true, true);
        assert!(!challenged.is_skip_safe("reviewer", "docs readme update", 10, 0.95));

        // violate success rate
        let mut failed = memory.clone();
        failed.record_skip_outcome("reviewer", "docs readme update", false, false);
        assert!(!failed.is_skip_safe("reviewer", "docs readme update", 10, 0.95));

        // violate sample count
        assert!(!memory.is_skip_safe("reviewer", "docs readme update", 13, 0.95));
    }

    #[test]
    fn skip_pattern_rows_are_bounded_per_agent() {
        let mut memory = ProjectMemory::default();
        for i in 0..25 {
            let objective = format!("alpha{i:02} beta{i:02} gamma{i:02} delta");
            // pad words to length >= 4 and purely alphabetic
            let objective = objective.replace(|c: char| c.is_ascii_digit(), "x");
            memory.record_skip_outcome("reviewer", &objective, true, false);
        }
        assert!(memory.skip_patterns["reviewer"].patterns.len() <= SKIP_PATTERNS_LIMIT);
    }

    #[test]
    fn rings_trim_from_the_front() {
        let mut memory = ProjectMemory::default();
        for i in 0..60 {
            memory.record_agent_run("implementer", "complete", Some(0.9), Some(format!("run {i}")));
        }
        assert_eq!(memory.agent_history.len(), AGENT_HISTORY_LIMIT);
        assert_eq!(
            memory.agent_history[0].summary.as_deref(),
            Some("run 10")
        );

        for i in 0..120 {
            memory.record_challenge(ChallengeRecord {
                ts: Utc::now(),
                from: "reviewer".to_string(),
                to: "implementer".to_string(),
                category: "missing_code".to_string(),
                issue: format!("issue {i}"),
                resolution: "resolved".to_string(),
            });
        }
        assert_eq!(memory.challenge_history.len(), CHALLENGE_HISTORY_LIMIT);
        assert_eq!(memory.challenge_history[0].issue, "issue 20");
    }

    #[test]
    fn set_additions_are_idempotent() {
        let mut memory = ProjectMemory::default();
        memory.add_convention("use conventional commits");
        memory.add_convention("use conventional commits");
        memory.add_gotcha("CI needs NODE_ENV=test");
        memory.add_gotcha("CI needs NODE_ENV=test");
        memory.add_tech("rust");
        memory.add_tech("rust");
        assert_eq!(memory.conventions.len(), 1);
        assert_eq!(memory.gotchas.len(), 1);
        assert_eq!(memory.tech_stack.len(), 1);
    }

    #[test]
    fn cost_running_average_follows_formula() {
        let mut avg = AgentCostAvg::default();
        avg.record(100.0, 50.0, 1.0);
        avg.record(300.0, 150.0, 3.0);
        assert!((avg.input_tokens - 200.0).abs() < 1e-9);
        assert!((avg.cost - 2.0).abs() < 1e-9);
        assert_eq!(avg.runs, 2);
    }

    #[test]
    fn challenge_resolution_updates_pair_counters() {
        let mut memory = ProjectMemory::default();
        memory.record_pair_run("reviewer", "implementer", true);
        memory.record_challenge(ChallengeRecord {
            ts: Utc::now(),
            from: "reviewer".to_string(),
            to: "implementer".to_string(),
            category: "missing_code".to_string(),
            issue: "missing input validation".to_string(),
            resolution: "resolved".to_string(),
        });
        let stats = memory.pair_stats("reviewer", "implementer").expect("stats");
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.challenges, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.escalated, 0);
    }
}
