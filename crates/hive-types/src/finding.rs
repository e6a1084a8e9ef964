use serde::{Deserialize, Serialize};

use crate::IssueFound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocker,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Lower rank is more severe.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Blocker => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "blocker" | "critical" => Severity::Blocker,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Open,
    InProgress,
    Fixed,
    Accepted,
    Deferred,
}

/// A review or security issue parsed out of an agent's self-evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub description: String,
    pub suggestion: String,
    pub status: FindingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
}

impl Finding {
    pub fn from_issue(source_agent: &str, issue: IssueFound) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: issue.title,
            severity: Severity::from_label(&issue.severity),
            category: issue.category,
            file: issue.file,
            line: issue.line,
            description: issue.description,
            suggestion: issue.suggestion,
            status: FindingStatus::Open,
            source_agent: Some(source_agent.to_string()),
        }
    }

    /// Merge key for de-duplicating findings across parallel reviewers.
    pub fn merge_key(&self) -> (String, Option<String>, Option<u32>) {
        (
            self.title.trim().to_ascii_lowercase(),
            self.file.clone(),
            self.line,
        )
    }
}

/// Union by merge key, keeping the highest severity per key.
pub fn merge_findings(batches: Vec<Vec<Finding>>) -> Vec<Finding> {
    let mut merged: Vec<Finding> = Vec::new();
    for finding in batches.into_iter().flatten() {
        if let Some(existing) = merged
            .iter_mut()
            .find(|candidate| candidate.merge_key() == finding.merge_key())
        {
            if finding.severity.rank() < existing.severity.rank() {
                *existing = finding;
            }
        } else {
            merged.push(finding);
        }
    }
    merged
}
