use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::HiveError;

pub const REPORT_START: &str = "<!--HIVE_REPORT";
pub const REPORT_END: &str = "HIVE_REPORT-->";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Complete,
    Partial,
    Blocked,
    Challenge,
}

/// A decision entry inside a self-evaluation. Agents emit either a bare
/// string or a `{decision, rationale}` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportDecision {
    Text(String),
    Detailed {
        decision: String,
        #[serde(default)]
        rationale: Option<String>,
    },
}

impl ReportDecision {
    pub fn decision(&self) -> &str {
        match self {
            ReportDecision::Text(text) => text,
            ReportDecision::Detailed { decision, .. } => decision,
        }
    }

    pub fn rationale(&self) -> Option<&str> {
        match self {
            ReportDecision::Text(_) => None,
            ReportDecision::Detailed { rationale, .. } => rationale.as_deref(),
        }
    }
}

/// An issue surfaced by a reviewer/security self-evaluation. Severity stays
/// a free string here; typed severities live on `Finding`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueFound {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub category: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

/// The HIVE_REPORT self-evaluation block an agent appends to its output.
/// Unknown fields are ignored; everything but `status` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfReport {
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "string_or_number_vec")]
    pub tasks_created: Vec<String>,
    #[serde(default, deserialize_with = "string_or_number_vec")]
    pub tasks_closed: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<ReportDecision>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_agent_hint: Option<String>,
    #[serde(default)]
    pub issues_found: Vec<IssueFound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenged_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl SelfReport {
    pub fn confidence_or(&self, fallback: f64) -> f64 {
        self.confidence.unwrap_or(fallback)
    }

    /// Issues at `critical` or `high` severity drive the adaptation engine.
    pub fn serious_issue_count(&self) -> usize {
        self.issues_found
            .iter()
            .filter(|issue| {
                let sev = issue.severity.to_ascii_lowercase();
                sev == "critical" || sev == "high"
            })
            .count()
    }
}

/// Pull the self-evaluation block out of raw agent output.
///
/// `Ok(None)` when no block is present (the caller falls back to contract
/// validation). `Err(SelfEvalParseError)` when a block exists but is not
/// parseable JSON or lacks a recognized `status` — also recoverable, the
/// runner falls back to the validator.
pub fn extract_report(output: &str) -> Result<Option<SelfReport>, HiveError> {
    let Some(start) = output.rfind(REPORT_START) else {
        return Ok(None);
    };
    let body = &output[start + REPORT_START.len()..];
    let Some(end) = body.find(REPORT_END) else {
        return Err(HiveError::SelfEvalParseError(
            "unterminated HIVE_REPORT block".to_string(),
        ));
    };
    let raw = body[..end].trim();
    serde_json::from_str::<SelfReport>(raw)
        .map(Some)
        .map_err(|err| HiveError::SelfEvalParseError(err.to_string()))
}

fn string_or_number_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .filter_map(|value| match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}
