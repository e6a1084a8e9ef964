use serde::{Deserialize, Serialize};

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_template: Option<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            feedback_template: None,
        }
    }
}

/// Per-agent contract: declared I/O, named pre/post checks, retry and
/// escalation policy. Checks are resolved by name against the closed
/// validator set; unknown names pass as skipped.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Contract {
    pub agent: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub pre_checks: Vec<String>,
    #[serde(default)]
    pub post_checks: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_defaults_to_three_attempts() {
        let contract: Contract =
            serde_json::from_str(r#"{"agent":"implementer"}"#).expect("parse");
        assert_eq!(contract.retry.max_attempts, 3);
        assert!(contract.post_checks.is_empty());
    }
}
