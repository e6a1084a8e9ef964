use thiserror::Error;

/// The failure taxonomy of the engine. Recoverable variants
/// (`SelfEvalParseError`, `ValidationFailed`) are retried inside the agent
/// runner; the rest become phase outcomes or abort the run.
#[derive(Debug, Error)]
pub enum HiveError {
    #[error("no prompt found for agent `{0}`")]
    AgentNotFound(String),

    #[error("agent subprocess invocation failed: {0}")]
    PromptInvocationFailed(String),

    #[error("self-evaluation block could not be parsed: {0}")]
    SelfEvalParseError(String),

    #[error("contract validation failed: {0}")]
    ValidationFailed(String),

    #[error("no contract defined for agent `{0}`")]
    ContractMissing(String),

    #[error("agent `{agent}` reported blocked: {reason}")]
    BlockedByAgent { agent: String, reason: String },

    #[error("challenge from `{from}` against `{to}` unresolved after {attempts} attempts")]
    ChallengeUnresolved {
        from: String,
        to: String,
        attempts: u32,
    },

    #[error("budget exceeded: spent ${spent:.4} of ${budget:.4}")]
    BudgetExceeded { spent: f64, budget: f64 },

    #[error("workflow composition error: {0}")]
    CompositionError(String),

    #[error("checkpoint `{0}` is corrupt")]
    CheckpointCorrupt(String),

    #[error("handoff `{0}` not found")]
    HandoffMissing(String),

    #[error("event log write failed: {0}")]
    LogWriteError(String),

    #[error("span `{0}` not found")]
    SpanNotFound(String),
}
