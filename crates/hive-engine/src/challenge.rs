use chrono::Utc;
use serde_json::json;
use tracing::info;

use hive_memory::ChallengeRecord;
use hive_runner::{AgentOutcome, AgentRunRequest, AgentRunner, ChallengeInfo};
use hive_types::{ReportStatus, SelfReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Resolved,
    Escalated,
}

#[derive(Debug)]
pub struct ChallengeOutcome {
    pub state: ChallengeState,
    pub attempts: u32,
    pub category: String,
}

/// Drive one challenge to resolution: re-run the challenged agent with a
/// challenge-response prompt, bounded by `max_attempts`; a counter-challenge,
/// an exhausted pair budget, or exhaustion escalates to a human decision
/// point. Every terminal transition lands in challenge history and pair
/// performance.
pub async fn resolve_challenge(
    runner: &AgentRunner,
    info: &ChallengeInfo,
    max_attempts: u32,
    pair_challenges: u32,
    max_pair_challenges: u32,
) -> anyhow::Result<ChallengeOutcome> {
    let ctx = runner.context().clone();
    let category = categorize_issue(&info.issue);
    let _ = ctx.events.log_event(
        "challenge_start",
        json!({
            "from": info.from,
            "to": info.to,
            "issue": info.issue,
            "category": category,
        }),
        None,
    );

    // a pair that keeps challenging is past arbitration
    if pair_challenges > max_pair_challenges {
        return finish(runner, info, &category, ChallengeState::Escalated, 0);
    }

    let mut prior_feedback = String::new();
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let response_task = challenge_response_task(info, attempt, max_attempts, &prior_feedback);
        let response = runner
            .run(AgentRunRequest {
                agent: info.to.clone(),
                task: response_task,
                ..AgentRunRequest::default()
            })
            .await?;

        match &response.outcome {
            AgentOutcome::Challenge(counter) => {
                info!(from = %info.from, to = %info.to, counter = %counter.to, "counter-challenge, escalating");
                return Ok(finish(
                    runner,
                    info,
                    &category,
                    ChallengeState::Escalated,
                    attempt,
                )?);
            }
            outcome if outcome.is_success() => {
                let validates = response
                    .report
                    .as_ref()
                    .map(|report| response_validates_issue(report, info))
                    .unwrap_or(false);
                if validates {
                    // confirmation pass: the challenger reviews the response once
                    let confirm = runner
                        .run(AgentRunRequest {
                            agent: info.from.clone(),
                            task: format!(
                                "You previously challenged {} over: {}\n\
                                 The agent has responded. Re-review and confirm whether the \
                                 issue is resolved.",
                                info.to, info.issue
                            ),
                            ..AgentRunRequest::default()
                        })
                        .await?;
                    if !matches!(confirm.outcome, AgentOutcome::Challenge(_)) {
                        return Ok(finish(
                            runner,
                            info,
                            &category,
                            ChallengeState::Resolved,
                            attempt,
                        )?);
                    }
                    prior_feedback =
                        format!("the challenger re-reviewed and still objects: {}", info.issue);
                } else {
                    prior_feedback = format!(
                        "your response did not address the challenged issue: {}",
                        info.issue
                    );
                }
            }
            _ => {
                prior_feedback = "your challenge response did not complete".to_string();
            }
        }
    }

    Ok(finish(
        runner,
        info,
        &category,
        ChallengeState::Escalated,
        max_attempts,
    )?)
}

fn finish(
    runner: &AgentRunner,
    info: &ChallengeInfo,
    category: &str,
    state: ChallengeState,
    attempts: u32,
) -> anyhow::Result<ChallengeOutcome> {
    let ctx = runner.context();
    let resolution = match state {
        ChallengeState::Resolved => "resolved",
        ChallengeState::Escalated => "escalated",
    };
    runner.memory().update(|memory| {
        memory.record_challenge(ChallengeRecord {
            ts: Utc::now(),
            from: info.from.clone(),
            to: info.to.clone(),
            category: category.to_string(),
            issue: info.issue.clone(),
            resolution: resolution.to_string(),
        });
    })?;
    let event = match state {
        ChallengeState::Resolved => "challenge_resolved",
        ChallengeState::Escalated => "challenge_unresolved",
    };
    let _ = ctx.events.log_event(
        event,
        json!({
            "from": info.from,
            "to": info.to,
            "attempts": attempts,
            "category": category,
        }),
        None,
    );
    Ok(ChallengeOutcome {
        state,
        attempts,
        category: category.to_string(),
    })
}

fn challenge_response_task(
    info: &ChallengeInfo,
    attempt: u32,
    max_attempts: u32,
    prior_feedback: &str,
) -> String {
    let mut task = format!(
        "Challenge response (attempt {attempt} of {max_attempts}).\n\
         Agent `{}` has challenged your earlier work.\n\
         Issue: {}\n\
         Suggestion: {}\n\
         Evidence: {}\n\
         Address the issue directly. If you modified files, list them; \
         summarize how your change resolves the objection.",
        info.from, info.issue, info.suggestion, info.evidence
    );
    if !prior_feedback.is_empty() {
        task.push_str(&format!("\n\nPrevious attempt failed: {prior_feedback}"));
    }
    task
}

/// The "response validates the issue" predicate: a successful report that
/// either touched the file named in the evidence or speaks to the issue's
/// key words in its summary or decisions.
pub fn response_validates_issue(report: &SelfReport, info: &ChallengeInfo) -> bool {
    if !matches!(report.status, ReportStatus::Complete | ReportStatus::Partial) {
        return false;
    }

    if let Some(path) = evidence_path(&info.evidence) {
        if report
            .files_modified
            .iter()
            .any(|file| file == &path || file.ends_with(&path) || path.ends_with(file.as_str()))
        {
            return true;
        }
    }

    let keywords = issue_keywords(&info.issue);
    if keywords.is_empty() {
        return false;
    }
    let mut haystack = report.summary.clone().unwrap_or_default().to_lowercase();
    for decision in &report.decisions {
        haystack.push(' ');
        haystack.push_str(&decision.decision().to_lowercase());
    }
    keywords
        .iter()
        .any(|keyword| haystack.contains(keyword.as_str()))
}

fn evidence_path(evidence: &str) -> Option<String> {
    let candidate = evidence.split_whitespace().find(|token| {
        token.contains('/') || token.contains('.')
    })?;
    let path = candidate.split(':').next().unwrap_or(candidate);
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

fn issue_keywords(issue: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in issue.to_lowercase().split_whitespace() {
        if word.len() >= 4 && word.chars().all(|c| c.is_ascii_alphabetic()) {
            if !words.iter().any(|existing| existing.as_str() == word) {
                words.push(word.to_string());
            }
        }
        if words.len() == 3 {
            break;
        }
    }
    words
}

/// Coarse categorization of a challenge for history and postmortems.
pub fn categorize_issue(issue: &str) -> String {
    let lowered = issue.to_lowercase();
    if lowered.contains("missing") || lowered.contains("absent") || lowered.contains("forgot") {
        "missing_code"
    } else if lowered.contains("build") || lowered.contains("compile") {
        "broken_build"
    } else if lowered.contains("security") || lowered.contains("vulnerab") || lowered.contains("inject") {
        "security"
    } else if lowered.contains("wrong") || lowered.contains("incorrect") || lowered.contains("broken") {
        "wrong_approach"
    } else {
        "quality"
    }
    .to_string()
}
