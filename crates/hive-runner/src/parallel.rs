use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use hive_types::{merge_findings, Finding};

use crate::{AgentOutcome, AgentRunReport, AgentRunRequest, AgentRunner, TaskRef};

#[derive(Debug)]
pub struct ParallelReviewOutcome {
    pub results: Vec<AgentRunReport>,
    pub findings: Vec<Finding>,
}

/// Fan out review-type agents against the same diff. Each worker gets a
/// forked context (inherited trace, private span stack) and runs with
/// state application off; the orchestrator applies results after the join.
/// Failures are non-fatal here — the interpreter decides what a failed
/// required phase means.
pub async fn run_parallel_review(
    runner: &AgentRunner,
    agents: &[String],
    task: &str,
) -> ParallelReviewOutcome {
    let ctx = runner.context().clone();
    let cap = ctx.settings.max_parallel.max(1);
    let semaphore = Arc::new(Semaphore::new(cap));
    let mut join_set: JoinSet<AgentRunReport> = JoinSet::new();

    for agent in agents {
        let agent = agent.clone();
        let task = task.to_string();
        let worker_ctx = ctx.fork_for_worker();
        let worker = runner.for_worker(worker_ctx);
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let request = AgentRunRequest {
                agent: agent.clone(),
                task,
                ..AgentRunRequest::default()
            };
            match worker.run(request).await {
                Ok(report) => report,
                Err(err) => {
                    warn!(%agent, %err, "parallel review worker failed");
                    AgentRunReport {
                        agent,
                        outcome: AgentOutcome::Fail,
                        report: None,
                        attempts: 0,
                        output_path: None,
                        files_counted: 0,
                        duration_ms: 0,
                    }
                }
            }
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        if let Ok(report) = joined {
            results.push(report);
        }
    }

    let parallel_dir = ctx.paths.parallel_dir(&ctx.run_id);
    let _ = std::fs::create_dir_all(&parallel_dir);
    for result in &results {
        let _ = std::fs::write(
            parallel_dir.join(format!("{}.status", result.agent)),
            result.outcome.label(),
        );
        if let Some(output) = &result.output_path {
            let _ = std::fs::write(
                parallel_dir.join(format!("{}.output", result.agent)),
                output.display().to_string(),
            );
        }
    }

    // union findings across reviewers, highest severity wins per key
    let batches = results
        .iter()
        .filter_map(|result| result.report.as_ref().map(|report| (result, report)))
        .map(|(result, report)| {
            report
                .issues_found
                .iter()
                .cloned()
                .map(|issue| Finding::from_issue(&result.agent, issue))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let findings = merge_findings(batches);

    let _ = ctx.events.log_event(
        "parallel_review_complete",
        json!({
            "agents": results.iter().map(|r| r.agent.clone()).collect::<Vec<_>>(),
            "findings": findings.len(),
        }),
        None,
    );

    ParallelReviewOutcome { results, findings }
}

#[derive(Debug)]
pub struct WorktreeOutcome {
    pub task: TaskRef,
    pub success: bool,
    pub branch: String,
    pub worktree: PathBuf,
    pub report: Option<AgentRunReport>,
}

/// File-like tokens in a task description, used to refuse parallelizing
/// tasks that plausibly touch the same paths.
pub fn path_tokens(text: &str) -> HashSet<String> {
    let pattern = regex::Regex::new(r"[A-Za-z0-9_.\-]+(?:/[A-Za-z0-9_.\-]+)+|[A-Za-z0-9_\-]+\.[A-Za-z]{1,8}")
        .expect("static regex");
    pattern
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Split tasks into an independent set (no shared path tokens, no blocking
/// priority) and the rest, which stay sequential.
pub fn partition_independent(tasks: &[TaskRef]) -> (Vec<TaskRef>, Vec<TaskRef>) {
    let mut independent: Vec<TaskRef> = Vec::new();
    let mut deferred: Vec<TaskRef> = Vec::new();
    let mut claimed: Vec<HashSet<String>> = Vec::new();

    for task in tasks {
        if task.is_blocking() {
            deferred.push(task.clone());
            continue;
        }
        let tokens = path_tokens(&task.title);
        let overlaps = claimed
            .iter()
            .any(|existing| !existing.is_disjoint(&tokens));
        if overlaps {
            deferred.push(task.clone());
        } else {
            claimed.push(tokens);
            independent.push(task.clone());
        }
    }
    (independent, deferred)
}

/// Run one implementer per task inside an isolated git worktree on a fresh
/// `hive/task/<run>/<task_id>` branch. Success commits inside the copy;
/// failure leaves the worktree for inspection.
pub async fn run_parallel_worktrees(
    runner: &AgentRunner,
    tasks: Vec<TaskRef>,
) -> Vec<WorktreeOutcome> {
    let ctx = runner.context().clone();
    let cap = ctx.settings.max_parallel.max(1);
    let semaphore = Arc::new(Semaphore::new(cap));
    let mut join_set: JoinSet<WorktreeOutcome> = JoinSet::new();

    for task in tasks {
        let ctx = ctx.clone();
        let worker_ctx = ctx.fork_for_worker();
        let worker = runner.for_worker(worker_ctx);
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let branch = format!("hive/task/{}/{}", ctx.run_id, task.id);
            let worktree = ctx.paths.worktree_dir(&ctx.run_id, &task.id);

            if let Err(err) = add_worktree(&ctx.paths.project_root, &worktree, &branch).await {
                warn!(task = %task.id, %err, "failed to create worktree");
                return WorktreeOutcome {
                    task,
                    success: false,
                    branch,
                    worktree,
                    report: None,
                };
            }

            let request = AgentRunRequest {
                agent: "implementer".to_string(),
                task: format!("[{}] {}", task.id, task.title),
                workdir: Some(worktree.clone()),
                ..AgentRunRequest::default()
            };
            let report = match worker.run(request).await {
                Ok(report) => report,
                Err(err) => {
                    warn!(task = %task.id, %err, "worktree worker failed");
                    return WorktreeOutcome {
                        task,
                        success: false,
                        branch,
                        worktree,
                        report: None,
                    };
                }
            };

            let success = report.outcome.is_success();
            if success {
                if let Err(err) = commit_worktree(&worktree, &task).await {
                    warn!(task = %task.id, %err, "commit inside worktree failed");
                }
            }
            let parallel_dir = ctx.paths.parallel_dir(&ctx.run_id);
            let _ = std::fs::create_dir_all(&parallel_dir);
            let _ = std::fs::write(
                parallel_dir.join(format!("{}.worktree", task.id)),
                worktree.display().to_string(),
            );
            let _ = std::fs::write(
                parallel_dir.join(format!("{}.status", task.id)),
                if success { "complete" } else { "failed" },
            );
            info!(task = %task.id, success, "worktree worker finished");
            WorktreeOutcome {
                task,
                success,
                branch,
                worktree,
                report: Some(report),
            }
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        if let Ok(outcome) = joined {
            let _ = ctx.events.log_event(
                "worktree_complete",
                json!({
                    "task": outcome.task.id,
                    "branch": outcome.branch,
                    "success": outcome.success,
                }),
                None,
            );
            outcomes.push(outcome);
        }
    }
    outcomes
}

async fn add_worktree(
    project_root: &std::path::Path,
    worktree: &std::path::Path,
    branch: &str,
) -> anyhow::Result<()> {
    if let Some(parent) = worktree.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let status = Command::new("git")
        .arg("-C")
        .arg(project_root)
        .arg("worktree")
        .arg("add")
        .arg(worktree)
        .arg("-b")
        .arg(branch)
        .status()
        .await?;
    anyhow::ensure!(status.success(), "git worktree add exited with {status}");
    Ok(())
}

async fn commit_worktree(worktree: &std::path::Path, task: &TaskRef) -> anyhow::Result<()> {
    let add = Command::new("git")
        .arg("-C")
        .arg(worktree)
        .args(["add", "-A"])
        .status()
        .await?;
    anyhow::ensure!(add.success(), "git add exited with {add}");
    let commit = Command::new("git")
        .arg("-C")
        .arg(worktree)
        .args(["commit", "-m"])
        .arg(format!("{}: {}", task.id, task.title))
        .status()
        .await?;
    anyhow::ensure!(commit.success(), "git commit exited with {commit}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NullTracker, StubInvoker};
    use hive_core::{RunContext, RunSettings};
    use hive_types::{Run, Scratchpad, REPORT_END, REPORT_START};

    #[test]
    fn path_tokens_find_file_like_strings() {
        let tokens = path_tokens("update src/api/users.ts and fix auth.md plus the readme");
        assert!(tokens.contains("src/api/users.ts"));
        assert!(tokens.contains("auth.md"));
        assert!(!tokens.contains("readme"));
    }

    #[test]
    fn overlapping_tasks_are_not_parallelized() {
        let tasks = vec![
            TaskRef::new("t-1", "refactor src/api/users.ts handlers"),
            TaskRef::new("t-2", "document src/api/users.ts endpoints"),
            TaskRef::new("t-3", "tune build.rs caching"),
        ];
        let (independent, deferred) = partition_independent(&tasks);
        assert_eq!(independent.len(), 2);
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].id, "t-2");
    }

    #[test]
    fn blocking_tasks_stay_sequential() {
        let mut p0 = TaskRef::new("t-1", "hotfix outage");
        p0.priority = Some("P0".to_string());
        let (independent, deferred) = partition_independent(&[p0]);
        assert!(independent.is_empty());
        assert_eq!(deferred.len(), 1);
    }

    #[tokio::test]
    async fn parallel_review_merges_findings_and_preserves_reports() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = Run::new("add /users endpoint", "review");
        let ctx = RunContext::bootstrap(temp.path(), &run, RunSettings::default())
            .expect("bootstrap");
        ctx.scratchpad_store()
            .create(&Scratchpad::new(&ctx.run_id, ctx.trace.trace_id(), &ctx.objective))
            .expect("scratchpad");

        let stub = Arc::new(StubInvoker::new());
        stub.push_output(format!(
            "{REPORT_START}\n{}\n{REPORT_END}",
            r#"{"status":"complete","confidence":0.9,"issues_found":[{"severity":"medium","category":"correctness","title":"Missing validation","file":"src/api/users.ts","line":17,"description":"","suggestion":""}]}"#
        ));
        stub.push_output(format!(
            "{REPORT_START}\n{}\n{REPORT_END}",
            r#"{"status":"complete","confidence":0.9,"issues_found":[{"severity":"critical","category":"security","title":"missing validation","file":"src/api/users.ts","line":17,"description":"","suggestion":""}]}"#
        ));

        let runner = AgentRunner::new(ctx.clone(), stub, Arc::new(NullTracker));
        let outcome = run_parallel_review(
            &runner,
            &["reviewer".to_string(), "security".to_string()],
            "review the diff",
        )
        .await;

        assert_eq!(outcome.results.len(), 2);
        // per-agent reports preserved for the adaptation engine
        assert!(outcome.results.iter().all(|r| r.report.is_some()));
        // merged by (title, file, line), highest severity kept
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].severity, hive_types::Severity::Blocker);

        // workers never mutate the parent scratchpad
        let pad = ctx.scratchpad_store().load().expect("pad");
        assert!(pad.completed_agents.is_empty());
    }
}
