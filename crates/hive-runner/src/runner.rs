use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

use hive_core::{
    checkpoint_for, estimate_tokens, global_agents_dir, RunContext, ScratchpadStore,
};
use hive_memory::MemoryStore;
use hive_types::{
    extract_report, Contract, Handoff, HiveError, ReportStatus, ResumeAction, SelfReport,
};

use crate::{
    curate, render_ready_tasks, resolve_prompt, substitute, AgentInvoker, CheckContext,
    CurationInput, InvokeRequest, TaskTracker,
};

/// The block every prompt ends with, instructing the agent to self-evaluate.
pub const SELF_EVAL_INSTRUCTIONS: &str = r#"## Required self-evaluation

End your output with exactly one report block in this form:

<!--HIVE_REPORT
{ "status": "complete|partial|blocked|challenge",
  "confidence": 0.0,
  "tasks_created": [], "tasks_closed": [],
  "files_modified": [], "decisions": [],
  "blockers": [], "summary": "",
  "issues_found": [],
  "challenged_agent": "", "issue": "", "suggestion": "", "evidence": "" }
HIVE_REPORT-->

Use `challenge` only when a prior agent's work is blocking-defective, and
name that agent in `challenged_agent` with concrete `evidence`."#;

#[derive(Debug, Clone)]
pub struct ChallengeInfo {
    pub from: String,
    pub to: String,
    pub issue: String,
    pub suggestion: String,
    pub evidence: String,
}

#[derive(Debug, Clone)]
pub enum AgentOutcome {
    Pass,
    PassLowConfidence,
    Partial,
    Blocked,
    Challenge(ChallengeInfo),
    Fail,
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            AgentOutcome::Pass | AgentOutcome::PassLowConfidence | AgentOutcome::Partial
        )
    }

    /// Runner-internal exit code: 0 success, 1 failure, 2 challenge.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentOutcome::Pass | AgentOutcome::PassLowConfidence | AgentOutcome::Partial => 0,
            AgentOutcome::Blocked | AgentOutcome::Fail => 1,
            AgentOutcome::Challenge(_) => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgentOutcome::Pass => "pass",
            AgentOutcome::PassLowConfidence => "pass_low_confidence",
            AgentOutcome::Partial => "partial",
            AgentOutcome::Blocked => "blocked",
            AgentOutcome::Challenge(_) => "challenge",
            AgentOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentRunReport {
    pub agent: String,
    pub outcome: AgentOutcome,
    pub report: Option<SelfReport>,
    pub attempts: u32,
    pub output_path: Option<PathBuf>,
    pub files_counted: usize,
    pub duration_ms: u64,
}

/// Full request shape; `run_agent_with_validation(agent, task, handoff_id)`
/// builds one from its narrower arguments.
#[derive(Debug, Clone, Default)]
pub struct AgentRunRequest {
    pub agent: String,
    pub task: String,
    pub handoff: Option<Handoff>,
    pub extra_context: Option<String>,
    pub warnings: Vec<String>,
    pub workdir: Option<std::path::PathBuf>,
}

pub struct AgentRunner {
    ctx: RunContext,
    invoker: Arc<dyn AgentInvoker>,
    tracker: Arc<dyn TaskTracker>,
    memory: MemoryStore,
    contracts: HashMap<String, Contract>,
    /// Workers run with this off: they return results and the orchestrator
    /// applies them after the join, so parent state is never raced.
    apply_state: bool,
}

impl AgentRunner {
    pub fn new(
        ctx: RunContext,
        invoker: Arc<dyn AgentInvoker>,
        tracker: Arc<dyn TaskTracker>,
    ) -> Self {
        let memory = MemoryStore::new(&ctx.paths.memory_path);
        Self {
            ctx,
            invoker,
            tracker,
            memory,
            contracts: HashMap::new(),
            apply_state: true,
        }
    }

    pub fn with_contracts(mut self, contracts: Vec<Contract>) -> Self {
        for contract in contracts {
            self.contracts.insert(contract.agent.clone(), contract);
        }
        self
    }

    /// Clone of this runner bound to a worker context.
    pub fn for_worker(&self, ctx: RunContext) -> Self {
        Self {
            memory: MemoryStore::new(&ctx.paths.memory_path),
            ctx,
            invoker: self.invoker.clone(),
            tracker: self.tracker.clone(),
            contracts: self.contracts.clone(),
            apply_state: false,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Resolve the handoff by id, then run the agent.
    pub async fn run_agent_with_validation(
        &self,
        agent: &str,
        task: &str,
        handoff_id: Option<&str>,
    ) -> anyhow::Result<AgentRunReport> {
        let handoff = match handoff_id {
            Some(id) => Some(self.ctx.handoff_store().get(id)?),
            None => None,
        };
        self.run(AgentRunRequest {
            agent: agent.to_string(),
            task: task.to_string(),
            handoff,
            ..AgentRunRequest::default()
        })
        .await
    }

    pub async fn run(&self, request: AgentRunRequest) -> anyhow::Result<AgentRunReport> {
        let agent = request.agent.clone();
        let contract = self
            .contracts
            .get(&agent)
            .cloned()
            .unwrap_or_else(|| Contract {
                agent: agent.clone(),
                ..Contract::default()
            });
        let max_attempts = contract.retry.max_attempts.max(1);

        let memory_doc = self.memory.load()?;
        let prompt = resolve_prompt(
            &agent,
            memory_doc.facts.framework.as_deref(),
            &self.ctx.paths.agents_dir,
            global_agents_dir().as_deref(),
        )?;

        let handoff = match &request.handoff {
            Some(handoff) => Some(self.ctx.handoff_store().mark_received(&handoff.id)?),
            None => None,
        };

        let span = self.ctx.trace.span_start("agent.run");
        let _ = self.ctx.trace.span_add_tag(&span, "agent", &agent);

        let scratchpad = self.ctx.scratchpad_store();
        if self.apply_state {
            scratchpad.update(|pad| {
                pad.current_agent = Some(agent.clone());
                pad.iteration.phase = pad.current_phase.clone();
                pad.iteration.attempt = 0;
                pad.iteration.max_attempts = max_attempts;
            })?;
        }

        let epic_id = self.ctx.epic_id.clone().unwrap_or_default();
        let system = substitute(
            &prompt.body,
            &[("EPIC_ID", epic_id.as_str()), ("OBJECTIVE", &self.ctx.objective)],
        );
        let curation = self.curation_input(&agent, &memory_doc, handoff.clone(), &request).await;
        let context_block = curate(&agent, &curation);

        let mut feedback: Option<String> = None;
        let mut total_duration = 0u64;
        let mut last_output_path = None;
        let mut last_files_counted = 0usize;

        for attempt in 1..=max_attempts {
            if self.apply_state {
                scratchpad.update(|pad| {
                    pad.iteration.attempt = attempt;
                    pad.iteration
                        .history
                        .push(format!("{agent} attempt {attempt}"));
                })?;
            }

            let mut task_block = request.task.clone();
            if let Some(extra) = &request.extra_context {
                task_block.push_str("\n\n");
                task_block.push_str(extra);
            }
            if let Some(feedback) = &feedback {
                task_block.push_str(&format!("\n\nPrevious attempt failed: {feedback}"));
            }

            let full_prompt = format!(
                "{system}\n\n{context_block}\n## Task\n\n{task_block}\n\n{SELF_EVAL_INSTRUCTIONS}\n"
            );
            let prompt_path =
                std::env::temp_dir().join(format!("hive-prompt-{}.md", uuid::Uuid::new_v4()));
            std::fs::write(&prompt_path, &full_prompt)?;

            let selected_model = prompt
                .frontmatter
                .model
                .clone()
                .or_else(|| self.ctx.config.model_for(&agent).map(str::to_string));
            let model = selected_model.map(|m| {
                self.ctx
                    .cost
                    .lock()
                    .expect("cost lock poisoned")
                    .model_for(&m)
            });
            let cli = prompt
                .frontmatter
                .cli
                .clone()
                .unwrap_or_else(|| self.ctx.config.cli_for(&agent).to_string());

            let _ = self.ctx.events.log_event(
                "agent_start",
                json!({"agent": agent, "attempt": attempt, "model": model}),
                None,
            );
            info!(%agent, attempt, "invoking agent subprocess");

            let invoked = self
                .invoker
                .invoke(InvokeRequest {
                    cli,
                    model,
                    prompt: full_prompt.clone(),
                    workdir: request.workdir.clone(),
                })
                .await;
            let _ = std::fs::remove_file(&prompt_path);

            let result = match invoked {
                Ok(result) => result,
                Err(err) => {
                    warn!(%agent, attempt, %err, "subprocess invocation failed");
                    let _ = self.ctx.events.log_event(
                        "agent_retry",
                        json!({"agent": agent, "attempt": attempt, "reason": err.to_string()}),
                        None,
                    );
                    feedback = Some(format!("subprocess failed: {err}"));
                    continue;
                }
            };
            total_duration += result.duration_ms;

            let output_dir = self.ctx.paths.run_output_dir(&self.ctx.run_id);
            std::fs::create_dir_all(&output_dir)?;
            let output_path = output_dir.join(format!("{agent}_attempt_{attempt}.md"));
            std::fs::write(&output_path, &result.output)?;
            last_output_path = Some(output_path.clone());

            let files_counted = count_files_modified(&result.output);
            last_files_counted = files_counted;
            for line in modified_file_lines(&result.output) {
                let _ = self.ctx.trace.span_record_file(&span, &line.1, &line.0);
            }

            let input_tokens = estimate_tokens(&full_prompt);
            let output_tokens = estimate_tokens(&result.output);
            let call_cost = self
                .ctx
                .cost
                .lock()
                .expect("cost lock poisoned")
                .record(&agent, input_tokens, output_tokens);
            if self.apply_state {
                self.memory.update(|memory| {
                    memory.record_cost(&agent, input_tokens, output_tokens, call_cost)
                })?;
            }

            if result.output.trim().is_empty() {
                feedback = Some("agent produced no output".to_string());
                let _ = self.ctx.events.log_event(
                    "agent_retry",
                    json!({"agent": agent, "attempt": attempt, "reason": "empty output"}),
                    None,
                );
                continue;
            }

            let parsed = match extract_report(&result.output) {
                Ok(parsed) => parsed,
                Err(HiveError::SelfEvalParseError(detail)) => {
                    let _ = self.ctx.events.log_event(
                        "self_eval_parse_error",
                        json!({"agent": agent, "attempt": attempt, "detail": detail}),
                        None,
                    );
                    None
                }
                Err(err) => return Err(err.into()),
            };

            if let Some(report) = parsed {
                match report.status {
                    ReportStatus::Complete | ReportStatus::Partial => {
                        let outcome = self.finish_success(
                            &agent,
                            &span,
                            &scratchpad,
                            &report,
                            attempt,
                            total_duration,
                        )?;
                        return Ok(AgentRunReport {
                            agent,
                            outcome,
                            report: Some(report),
                            attempts: attempt,
                            output_path: last_output_path,
                            files_counted,
                            duration_ms: total_duration,
                        });
                    }
                    ReportStatus::Blocked => {
                        let reason = report
                            .blockers
                            .first()
                            .cloned()
                            .or_else(|| report.summary.clone())
                            .unwrap_or_else(|| "agent reported blocked".to_string());
                        if self.apply_state {
                            scratchpad.update(|pad| {
                                pad.add_blocker(&agent, &reason);
                                pad.current_agent = None;
                            })?;
                            self.memory.update(|memory| {
                                memory.record_agent_run(
                                    &agent,
                                    "blocked",
                                    report.confidence,
                                    report.summary.clone(),
                                )
                            })?;
                        }
                        let _ = self.ctx.events.log_event(
                            "agent_blocked",
                            json!({"agent": agent, "reason": reason}),
                            Some(total_duration),
                        );
                        let _ = self
                            .ctx
                            .trace
                            .span_end(&span, hive_types::SpanStatus::Failed);
                        return Ok(AgentRunReport {
                            agent,
                            outcome: AgentOutcome::Blocked,
                            report: Some(report),
                            attempts: attempt,
                            output_path: last_output_path,
                            files_counted,
                            duration_ms: total_duration,
                        });
                    }
                    ReportStatus::Challenge => {
                        let info = ChallengeInfo {
                            from: agent.clone(),
                            to: report.challenged_agent.clone().unwrap_or_default(),
                            issue: report.issue.clone().unwrap_or_default(),
                            suggestion: report.suggestion.clone().unwrap_or_default(),
                            evidence: report.evidence.clone().unwrap_or_default(),
                        };
                        let _ = self.ctx.events.log_event(
                            "agent_challenge",
                            json!({
                                "agent": agent,
                                "challenged_agent": info.to,
                                "issue": info.issue,
                            }),
                            Some(total_duration),
                        );
                        if self.apply_state {
                            scratchpad.update(|pad| pad.current_agent = None)?;
                        }
                        let _ = self
                            .ctx
                            .trace
                            .span_end(&span, hive_types::SpanStatus::Complete);
                        return Ok(AgentRunReport {
                            agent,
                            outcome: AgentOutcome::Challenge(info),
                            report: Some(report),
                            attempts: attempt,
                            output_path: last_output_path,
                            files_counted,
                            duration_ms: total_duration,
                        });
                    }
                }
            }

            // self-eval absent or unusable: contract post-validation decides
            let pad = scratchpad.load()?;
            let validation = crate::run_checks(
                &contract.post_checks,
                &CheckContext {
                    scratchpad: &pad,
                    output: &result.output,
                    report: None,
                    handoff: handoff.as_ref(),
                    epic_exists: match self.ctx.epic_id.as_deref() {
                        Some(epic) => Some(self.tracker.epic_exists(epic).await),
                        None => None,
                    },
                    ready_task_count: None,
                    stuck_task_count: None,
                    build_ok: None,
                    files_counted,
                },
            );
            if validation.valid {
                let _ = self.ctx.events.log_event(
                    "agent_complete",
                    json!({"agent": agent, "via": "contract_validation"}),
                    Some(total_duration),
                );
                if self.apply_state {
                    scratchpad.update(|pad| pad.mark_agent_complete(&agent))?;
                    self.memory.update(|memory| {
                        memory.record_agent_run(&agent, "complete", None, None)
                    })?;
                }
                let _ = self
                    .ctx
                    .trace
                    .span_end(&span, hive_types::SpanStatus::Complete);
                return Ok(AgentRunReport {
                    agent,
                    outcome: AgentOutcome::Pass,
                    report: None,
                    attempts: attempt,
                    output_path: last_output_path,
                    files_counted,
                    duration_ms: total_duration,
                });
            }

            feedback = Some(validation.failure_details());
            let _ = self.ctx.events.log_event(
                "agent_retry",
                json!({"agent": agent, "attempt": attempt, "reason": validation.failure_details()}),
                None,
            );
        }

        // attempts exhausted
        if self.apply_state {
            self.memory
                .update(|memory| memory.record_agent_run(&agent, "failed", None, None))?;
            scratchpad.update(|pad| pad.current_agent = None)?;
            let pad = scratchpad.load()?;
            let checkpoint = checkpoint_for(
                &self.ctx.run_id,
                self.ctx.epic_id.as_deref(),
                &self.ctx.objective,
                pad.current_phase.as_deref(),
                Some(&agent),
                &self.ctx.paths.scratchpad_path.display().to_string(),
                ResumeAction::RetryAgent,
            );
            let _ = self.ctx.checkpoint_store().save(&checkpoint);
        }
        let _ = self.ctx.events.log_event(
            "agent_failed",
            json!({"agent": agent, "attempts": max_attempts}),
            Some(total_duration),
        );
        let _ = self
            .ctx
            .trace
            .span_end(&span, hive_types::SpanStatus::Failed);
        Ok(AgentRunReport {
            agent,
            outcome: AgentOutcome::Fail,
            report: None,
            attempts: max_attempts,
            output_path: last_output_path,
            files_counted: last_files_counted,
            duration_ms: total_duration,
        })
    }

    fn finish_success(
        &self,
        agent: &str,
        span: &str,
        scratchpad: &ScratchpadStore,
        report: &SelfReport,
        attempt: u32,
        duration_ms: u64,
    ) -> anyhow::Result<AgentOutcome> {
        if self.apply_state {
            apply_report(scratchpad, &self.memory, agent, report)?;
        }

        let confidence = report.confidence_or(1.0);
        let low_confidence = confidence < self.ctx.settings.confidence_threshold;
        if low_confidence {
            let mut safety = self.ctx.safety.lock().expect("safety lock poisoned");
            safety.parallel_disabled = true;
            safety.needs_extra_review = true;
            if !self.ctx.settings.auto_mode {
                safety.halt_for_human = true;
            }
            drop(safety);
            let _ = self.ctx.events.log_event(
                "low_confidence",
                json!({"agent": agent, "confidence": confidence}),
                None,
            );
        }

        let outcome = match report.status {
            ReportStatus::Partial => AgentOutcome::Partial,
            _ if low_confidence => AgentOutcome::PassLowConfidence,
            _ => AgentOutcome::Pass,
        };
        let _ = self.ctx.events.log_event(
            "agent_complete",
            json!({
                "agent": agent,
                "result": outcome.label(),
                "attempt": attempt,
                "confidence": confidence,
            }),
            Some(duration_ms),
        );
        let _ = self
            .ctx
            .trace
            .span_end(span, hive_types::SpanStatus::Complete);
        Ok(outcome)
    }

    async fn curation_input(
        &self,
        agent: &str,
        memory: &hive_memory::ProjectMemory,
        handoff: Option<Handoff>,
        request: &AgentRunRequest,
    ) -> CurationInput {
        let scratchpad_md = self
            .ctx
            .scratchpad_store()
            .load()
            .map(|pad| pad.summary().render_markdown())
            .unwrap_or_default();
        let index_md =
            std::fs::read_to_string(&self.ctx.paths.index_path).unwrap_or_default();
        let guidelines_md = read_first_existing(&[
            self.ctx.paths.project_root.join("GUIDELINES.md"),
            self.ctx.paths.project_root.join("CONTRIBUTING.md"),
        ]);
        let user_context_md = read_context_dir(&self.ctx.paths.root.join("context"));
        let diff_context = read_first_existing(&[self
            .ctx
            .paths
            .run_snapshots_dir(&self.ctx.run_id)
            .join("latest.diff")]);

        let ready_tasks = match self.ctx.epic_id.as_deref() {
            Some(epic) => self.tracker.ready_tasks(epic).await,
            None => Vec::new(),
        };

        let challenges = memory.challenges_against(agent);
        let challenge_history_md = if challenges.is_empty() {
            String::new()
        } else {
            let mut out = String::from("## Past challenges against you\n\n");
            for record in challenges.iter().rev().take(5) {
                out.push_str(&format!(
                    "- from {}: {} ({})\n",
                    record.from, record.issue, record.resolution
                ));
            }
            out
        };

        CurationInput {
            objective: format!("Objective: {}", self.ctx.objective),
            memory_md: memory.render_markdown(),
            agent_history_md: memory.render_agent_history(agent),
            index_md,
            guidelines_md,
            user_context_md,
            diff_context,
            test_command: memory.facts.test_command.clone(),
            scratchpad_md,
            handoff,
            ready_tasks_md: render_ready_tasks(&ready_tasks),
            challenge_history_md,
            warnings: request.warnings.clone(),
        }
    }
}

/// Apply a successful self-evaluation to the scratchpad and memory.
/// Called inline by the runner, and by the orchestrator for results
/// returned from parallel workers.
pub fn apply_report(
    scratchpad: &ScratchpadStore,
    memory: &MemoryStore,
    agent: &str,
    report: &SelfReport,
) -> anyhow::Result<()> {
    scratchpad.update(|pad| {
        for decision in &report.decisions {
            pad.add_decision(
                agent,
                decision.decision(),
                decision.rationale().map(str::to_string),
            );
        }
        for file in &report.files_modified {
            pad.add_key_file(file);
        }
        pad.mark_agent_complete(agent);
    })?;
    memory.update(|memory| {
        for file in &report.files_modified {
            memory.set_file_purpose(file, "modified");
        }
        let status = match report.status {
            ReportStatus::Partial => "partial",
            _ => "complete",
        };
        memory.record_agent_run(agent, status, report.confidence, report.summary.clone());
    })?;
    Ok(())
}

/// Heuristic file-activity counter: output lines that start with a
/// writing verb.
pub fn count_files_modified(output: &str) -> usize {
    modified_file_lines(output).len()
}

fn modified_file_lines(output: &str) -> Vec<(String, String)> {
    let verb = Regex::new(r"^(Writing|Created|Modified|Wrote)\b\s*(\S*)").expect("static regex");
    output
        .lines()
        .filter_map(|line| {
            verb.captures(line).map(|caps| {
                (
                    caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default(),
                    caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                )
            })
        })
        .collect()
}

fn read_first_existing(paths: &[PathBuf]) -> String {
    for path in paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            return content;
        }
    }
    String::new()
}

fn read_context_dir(dir: &PathBuf) -> String {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return String::new();
    };
    let mut out = String::new();
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("md"))
        .collect();
    files.sort();
    for file in files {
        if let Ok(content) = std::fs::read_to_string(&file) {
            out.push_str(&content);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NullTracker, StubInvoker};
    use hive_core::{RunContext, RunSettings};
    use hive_types::{Run, REPORT_END, REPORT_START};

    fn report_block(json: &str) -> String {
        format!("{REPORT_START}\n{json}\n{REPORT_END}")
    }

    async fn runner_with(
        temp: &tempfile::TempDir,
        stub: Arc<StubInvoker>,
    ) -> (AgentRunner, RunContext) {
        let run = Run::new("rename flag in config", "quick");
        let ctx = RunContext::bootstrap(temp.path(), &run, RunSettings::default())
            .expect("bootstrap");
        ctx.scratchpad_store()
            .create(&hive_types::Scratchpad::new(
                &ctx.run_id,
                ctx.trace.trace_id(),
                &ctx.objective,
            ))
            .expect("scratchpad");
        let runner = AgentRunner::new(ctx.clone(), stub, Arc::new(NullTracker));
        (runner, ctx)
    }

    #[tokio::test]
    async fn complete_report_passes_and_updates_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stub = Arc::new(StubInvoker::new());
        stub.push_output(format!(
            "Writing src/config.ts\n{}",
            report_block(
                r#"{"status":"complete","confidence":0.9,"files_modified":["src/config.ts"],"summary":"renamed"}"#
            )
        ));
        let (runner, ctx) = runner_with(&temp, stub).await;

        let result = runner
            .run_agent_with_validation("implementer", "rename the flag", None)
            .await
            .expect("run");
        assert!(matches!(result.outcome, AgentOutcome::Pass));
        assert_eq!(result.outcome.exit_code(), 0);
        assert_eq!(result.files_counted, 1);

        let pad = ctx.scratchpad_store().load().expect("pad");
        assert_eq!(pad.completed_agents, vec!["implementer"]);
        assert!(pad.current_agent.is_none());
        assert!(pad.context.key_files.contains(&"src/config.ts".to_string()));

        let memory = runner.memory().load().expect("memory");
        assert_eq!(
            memory.file_map.get("src/config.ts").map(String::as_str),
            Some("modified")
        );
        assert_eq!(memory.agent_history.len(), 1);
        assert!(ctx.spent() > 0.0);
    }

    #[tokio::test]
    async fn low_confidence_pass_flips_safety_switches() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stub = Arc::new(StubInvoker::new());
        stub.push_output(report_block(
            r#"{"status":"complete","confidence":0.3,"summary":"unsure"}"#,
        ));
        let (runner, ctx) = runner_with(&temp, stub).await;

        let result = runner
            .run_agent_with_validation("implementer", "task", None)
            .await
            .expect("run");
        assert!(matches!(result.outcome, AgentOutcome::PassLowConfidence));
        let safety = ctx.safety.lock().expect("safety");
        assert!(safety.parallel_disabled);
        assert!(safety.needs_extra_review);
    }

    #[tokio::test]
    async fn blocked_report_files_a_blocker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stub = Arc::new(StubInvoker::new());
        stub.push_output(report_block(
            r#"{"status":"blocked","blockers":["missing database migration"]}"#,
        ));
        let (runner, ctx) = runner_with(&temp, stub).await;

        let result = runner
            .run_agent_with_validation("implementer", "task", None)
            .await
            .expect("run");
        assert!(matches!(result.outcome, AgentOutcome::Blocked));
        assert_eq!(result.outcome.exit_code(), 1);

        let pad = ctx.scratchpad_store().load().expect("pad");
        assert_eq!(pad.open_blockers().len(), 1);
        assert_eq!(pad.open_blockers()[0].text, "missing database migration");
    }

    #[tokio::test]
    async fn challenge_report_exports_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stub = Arc::new(StubInvoker::new());
        stub.push_output(report_block(
            r#"{"status":"challenge","challenged_agent":"implementer","issue":"missing input validation","suggestion":"validate body schema","evidence":"src/api/users.ts:17"}"#,
        ));
        let (runner, _ctx) = runner_with(&temp, stub).await;

        let result = runner
            .run_agent_with_validation("reviewer", "review diff", None)
            .await
            .expect("run");
        let AgentOutcome::Challenge(info) = &result.outcome else {
            panic!("expected challenge");
        };
        assert_eq!(info.from, "reviewer");
        assert_eq!(info.to, "implementer");
        assert_eq!(info.evidence, "src/api/users.ts:17");
        assert_eq!(result.outcome.exit_code(), 2);
    }

    #[tokio::test]
    async fn retries_then_fails_with_checkpoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stub = Arc::new(StubInvoker::new());
        // three empty outputs exhaust the default attempt budget
        let (runner, ctx) = runner_with(&temp, stub.clone()).await;

        let result = runner
            .run_agent_with_validation("implementer", "task", None)
            .await
            .expect("run");
        assert!(matches!(result.outcome, AgentOutcome::Fail));
        assert_eq!(result.attempts, 3);
        assert_eq!(stub.prompts().len(), 3);
        // retry feedback is threaded into later prompts
        assert!(stub.prompts()[1].contains("Previous attempt failed"));

        let checkpoint = ctx.checkpoint_store().load(None).expect("checkpoint");
        assert_eq!(checkpoint.next_action, ResumeAction::RetryAgent);
        assert_eq!(checkpoint.current_agent.as_deref(), Some("implementer"));

        let memory = runner.memory().load().expect("memory");
        assert_eq!(memory.agent_patterns["implementer"].statuses["failed"], 1);
    }

    #[tokio::test]
    async fn missing_self_eval_falls_back_to_contract_checks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stub = Arc::new(StubInvoker::new());
        stub.push_output("did some work but forgot the report");
        let (runner, _ctx) = runner_with(&temp, stub).await;
        let runner = runner.with_contracts(vec![Contract {
            agent: "implementer".to_string(),
            post_checks: vec!["NotARealCheck".to_string()],
            ..Contract::default()
        }]);

        let result = runner
            .run_agent_with_validation("implementer", "task", None)
            .await
            .expect("run");
        assert!(matches!(result.outcome, AgentOutcome::Pass));
        assert!(result.report.is_none());
    }

    #[tokio::test]
    async fn unknown_agent_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stub = Arc::new(StubInvoker::new());
        let (runner, _ctx) = runner_with(&temp, stub).await;
        let err = runner
            .run_agent_with_validation("astrologer", "task", None)
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("astrologer"));
    }

    #[test]
    fn files_modified_heuristic_counts_verb_lines() {
        let output = "Writing src/a.ts\nnot a verb line\nModified src/b.ts\nWrote src/c.ts\nCreated src/d.ts\nwriting lowercase ignored";
        assert_eq!(count_files_modified(output), 4);
    }
}
