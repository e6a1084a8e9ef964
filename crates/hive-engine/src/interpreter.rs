use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use hive_core::{checkpoint_for, refresh_index, RunContext, DEFAULT_INDEX_CAP};
use hive_memory::detect_project_facts;
use hive_runner::{
    apply_report, partition_independent, run_parallel_review, run_parallel_worktrees,
    AgentInvoker, AgentOutcome, AgentRunRequest, AgentRunner, ChallengeInfo, TaskTracker,
};
use hive_types::{
    Finding, HiveError, Phase, PhaseType, ResumeAction, RunStatus, Scratchpad, SelfReport,
    SpanStatus, Workflow, MAX_WORKFLOW_DEPTH,
};

use crate::{
    load_workflow, resolve_challenge, Adaptation, AdaptationEngine, ChallengeState,
    WORKFLOW_AGENT_PREFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Skipped,
    Blocked,
    Failed,
    Escalated,
}

/// The workflow interpreter: drives a declarative phase list through the
/// agent runner, consuming injected phases first, honoring conditions and
/// gates, and snapshotting state after every phase. A single orchestrator
/// thread; parallelism only happens inside explicit fan-out phases.
pub struct WorkflowEngine {
    ctx: RunContext,
    runner: AgentRunner,
    tracker: Arc<dyn TaskTracker>,
    adaptation: AdaptationEngine,
    env_conditions: HashMap<String, bool>,
    workflow_stack: Vec<String>,
    last_reports: HashMap<String, SelfReport>,
    findings: Vec<Finding>,
}

impl WorkflowEngine {
    pub fn new(
        ctx: RunContext,
        invoker: Arc<dyn AgentInvoker>,
        tracker: Arc<dyn TaskTracker>,
    ) -> anyhow::Result<Self> {
        let runner = AgentRunner::new(ctx.clone(), invoker, tracker.clone());

        let scratchpad = ctx.scratchpad_store();
        if !scratchpad.exists() {
            let mut pad = Scratchpad::new(&ctx.run_id, ctx.trace.trace_id(), &ctx.objective);
            pad.epic_id = ctx.epic_id.clone();
            scratchpad.create(&pad)?;
        }

        runner.memory().update(|memory| {
            detect_project_facts(&ctx.paths.project_root, &mut memory.facts);
        })?;

        let env_conditions = detect_environment(&ctx.paths.project_root);
        let adaptation = AdaptationEngine::new(
            ctx.settings.adapt_enabled,
            ctx.settings.adapt_many_files,
            ctx.settings.adapt_max_failures,
        );

        Ok(Self {
            ctx,
            runner,
            tracker,
            adaptation,
            env_conditions,
            workflow_stack: Vec::new(),
            last_reports: HashMap::new(),
            findings: Vec::new(),
        })
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// A phase's effective required flag. `testing_required = false` in the
    /// configuration demotes tester phases to optional.
    fn phase_required(&self, phase: &Phase) -> bool {
        if !phase.required {
            return false;
        }
        if let Some(agent) = &phase.agent {
            if hive_runner::classify(agent) == hive_runner::AgentClass::Tester
                && self.ctx.config.feature("testing_required") == Some(false)
            {
                return false;
            }
        }
        true
    }

    /// Pre-seed likely-relevant files from selection heuristics.
    pub fn preload_key_files(&self, files: &[String]) -> anyhow::Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        self.ctx.scratchpad_store().update(|pad| {
            for file in files {
                pad.add_key_file(file);
            }
        })?;
        Ok(())
    }

    pub async fn execute(&mut self, workflow: &Workflow) -> anyhow::Result<RunStatus> {
        if self.workflow_stack.iter().any(|name| name == &workflow.name) {
            return Err(HiveError::CompositionError(format!(
                "workflow `{}` is already on the execution stack",
                workflow.name
            ))
            .into());
        }
        if self.workflow_stack.len() >= MAX_WORKFLOW_DEPTH {
            return Err(HiveError::CompositionError(format!(
                "workflow nesting depth {} exceeded",
                MAX_WORKFLOW_DEPTH
            ))
            .into());
        }

        let top_level = self.workflow_stack.is_empty();
        self.workflow_stack.push(workflow.name.clone());
        self.save_compose_state();

        if top_level {
            let _ = self.ctx.events.log_event(
                "run_start",
                json!({"workflow": workflow.name, "objective": self.ctx.objective}),
                None,
            );
        }

        let mut static_phases: VecDeque<Phase> = workflow.phases.clone().into();
        let mut status = RunStatus::Complete;

        loop {
            // injected phases are FIFO and jump the static queue
            let mut injected = None;
            self.ctx.scratchpad_store().update(|pad| {
                injected = pad.injected_phases.pop_front();
            })?;
            let phase = match injected.or_else(|| static_phases.pop_front()) {
                Some(phase) => phase,
                None => break,
            };

            let outcome = self.run_phase(&phase).await?;
            match outcome {
                PhaseOutcome::Completed | PhaseOutcome::Skipped => {}
                PhaseOutcome::Blocked if self.phase_required(&phase) => {
                    status = RunStatus::Blocked;
                    break;
                }
                PhaseOutcome::Failed if self.phase_required(&phase) => {
                    status = RunStatus::Failed;
                    break;
                }
                PhaseOutcome::Escalated => {
                    status = RunStatus::Blocked;
                    break;
                }
                PhaseOutcome::Blocked | PhaseOutcome::Failed => {
                    info!(phase = %phase.name, "optional phase did not complete, continuing");
                }
            }
        }

        self.workflow_stack.pop();
        self.save_compose_state();

        if top_level {
            self.ctx.scratchpad_store().update(|pad| {
                pad.status = status;
                pad.current_phase = None;
            })?;
            let event = match status {
                RunStatus::Complete => "run_complete",
                RunStatus::Blocked => "run_blocked",
                _ => "run_failed",
            };
            let _ = self
                .ctx
                .events
                .log_event(event, json!({"workflow": workflow.name}), None);
            let _ = self.ctx.trace.save_all();
        }

        Ok(status)
    }

    async fn run_phase(&mut self, phase: &Phase) -> anyhow::Result<PhaseOutcome> {
        let span = self.ctx.trace.span_start("phase");
        let _ = self.ctx.trace.span_add_tag(&span, "phase", &phase.name);

        self.ctx.scratchpad_store().update(|pad| {
            pad.current_phase = Some(phase.name.clone());
        })?;

        // unknown conditions default to true
        if let Some(condition) = &phase.condition {
            let holds = self.env_conditions.get(condition).copied().unwrap_or(true);
            if !holds {
                let _ = self.ctx.events.log_event(
                    "phase_skipped",
                    json!({"phase": phase.name, "condition": condition}),
                    None,
                );
                let _ = self.ctx.trace.span_end(&span, SpanStatus::Complete);
                return Ok(PhaseOutcome::Skipped);
            }
        }

        let outcome = match phase.phase_type {
            PhaseType::BuildVerify => self.run_build_verify(phase).await?,
            PhaseType::FixBlocking => self.run_fix_blocking(phase).await?,
            PhaseType::Interview => {
                // external collaborator; it may enrich the objective offline
                let _ = self.ctx.events.log_event(
                    "interview_requested",
                    json!({"phase": phase.name}),
                    None,
                );
                PhaseOutcome::Completed
            }
            PhaseType::Agent => self.run_agent_phase(phase).await?,
        };

        if outcome != PhaseOutcome::Skipped {
            self.post_phase(phase).await;
        }

        if phase.human_checkpoint_after && !self.ctx.settings.auto_mode {
            let _ = self.ctx.events.log_event(
                "human_checkpoint",
                json!({"phase": phase.name, "reason": "phase_checkpoint"}),
                None,
            );
        }
        let halt = {
            let mut safety = self.ctx.safety.lock().expect("safety lock poisoned");
            std::mem::replace(&mut safety.halt_for_human, false)
        };
        if halt {
            let _ = self.ctx.events.log_event(
                "human_checkpoint",
                json!({"phase": phase.name, "reason": "low_confidence"}),
                None,
            );
        }

        let span_status = match outcome {
            PhaseOutcome::Completed | PhaseOutcome::Skipped => SpanStatus::Complete,
            _ => SpanStatus::Failed,
        };
        let _ = self.ctx.trace.span_end(&span, span_status);
        Ok(outcome)
    }

    async fn run_agent_phase(&mut self, phase: &Phase) -> anyhow::Result<PhaseOutcome> {
        let Some(agent) = phase.agent.clone() else {
            warn!(phase = %phase.name, "agent phase without an agent");
            return Ok(PhaseOutcome::Failed);
        };

        if let Some(sub) = agent.strip_prefix(WORKFLOW_AGENT_PREFIX) {
            let sub = sub.to_string();
            // a cycle or depth violation fails the phase that tried to compose
            return match self.run_subworkflow(&sub).await {
                Ok(outcome) => Ok(outcome),
                Err(err)
                    if matches!(
                        err.downcast_ref::<HiveError>(),
                        Some(HiveError::CompositionError(_))
                    ) =>
                {
                    let _ = self.ctx.events.log_event(
                        "composition_error",
                        json!({"phase": phase.name, "error": err.to_string()}),
                        None,
                    );
                    Ok(PhaseOutcome::Failed)
                }
                Err(err) => Err(err),
            };
        }

        let memory = self.runner.memory().load()?;

        // cost gate
        if self.ctx.settings.cost_aware {
            if let Some(estimate) = memory.estimated_cost(&agent) {
                let fits = self
                    .ctx
                    .cost
                    .lock()
                    .expect("cost lock poisoned")
                    .fits_budget(estimate);
                if !fits {
                    if !self.phase_required(phase) {
                        let _ = self.ctx.events.log_event(
                            "smart_decision",
                            json!({
                                "trigger": "budget",
                                "phase": phase.name,
                                "agent": agent,
                                "estimated_cost": estimate,
                                "spent": self.ctx.spent(),
                            }),
                            None,
                        );
                        return Ok(PhaseOutcome::Skipped);
                    }
                    let _ = self.ctx.events.log_event(
                        "budget_warning",
                        json!({"phase": phase.name, "agent": agent, "estimated_cost": estimate}),
                        None,
                    );
                }
            }
        }

        // predictive skip gate
        if self.ctx.settings.fast_mode
            && !self.phase_required(phase)
            && memory.is_skip_safe(
                &agent,
                &self.ctx.objective,
                self.ctx.settings.skip_min_samples,
                self.ctx.settings.skip_success_threshold,
            )
        {
            let _ = self.ctx.events.log_event(
                "smart_decision",
                json!({
                    "reason": "high_success_pattern",
                    "phase": phase.name,
                    "agent": agent,
                }),
                None,
            );
            return Ok(PhaseOutcome::Skipped);
        }

        // noisy handoff pair warning, non-fatal
        let mut warnings = Vec::new();
        if let Some(from) = &phase.needs_handoff_from {
            if let Some(stats) = memory.pair_stats(from, &agent) {
                if stats.runs >= 5 && stats.challenge_rate >= 0.30 {
                    let warning = format!(
                        "handoffs {from}→{agent} were challenged in {:.0}% of {} runs",
                        stats.challenge_rate * 100.0,
                        stats.runs
                    );
                    let _ = self.ctx.events.log_event(
                        "pair_warning",
                        json!({"from": from, "to": agent, "challenge_rate": stats.challenge_rate}),
                        None,
                    );
                    warnings.push(warning);
                }
            }
        }

        let handoff = match &phase.needs_handoff_from {
            Some(from) => {
                let summary = self
                    .last_reports
                    .get(from)
                    .and_then(|report| report.summary.clone())
                    .unwrap_or_else(|| format!("{from} finished its phase"));
                let payload = self
                    .last_reports
                    .get(from)
                    .map(|report| {
                        json!({
                            "files_modified": report.files_modified,
                            "next_agent_hint": report.next_agent_hint,
                        })
                    })
                    .unwrap_or(serde_json::Value::Null);
                Some(self.ctx.handoff_store().create(
                    from,
                    &agent,
                    &summary,
                    payload,
                    self.ctx.epic_id.clone(),
                )?)
            }
            None => None,
        };

        let task = phase.render_task(self.ctx.epic_id.as_deref());

        // review fan-out phase: run the review set concurrently
        if phase.name == "parallel_review" && self.ctx.parallel_allowed() {
            return self.run_parallel_review_phase(phase, &task).await;
        }

        // worktree fan-out: independent tracker tasks, one isolated copy each
        if agent == "implementer"
            && self.ctx.config.feature("parallel_worktrees").unwrap_or(false)
            && self.ctx.parallel_allowed()
        {
            if let Some(done) = self.try_parallel_worktrees().await? {
                return Ok(done);
            }
        }

        let request = AgentRunRequest {
            agent: agent.clone(),
            task,
            handoff,
            warnings,
            ..AgentRunRequest::default()
        };
        let result = match self.runner.run(request).await {
            Ok(result) => result,
            Err(err) => {
                let _ = self.ctx.events.log_event(
                    "phase_error",
                    json!({"phase": phase.name, "agent": agent, "error": err.to_string()}),
                    None,
                );
                return Ok(if self.phase_required(phase) {
                    PhaseOutcome::Failed
                } else {
                    PhaseOutcome::Skipped
                });
            }
        };

        self.handle_agent_outcome(phase, &agent, result.outcome, result.report)
            .await
    }

    async fn handle_agent_outcome(
        &mut self,
        phase: &Phase,
        agent: &str,
        outcome: AgentOutcome,
        report: Option<SelfReport>,
    ) -> anyhow::Result<PhaseOutcome> {
        match outcome {
            AgentOutcome::Pass | AgentOutcome::PassLowConfidence | AgentOutcome::Partial => {
                self.runner.memory().update(|memory| {
                    memory.record_skip_outcome(agent, &self.ctx.objective, true, false);
                    if let Some(from) = &phase.needs_handoff_from {
                        memory.record_pair_run(from, agent, false);
                    }
                })?;
                if let Some(report) = report {
                    self.absorb_report(agent, &report)?;
                }
                Ok(PhaseOutcome::Completed)
            }
            AgentOutcome::Blocked => {
                self.runner.memory().update(|memory| {
                    memory.record_skip_outcome(agent, &self.ctx.objective, false, false);
                })?;
                if self.phase_required(phase) && !self.ctx.settings.auto_mode {
                    let _ = self.ctx.events.log_event(
                        "human_checkpoint",
                        json!({"phase": phase.name, "reason": "agent_blocked", "agent": agent}),
                        None,
                    );
                }
                Ok(PhaseOutcome::Blocked)
            }
            AgentOutcome::Challenge(info) => self.handle_challenge(phase, info).await,
            AgentOutcome::Fail => {
                self.runner.memory().update(|memory| {
                    memory.record_skip_outcome(agent, &self.ctx.objective, false, false);
                })?;
                if let Some(reroute) = &phase.on_failure {
                    let _ = self.ctx.events.log_event(
                        "phase_reroute",
                        json!({"phase": phase.name, "from": agent, "to": reroute}),
                        None,
                    );
                    let retry = self
                        .runner
                        .run(AgentRunRequest {
                            agent: reroute.clone(),
                            task: format!(
                                "The `{}` phase failed after retries. Take over: {}",
                                phase.name,
                                phase.render_task(self.ctx.epic_id.as_deref())
                            ),
                            ..AgentRunRequest::default()
                        })
                        .await?;
                    if retry.outcome.is_success() {
                        if let Some(report) = retry.report {
                            self.absorb_report(reroute, &report)?;
                        }
                        return Ok(PhaseOutcome::Completed);
                    }
                }
                if self.phase_required(phase) && !self.ctx.settings.auto_mode {
                    let _ = self.ctx.events.log_event(
                        "human_checkpoint",
                        json!({"phase": phase.name, "reason": "agent_failed", "agent": agent}),
                        None,
                    );
                }
                Ok(PhaseOutcome::Failed)
            }
        }
    }

    /// Apply a successful report's side products the runner does not own:
    /// findings, adaptation, and the last-report table for handoffs.
    fn absorb_report(&mut self, agent: &str, report: &SelfReport) -> anyhow::Result<()> {
        self.findings.extend(
            report
                .issues_found
                .iter()
                .cloned()
                .map(|issue| Finding::from_issue(agent, issue)),
        );

        for adaptation in self.adaptation.on_agent_result(agent, report) {
            match adaptation {
                Adaptation::Inject(injected) => {
                    let _ = self.ctx.events.log_event(
                        "phase_injected",
                        json!({
                            "phase": injected.name,
                            "agent": injected.agent,
                            "reason": injected.reason,
                        }),
                        None,
                    );
                    self.ctx.scratchpad_store().update(|pad| {
                        pad.injected_phases.push_back(injected);
                    })?;
                }
                Adaptation::Escalate(reason) => {
                    let _ = self.ctx.events.log_event(
                        "adaptation_escalation",
                        json!({"reason": reason}),
                        None,
                    );
                }
            }
        }

        self.last_reports.insert(agent.to_string(), report.clone());
        Ok(())
    }

    async fn handle_challenge(
        &mut self,
        phase: &Phase,
        info: ChallengeInfo,
    ) -> anyhow::Result<PhaseOutcome> {
        let memory = self.runner.memory().update(|memory| {
            memory.record_pair_run(&info.from, &info.to, true);
            memory.record_skip_outcome(&info.to, &self.ctx.objective, false, true);
        })?;
        let pair_challenges = memory
            .pair_stats(&info.from, &info.to)
            .map(|stats| stats.challenges)
            .unwrap_or(0);

        let resolution = resolve_challenge(
            &self.runner,
            &info,
            self.ctx.settings.challenge_retry_attempts,
            pair_challenges,
            self.ctx.settings.max_challenges,
        )
        .await?;
        match resolution.state {
            ChallengeState::Resolved => Ok(PhaseOutcome::Completed),
            ChallengeState::Escalated => {
                self.ctx.scratchpad_store().update(|pad| {
                    pad.add_blocker(
                        &info.from,
                        format!("unresolved challenge against {}: {}", info.to, info.issue),
                    );
                })?;
                let _ = self.ctx.events.log_event(
                    "human_checkpoint",
                    json!({
                        "phase": phase.name,
                        "reason": "challenge_unresolved",
                        "from": info.from,
                        "to": info.to,
                    }),
                    None,
                );
                Ok(PhaseOutcome::Escalated)
            }
        }
    }

    async fn run_parallel_review_phase(
        &mut self,
        phase: &Phase,
        task: &str,
    ) -> anyhow::Result<PhaseOutcome> {
        let mut agents = vec![phase.agent.clone().unwrap_or_else(|| "reviewer".to_string())];
        agents.push("security".to_string());
        agents.dedup();

        let outcome = run_parallel_review(&self.runner, &agents, task).await;

        // orchestrator applies worker results after the join
        let mut challenges: Vec<ChallengeInfo> = Vec::new();
        let mut any_success = false;
        for result in &outcome.results {
            match &result.outcome {
                AgentOutcome::Challenge(info) => challenges.push(info.clone()),
                outcome_kind if outcome_kind.is_success() => {
                    any_success = true;
                    if let Some(report) = &result.report {
                        apply_report(
                            &self.ctx.scratchpad_store(),
                            self.runner.memory(),
                            &result.agent,
                            report,
                        )?;
                        self.absorb_report(&result.agent, report)?;
                    }
                    self.runner.memory().update(|memory| {
                        memory.record_skip_outcome(&result.agent, &self.ctx.objective, true, false);
                    })?;
                }
                _ => {}
            }
        }
        self.findings.extend(outcome.findings);

        // earliest challenge wins; the rest queue behind it
        for (index, info) in challenges.into_iter().enumerate() {
            if index > 0 {
                let _ = self.ctx.events.log_event(
                    "challenge_queued",
                    json!({"from": info.from, "to": info.to}),
                    None,
                );
            }
            let outcome = self.handle_challenge(phase, info).await?;
            if outcome == PhaseOutcome::Escalated {
                return Ok(PhaseOutcome::Escalated);
            }
        }

        if self.phase_required(phase) && !any_success {
            return Ok(PhaseOutcome::Failed);
        }
        Ok(PhaseOutcome::Completed)
    }

    /// Fan implementer work out across isolated worktrees when the tracker
    /// offers two or more independent tasks. `None` means the fan-out did
    /// not apply and the caller should run the sequential path.
    async fn try_parallel_worktrees(&mut self) -> anyhow::Result<Option<PhaseOutcome>> {
        let Some(epic) = self.ctx.epic_id.clone() else {
            return Ok(None);
        };
        let ready = self.tracker.ready_tasks(&epic).await;
        let (independent, deferred) = partition_independent(&ready);
        if independent.len() < 2 {
            return Ok(None);
        }

        let outcomes = run_parallel_worktrees(&self.runner, independent).await;
        let mut all_ok = true;
        for outcome in &outcomes {
            if outcome.success {
                if let Some(report) = outcome.report.as_ref().and_then(|r| r.report.as_ref()) {
                    apply_report(
                        &self.ctx.scratchpad_store(),
                        self.runner.memory(),
                        "implementer",
                        report,
                    )?;
                    self.absorb_report("implementer", report)?;
                }
            } else {
                all_ok = false;
            }
        }

        if all_ok && deferred.is_empty() {
            Ok(Some(PhaseOutcome::Completed))
        } else {
            // failures and conflicting tasks go through the sequential path
            Ok(None)
        }
    }

    async fn run_build_verify(&mut self, phase: &Phase) -> anyhow::Result<PhaseOutcome> {
        let memory = self.runner.memory().load()?;
        let Some(build_command) = memory.facts.build_command.clone() else {
            let _ = self.ctx.events.log_event(
                "build_skipped",
                json!({"reason": "no build command detected"}),
                None,
            );
            return Ok(PhaseOutcome::Completed);
        };

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&build_command)
            .current_dir(&self.ctx.paths.project_root)
            .output()
            .await;

        let (success, tail) = match output {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                let tail = text
                    .lines()
                    .rev()
                    .take(40)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect::<Vec<_>>()
                    .join("\n");
                (output.status.success(), tail)
            }
            Err(err) => (false, err.to_string()),
        };

        let _ = self.ctx.events.log_event(
            "build_verify",
            json!({"command": build_command, "success": success}),
            None,
        );
        if success {
            return Ok(PhaseOutcome::Completed);
        }

        // build failures route to the debugger
        let debugger = phase
            .on_failure
            .clone()
            .unwrap_or_else(|| "debugger".to_string());
        let result = self
            .runner
            .run(AgentRunRequest {
                agent: debugger.clone(),
                task: format!(
                    "`{build_command}` failed. Diagnose and fix the build.\n\nOutput tail:\n{tail}"
                ),
                ..AgentRunRequest::default()
            })
            .await?;
        if result.outcome.is_success() {
            if let Some(report) = result.report {
                self.absorb_report(&debugger, &report)?;
            }
            Ok(PhaseOutcome::Completed)
        } else if self.phase_required(phase) {
            Ok(PhaseOutcome::Failed)
        } else {
            Ok(PhaseOutcome::Blocked)
        }
    }

    async fn run_fix_blocking(&mut self, phase: &Phase) -> anyhow::Result<PhaseOutcome> {
        let epic = self.ctx.epic_id.clone().unwrap_or_default();
        let items = self.tracker.blocking_items(&epic).await;
        if items.is_empty() {
            let _ = self.ctx.events.log_event(
                "fix_blocking_none",
                json!({"phase": phase.name}),
                None,
            );
            return Ok(PhaseOutcome::Completed);
        }

        let listing = items
            .iter()
            .map(|item| format!("- [{}] {}", item.id, item.title))
            .collect::<Vec<_>>()
            .join("\n");
        let agent = phase
            .agent
            .clone()
            .unwrap_or_else(|| "implementer".to_string());
        let result = self
            .runner
            .run(AgentRunRequest {
                agent: agent.clone(),
                task: format!("Resolve these blocking (P0) items first:\n{listing}"),
                ..AgentRunRequest::default()
            })
            .await?;
        self.handle_agent_outcome(phase, &agent, result.outcome, result.report)
            .await
    }

    async fn run_subworkflow(&mut self, name: &str) -> anyhow::Result<PhaseOutcome> {
        let workflow = load_workflow(&self.ctx.paths, name).ok_or_else(|| {
            HiveError::CompositionError(format!("unknown workflow `{name}`"))
        })?;

        let store = self.ctx.scratchpad_store();
        let parent = store.load()?;

        // child inherits objective, trace, context, decisions, parent phase
        let mut child = Scratchpad::new(&parent.run_id, &parent.trace_id, &parent.objective);
        child.epic_id = parent.epic_id.clone();
        child.context = parent.context.clone();
        child.decisions = parent.decisions.clone();
        child.current_phase = parent.current_phase.clone();
        store.save(&child)?;

        let result = Box::pin(self.execute(&workflow)).await;

        let child_final = store.load()?;
        let mut merged = parent;
        for decision in &child_final.decisions {
            let seen = merged
                .decisions
                .iter()
                .any(|existing| {
                    existing.agent == decision.agent && existing.decision == decision.decision
                });
            if !seen {
                merged.decisions.push(decision.clone());
            }
        }
        for agent in &child_final.completed_agents {
            if !merged.completed_agents.contains(agent) {
                merged.completed_agents.push(agent.clone());
            }
        }
        for file in &child_final.context.key_files {
            merged.add_key_file(file);
        }
        for tech in &child_final.context.tech_stack {
            merged.add_tech(tech);
        }
        store.save(&merged)?;

        match result {
            Ok(RunStatus::Complete) => Ok(PhaseOutcome::Completed),
            Ok(RunStatus::Blocked) => Ok(PhaseOutcome::Blocked),
            Ok(_) => Ok(PhaseOutcome::Failed),
            Err(err) => Err(err),
        }
    }

    /// After-phase bookkeeping: diff snapshot, index refresh, checkpoint,
    /// cost and findings persistence.
    async fn post_phase(&mut self, phase: &Phase) {
        self.snapshot_git_state().await;

        let _ = refresh_index(
            self.ctx.paths.project_root.clone(),
            self.ctx.paths.index_path.clone(),
            DEFAULT_INDEX_CAP,
        )
        .await;

        if let Ok(pad) = self.ctx.scratchpad_store().load() {
            let checkpoint = checkpoint_for(
                &self.ctx.run_id,
                self.ctx.epic_id.as_deref(),
                &self.ctx.objective,
                pad.current_phase.as_deref(),
                pad.current_agent.as_deref(),
                &self.ctx.paths.scratchpad_path.display().to_string(),
                ResumeAction::ContinuePhase,
            );
            let _ = self.ctx.checkpoint_store().save(&checkpoint);
        }

        {
            let cost = self.ctx.cost.lock().expect("cost lock poisoned").clone();
            let _ = cost.save(&self.ctx.paths.cost_path(&self.ctx.run_id));
        }
        if !self.findings.is_empty() {
            let _ = hive_core::write_json_atomic(
                &self.ctx.paths.findings_path(&self.ctx.run_id),
                &self.findings,
            );
        }

        let _ = self.ctx.trace.save_all();
        let _ = self.ctx.events.log_event(
            "phase_complete",
            json!({"phase": phase.name}),
            None,
        );
    }

    async fn snapshot_git_state(&self) {
        let snapshots = self.ctx.paths.run_snapshots_dir(&self.ctx.run_id);
        let _ = std::fs::create_dir_all(&snapshots);

        let diff = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&self.ctx.paths.project_root)
            .arg("diff")
            .output()
            .await;
        if let Ok(output) = diff {
            if output.status.success() {
                let _ = std::fs::write(snapshots.join("latest.diff"), &output.stdout);
            }
        }

        let status = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&self.ctx.paths.project_root)
            .args(["status", "--porcelain"])
            .output()
            .await;
        if let Ok(output) = status {
            if output.status.success() {
                let dirty: Vec<String> = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(str::to_string)
                    .collect();
                let _ = hive_core::write_json_atomic(
                    &self.ctx.paths.git_state_path(&self.ctx.run_id),
                    &json!({"dirty": dirty}),
                );
            }
        }
    }

    fn save_compose_state(&self) {
        let path = self.ctx.paths.compose_state_path(&self.ctx.run_id);
        let _ = hive_core::write_json_atomic(
            &path,
            &json!({"stack": self.workflow_stack, "depth": self.workflow_stack.len()}),
        );
    }
}

/// Cheap detected-environment map used by phase conditions.
pub fn detect_environment(project_root: &std::path::Path) -> HashMap<String, bool> {
    let mut env = HashMap::new();
    env.insert(
        "has_frontend".to_string(),
        project_root.join("package.json").exists()
            || project_root.join("src/components").exists(),
    );
    let has_tests = ["tests", "test", "__tests__", "spec"]
        .iter()
        .any(|dir| project_root.join(dir).exists())
        || project_root.join("Cargo.toml").exists();
    env.insert("has_tests".to_string(), has_tests);
    env.insert(
        "has_docker".to_string(),
        project_root.join("Dockerfile").exists(),
    );
    env.insert(
        "has_ci".to_string(),
        project_root.join(".github/workflows").exists(),
    );
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_detection_reads_markers() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("tests")).expect("tests");
        std::fs::write(temp.path().join("Dockerfile"), "FROM scratch").expect("dockerfile");

        let env = detect_environment(temp.path());
        assert_eq!(env.get("has_tests"), Some(&true));
        assert_eq!(env.get("has_docker"), Some(&true));
        assert_eq!(env.get("has_frontend"), Some(&false));
    }
}
