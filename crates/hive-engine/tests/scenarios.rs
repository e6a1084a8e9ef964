use std::sync::Arc;

use hive_core::{events_by_agent, events_by_type, RunContext, RunSettings};
use hive_engine::{load_workflow, select_workflow, WorkflowEngine};
use hive_memory::MemoryStore;
use hive_runner::{NullTracker, StubInvoker};
use hive_types::{Phase, Run, RunStatus, Workflow, REPORT_END, REPORT_START};

fn report(json: &str) -> String {
    format!("{REPORT_START}\n{json}\n{REPORT_END}")
}

struct Harness {
    _temp: tempfile::TempDir,
    ctx: RunContext,
    stub: Arc<StubInvoker>,
    engine: WorkflowEngine,
}

fn harness(objective: &str, workflow: &str, settings: RunSettings) -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let run = Run::new(objective, workflow);
    let ctx = RunContext::bootstrap(temp.path(), &run, settings).expect("bootstrap");
    let stub = Arc::new(StubInvoker::new());
    let engine = WorkflowEngine::new(ctx.clone(), stub.clone(), Arc::new(NullTracker))
        .expect("engine");
    Harness {
        _temp: temp,
        ctx,
        stub,
        engine,
    }
}

fn optional_agent_workflow(name: &str, phase_name: &str, agent: &str) -> Workflow {
    let mut phase = Phase::agent_phase(phase_name, agent);
    phase.required = false;
    Workflow {
        name: name.to_string(),
        description: String::new(),
        phases: vec![phase],
    }
}

#[tokio::test]
async fn scenario_1_happy_path_quick_workflow() {
    let choice = select_workflow("rename flag in config");
    assert_eq!(choice.name, "quick");

    let mut h = harness("rename flag in config", "quick", RunSettings::default());
    h.stub.push_output(format!(
        "Writing src/config.ts\n{}",
        report(
            r#"{"status":"complete","confidence":0.9,"files_modified":["src/config.ts"],"summary":"renamed"}"#
        )
    ));

    let workflow = load_workflow(&h.ctx.paths, "quick").expect("workflow");
    let status = h.engine.execute(&workflow).await.expect("execute");
    assert_eq!(status, RunStatus::Complete);

    let pad = h.ctx.scratchpad_store().load().expect("scratchpad");
    assert_eq!(pad.completed_agents, vec!["implementer"]);
    assert!(pad.open_blockers().is_empty());
    assert_eq!(pad.status, RunStatus::Complete);

    let memory = MemoryStore::new(&h.ctx.paths.memory_path).load().expect("memory");
    assert_eq!(
        memory.file_map.get("src/config.ts").map(String::as_str),
        Some("modified")
    );

    let events = &h.ctx.paths.events_path;
    assert_eq!(events_by_type(events, "run_start").len(), 1);
    assert_eq!(events_by_type(events, "run_complete").len(), 1);
    let starts = events_by_type(events, "agent_start");
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].field_str("agent"), Some("implementer"));
    let completes = events_by_agent(events, "implementer")
        .into_iter()
        .filter(|event| event.event == "agent_complete")
        .collect::<Vec<_>>();
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].field_str("result"), Some("pass"));
}

#[tokio::test]
async fn scenario_2_challenge_resolution() {
    let mut h = harness("add /users endpoint", "feature", RunSettings::default());

    // plan → implement → (build skipped) → (test condition false) → review
    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.9,"summary":"designed endpoint","decisions":["POST /users with zod schema"]}"#,
    ));
    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.9,"files_modified":["src/api/users.ts"],"summary":"endpoint implemented"}"#,
    ));
    h.stub.push_output(report(
        r#"{"status":"challenge","challenged_agent":"implementer","issue":"missing input validation","suggestion":"validate body schema","evidence":"src/api/users.ts:17"}"#,
    ));
    // challenge response touches the evidence file
    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.85,"files_modified":["src/api/users.ts"],"summary":"added body validation"}"#,
    ));
    // challenger confirms
    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.9,"summary":"issue resolved"}"#,
    ));
    // documenter wraps up
    h.stub.push_output(report(r#"{"status":"complete","summary":"docs updated"}"#));

    let workflow = load_workflow(&h.ctx.paths, "feature").expect("workflow");
    let status = h.engine.execute(&workflow).await.expect("execute");
    assert_eq!(status, RunStatus::Complete);

    let memory = MemoryStore::new(&h.ctx.paths.memory_path).load().expect("memory");
    assert_eq!(memory.challenge_history.len(), 1);
    let record = &memory.challenge_history[0];
    assert_eq!(record.from, "reviewer");
    assert_eq!(record.to, "implementer");
    assert_eq!(record.category, "missing_code");
    assert_eq!(record.resolution, "resolved");

    let events = &h.ctx.paths.events_path;
    assert_eq!(events_by_type(events, "challenge_start").len(), 1);
    assert_eq!(events_by_type(events, "challenge_resolved").len(), 1);
    assert!(events_by_type(events, "challenge_unresolved").is_empty());
}

#[tokio::test]
async fn scenario_3_escalation_after_exhaustion() {
    let mut h = harness("add /users endpoint", "feature", RunSettings::default());

    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.9,"summary":"designed endpoint"}"#,
    ));
    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.9,"files_modified":["src/api/users.ts"],"summary":"endpoint implemented"}"#,
    ));
    h.stub.push_output(report(
        r#"{"status":"challenge","challenged_agent":"implementer","issue":"missing input validation","suggestion":"validate body schema","evidence":"src/api/users.ts:17"}"#,
    ));
    // two responses, neither touching the evidence nor the issue
    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.7,"summary":"refactored logging"}"#,
    ));
    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.7,"summary":"tweaked formatting"}"#,
    ));

    let workflow = load_workflow(&h.ctx.paths, "feature").expect("workflow");
    let status = h.engine.execute(&workflow).await.expect("execute");
    assert_eq!(status, RunStatus::Blocked);

    let events = &h.ctx.paths.events_path;
    assert_eq!(events_by_type(events, "challenge_unresolved").len(), 1);
    assert!(!events_by_type(events, "human_checkpoint").is_empty());

    let pad = h.ctx.scratchpad_store().load().expect("scratchpad");
    assert_eq!(pad.open_blockers().len(), 1);
    assert!(pad.open_blockers()[0].text.contains("unresolved challenge"));

    let memory = MemoryStore::new(&h.ctx.paths.memory_path).load().expect("memory");
    assert_eq!(memory.challenge_history[0].resolution, "escalated");
}

#[tokio::test]
async fn scenario_4_budget_skip() {
    let settings = RunSettings {
        cost_aware: true,
        cost_budget: Some(0.10),
        ..RunSettings::default()
    };
    let h = harness("write the launch notes", "docs", settings);

    // a prior run taught us what documenter costs
    MemoryStore::new(&h.ctx.paths.memory_path)
        .update(|memory| memory.record_cost("documenter", 8_000, 1_500, 0.04))
        .expect("seed memory");
    h.ctx
        .cost
        .lock()
        .expect("cost lock")
        .total_cost_usd = 0.09;

    let workflow = optional_agent_workflow("docs-pass", "document", "documenter");
    let mut engine = h.engine;
    let status = engine.execute(&workflow).await.expect("execute");
    assert_eq!(status, RunStatus::Complete);

    // the documenter was never invoked
    assert!(h.stub.prompts().is_empty());

    let decisions = events_by_type(&h.ctx.paths.events_path, "smart_decision");
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].field_str("trigger"), Some("budget"));
    assert_eq!(decisions[0].field_str("agent"), Some("documenter"));
}

#[tokio::test]
async fn scenario_5_adaptation_injects_extra_review() {
    let mut h = harness("overhaul the settings module", "quick", RunSettings::default());

    let files: Vec<String> = (0..12).map(|i| format!("\"src/settings/f{i}.ts\"")).collect();
    h.stub.push_output(report(&format!(
        r#"{{"status":"complete","confidence":0.9,"files_modified":[{}],"summary":"broad edit"}}"#,
        files.join(",")
    )));
    // the injected reviewer pass
    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.9,"summary":"looks fine"}"#,
    ));

    let workflow = load_workflow(&h.ctx.paths, "quick").expect("workflow");
    let status = h.engine.execute(&workflow).await.expect("execute");
    assert_eq!(status, RunStatus::Complete);

    let events = &h.ctx.paths.events_path;
    let injected = events_by_type(events, "phase_injected");
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].field_str("phase"), Some("extra_review"));
    assert_eq!(injected[0].field_str("agent"), Some("reviewer"));

    // the injected phase was consumed: reviewer actually ran
    let reviewer_starts = events_by_agent(events, "reviewer")
        .into_iter()
        .filter(|event| event.event == "agent_start")
        .count();
    assert_eq!(reviewer_starts, 1);

    let pad = h.ctx.scratchpad_store().load().expect("scratchpad");
    assert!(pad.injected_phases.is_empty());
    assert!(pad.completed_agents.contains(&"reviewer".to_string()));
}

#[tokio::test]
async fn scenario_6_fast_mode_skip() {
    let settings = RunSettings {
        fast_mode: true,
        ..RunSettings::default()
    };
    let h = harness("docs readme update", "review", settings);

    MemoryStore::new(&h.ctx.paths.memory_path)
        .update(|memory| {
            for _ in 0..12 {
                memory.record_skip_outcome("reviewer", "docs readme update", true, false);
            }
        })
        .expect("seed memory");

    let workflow = optional_agent_workflow("light-review", "look", "reviewer");
    let mut engine = h.engine;
    let status = engine.execute(&workflow).await.expect("execute");
    assert_eq!(status, RunStatus::Complete);
    assert!(h.stub.prompts().is_empty());

    let decisions = events_by_type(&h.ctx.paths.events_path, "smart_decision");
    assert_eq!(decisions.len(), 1);
    assert_eq!(
        decisions[0].field_str("reason"),
        Some("high_success_pattern")
    );
}

#[tokio::test]
async fn composition_cycle_is_rejected() {
    let h = harness("compose things", "loop", RunSettings::default());
    std::fs::create_dir_all(&h.ctx.paths.workflows_dir).expect("dir");
    std::fs::write(
        h.ctx.paths.workflow_path("loop"),
        r#"{"name":"loop","description":"self-referential","phases":[{"name":"again","type":"agent","agent":"workflow:loop","required":true}]}"#,
    )
    .expect("write");

    let workflow = load_workflow(&h.ctx.paths, "loop").expect("workflow");
    let mut engine = h.engine;
    let status = engine.execute(&workflow).await.expect("execute");
    assert_eq!(status, RunStatus::Failed);

    let errors = events_by_type(&h.ctx.paths.events_path, "composition_error");
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .field_str("error")
        .expect("error field")
        .contains("already on the execution stack"));
}

#[tokio::test]
async fn composition_depth_is_bounded() {
    let h = harness("deep nesting", "d1", RunSettings::default());
    std::fs::create_dir_all(&h.ctx.paths.workflows_dir).expect("dir");
    for level in 1..=6 {
        let body = if level < 6 {
            format!(
                r#"{{"name":"d{level}","description":"","phases":[{{"name":"down","type":"agent","agent":"workflow:d{next}","required":true}}]}}"#,
                next = level + 1
            )
        } else {
            r#"{"name":"d6","description":"","phases":[{"name":"leaf","type":"agent","agent":"documenter","required":true}]}"#
                .to_string()
        };
        std::fs::write(h.ctx.paths.workflow_path(&format!("d{level}")), body).expect("write");
    }

    let workflow = load_workflow(&h.ctx.paths, "d1").expect("workflow");
    let mut engine = h.engine;
    let status = engine.execute(&workflow).await.expect("execute");
    assert_eq!(status, RunStatus::Failed);

    let errors = events_by_type(&h.ctx.paths.events_path, "composition_error");
    assert!(!errors.is_empty());
    assert!(errors[0]
        .field_str("error")
        .expect("error field")
        .contains("nesting depth"));
}

#[tokio::test]
async fn subworkflow_results_merge_back_into_parent() {
    let mut h = harness("compose a quick pass", "outer", RunSettings::default());
    h.stub.push_output(report(
        r#"{"status":"complete","confidence":0.9,"files_modified":["src/lib.rs"],"decisions":["keep the public API"],"summary":"done"}"#,
    ));

    let mut sub_phase = Phase::agent_phase("sub", "workflow:quick");
    sub_phase.required = true;
    let outer = Workflow {
        name: "outer".to_string(),
        description: String::new(),
        phases: vec![sub_phase],
    };

    let status = h.engine.execute(&outer).await.expect("execute");
    assert_eq!(status, RunStatus::Complete);

    let pad = h.ctx.scratchpad_store().load().expect("scratchpad");
    assert!(pad.completed_agents.contains(&"implementer".to_string()));
    assert!(pad.context.key_files.contains(&"src/lib.rs".to_string()));
    assert!(pad
        .decisions
        .iter()
        .any(|decision| decision.decision == "keep the public API"));
}
