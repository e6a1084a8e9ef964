use hive_core::HivePaths;
use hive_types::{Phase, PhaseType, Workflow};

/// Prefix that turns an agent phase into a sub-workflow invocation.
pub const WORKFLOW_AGENT_PREFIX: &str = "workflow:";

fn phase(
    name: &str,
    agent: &str,
    required: bool,
    task: &str,
) -> Phase {
    let mut phase = Phase::agent_phase(name, agent);
    phase.required = required;
    phase.task = Some(task.to_string());
    phase
}

fn build_verify() -> Phase {
    Phase {
        name: "build".to_string(),
        phase_type: PhaseType::BuildVerify,
        agent: None,
        required: false,
        task: None,
        condition: None,
        needs_handoff_from: None,
        human_checkpoint_after: false,
        on_failure: Some("debugger".to_string()),
        injected: false,
        reason: None,
    }
}

/// The eight built-in workflows. Project files under `.hive/workflows/`
/// shadow these by name.
pub fn builtin_workflows() -> Vec<Workflow> {
    vec![
        Workflow {
            name: "feature".to_string(),
            description: "Design, implement, verify, and review a feature".to_string(),
            phases: vec![
                {
                    let mut p = phase(
                        "plan",
                        "architect",
                        true,
                        "Design the change and create tasks under {{EPIC_ID}}",
                    );
                    p.human_checkpoint_after = true;
                    p
                },
                {
                    let mut p = phase(
                        "implement",
                        "implementer",
                        true,
                        "Work the ready tasks in {{EPIC_ID}}",
                    );
                    p.needs_handoff_from = Some("architect".to_string());
                    p.on_failure = Some("debugger".to_string());
                    p
                },
                build_verify(),
                {
                    let mut p = phase("test", "tester", true, "Verify the changes in {{EPIC_ID}}");
                    p.condition = Some("has_tests".to_string());
                    p
                },
                {
                    let mut p = phase("review", "reviewer", false, "Review the diff for {{EPIC_ID}}");
                    p.needs_handoff_from = Some("implementer".to_string());
                    p
                },
                phase(
                    "document",
                    "documenter",
                    false,
                    "Update documentation for {{EPIC_ID}}",
                ),
            ],
        },
        Workflow {
            name: "bugfix".to_string(),
            description: "Diagnose, fix, and verify a bug".to_string(),
            phases: vec![
                phase(
                    "diagnose",
                    "debugger",
                    true,
                    "Reproduce and isolate the reported bug",
                ),
                {
                    let mut p = phase("fix", "implementer", true, "Fix the diagnosed bug");
                    p.needs_handoff_from = Some("debugger".to_string());
                    p
                },
                build_verify(),
                {
                    let mut p = phase("test", "tester", true, "Add a regression test and verify");
                    p.condition = Some("has_tests".to_string());
                    p
                },
                {
                    let mut p = phase("review", "reviewer", false, "Review the fix");
                    p.needs_handoff_from = Some("implementer".to_string());
                    p
                },
            ],
        },
        Workflow {
            name: "refactor".to_string(),
            description: "Restructure code without changing behavior".to_string(),
            phases: vec![
                phase("plan", "architect", true, "Plan the refactor in steps"),
                {
                    let mut p = phase("refactor", "implementer", true, "Execute the refactor plan");
                    p.needs_handoff_from = Some("architect".to_string());
                    p.on_failure = Some("debugger".to_string());
                    p
                },
                build_verify(),
                {
                    let mut p = phase("test", "tester", true, "Verify behavior is unchanged");
                    p.condition = Some("has_tests".to_string());
                    p
                },
                {
                    let mut p = phase("review", "reviewer", false, "Review the refactor");
                    p.needs_handoff_from = Some("implementer".to_string());
                    p
                },
            ],
        },
        Workflow {
            name: "test".to_string(),
            description: "Raise test coverage".to_string(),
            phases: vec![phase(
                "write_tests",
                "tester",
                true,
                "Add missing coverage for {{EPIC_ID}}",
            )],
        },
        Workflow {
            name: "review".to_string(),
            description: "Review the current diff".to_string(),
            phases: vec![
                phase(
                    "parallel_review",
                    "reviewer",
                    true,
                    "Review the current diff",
                ),
                Phase {
                    name: "fix_blocking".to_string(),
                    phase_type: PhaseType::FixBlocking,
                    agent: Some("implementer".to_string()),
                    required: false,
                    task: None,
                    condition: None,
                    needs_handoff_from: None,
                    human_checkpoint_after: false,
                    on_failure: None,
                    injected: false,
                    reason: None,
                },
            ],
        },
        Workflow {
            name: "quick".to_string(),
            description: "Single implementer pass for small changes".to_string(),
            phases: vec![phase(
                "implement",
                "implementer",
                true,
                "Make the requested change",
            )],
        },
        Workflow {
            name: "docs".to_string(),
            description: "Documentation-only change".to_string(),
            phases: vec![phase(
                "document",
                "documenter",
                true,
                "Update the documentation",
            )],
        },
        Workflow {
            name: "migration".to_string(),
            description: "Structured migration with verification".to_string(),
            phases: vec![
                phase("plan", "architect", true, "Plan the migration and rollback"),
                {
                    let mut p = phase("migrate", "implementer", true, "Execute the migration plan");
                    p.needs_handoff_from = Some("architect".to_string());
                    p.on_failure = Some("debugger".to_string());
                    p
                },
                build_verify(),
                {
                    let mut p = phase("test", "tester", true, "Verify the migrated system");
                    p.condition = Some("has_tests".to_string());
                    p
                },
                {
                    let mut p = phase("review", "reviewer", false, "Review the migration");
                    p.needs_handoff_from = Some("implementer".to_string());
                    p
                },
            ],
        },
    ]
}

/// Look up a workflow: a project document shadows a built-in of the same
/// name.
pub fn load_workflow(paths: &HivePaths, name: &str) -> Option<Workflow> {
    let project_path = paths.workflow_path(name);
    if let Ok(raw) = std::fs::read_to_string(&project_path) {
        if let Ok(workflow) = serde_json::from_str::<Workflow>(&raw) {
            return Some(workflow);
        }
    }
    builtin_workflows().into_iter().find(|w| w.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_eight_builtins_exist() {
        let names: Vec<String> = builtin_workflows().into_iter().map(|w| w.name).collect();
        for expected in hive_types::BUILTIN_WORKFLOWS {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn project_workflow_shadows_builtin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HivePaths::resolve(temp.path(), None);
        std::fs::create_dir_all(&paths.workflows_dir).expect("dir");
        std::fs::write(
            paths.workflow_path("quick"),
            r#"{"name":"quick","description":"custom","phases":[{"name":"solo","type":"agent","agent":"documenter","required":true}]}"#,
        )
        .expect("write");

        let workflow = load_workflow(&paths, "quick").expect("workflow");
        assert_eq!(workflow.description, "custom");
        assert_eq!(workflow.phases[0].agent.as_deref(), Some("documenter"));
    }

    #[test]
    fn unknown_workflow_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HivePaths::resolve(temp.path(), None);
        assert!(load_workflow(&paths, "yolo").is_none());
    }
}
