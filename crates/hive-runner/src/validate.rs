use serde::Serialize;

use hive_types::{Handoff, Scratchpad, SelfReport};

/// Closed set of contract checks, dispatched as tagged variants rather
/// than lookup-by-string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractCheck {
    HandoffValid,
    EpicExists,
    AtLeastOneTaskReady,
    NoTasksStuckInProgress,
    BuildPassesOrBlockerFiled,
    ScratchpadUpdatedWithDecisions,
    FilesModifiedAccurate,
    TaskStatusUpdated,
    TasksCreated,
}

impl ContractCheck {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "HandoffValid" => Self::HandoffValid,
            "EpicExists" => Self::EpicExists,
            "AtLeastOneTaskReady" => Self::AtLeastOneTaskReady,
            "NoTasksStuckInProgress" => Self::NoTasksStuckInProgress,
            "BuildPassesOrBlockerFiled" => Self::BuildPassesOrBlockerFiled,
            "ScratchpadUpdatedWithDecisions" => Self::ScratchpadUpdatedWithDecisions,
            "FilesModifiedAccurate" => Self::FilesModifiedAccurate,
            "TaskStatusUpdated" => Self::TaskStatusUpdated,
            "TasksCreated" => Self::TasksCreated,
            _ => return None,
        })
    }
}

impl ContractCheck {
    fn evaluate(self, ctx: &CheckContext<'_>) -> (bool, String) {
        match self {
            ContractCheck::HandoffValid => match ctx.handoff {
                None => (true, "no handoff expected".to_string()),
                Some(handoff) if !handoff.summary.trim().is_empty() => {
                    (true, format!("handoff from {}", handoff.from_agent))
                }
                Some(_) => (false, "handoff has an empty summary".to_string()),
            },
            ContractCheck::EpicExists => match ctx.epic_exists {
                Some(true) | None => (true, "epic present".to_string()),
                Some(false) => (false, "epic not found in tracker".to_string()),
            },
            ContractCheck::AtLeastOneTaskReady => match ctx.ready_task_count {
                None => (true, "tracker not consulted".to_string()),
                Some(0) => (false, "no ready tasks".to_string()),
                Some(n) => (true, format!("{n} ready tasks")),
            },
            ContractCheck::NoTasksStuckInProgress => match ctx.stuck_task_count {
                None => (true, "tracker not consulted".to_string()),
                Some(0) => (true, "nothing stuck".to_string()),
                Some(n) => (false, format!("{n} tasks stuck in progress")),
            },
            ContractCheck::BuildPassesOrBlockerFiled => match ctx.build_ok {
                Some(true) | None => (true, "build passed".to_string()),
                Some(false) if !ctx.scratchpad.open_blockers().is_empty() => {
                    (true, "build failed but a blocker is filed".to_string())
                }
                Some(false) => (false, "build failed and no blocker filed".to_string()),
            },
            ContractCheck::ScratchpadUpdatedWithDecisions => {
                let has_decisions = ctx
                    .report
                    .map(|r| !r.decisions.is_empty())
                    .unwrap_or(false)
                    || !ctx.scratchpad.decisions.is_empty();
                if has_decisions {
                    (true, "decisions recorded".to_string())
                } else {
                    (false, "no decisions recorded".to_string())
                }
            }
            ContractCheck::FilesModifiedAccurate => {
                let claimed = ctx.report.map(|r| r.files_modified.len()).unwrap_or(0);
                if claimed == 0 || ctx.files_counted > 0 {
                    (true, format!("claimed {claimed}, observed {}", ctx.files_counted))
                } else {
                    (
                        false,
                        format!("claimed {claimed} files but output shows none"),
                    )
                }
            }
            ContractCheck::TaskStatusUpdated => {
                let updated = ctx
                    .report
                    .map(|r| !r.tasks_closed.is_empty() || !r.tasks_created.is_empty())
                    .unwrap_or(false);
                if updated {
                    (true, "task status changed".to_string())
                } else {
                    (false, "no task status change reported".to_string())
                }
            }
            ContractCheck::TasksCreated => {
                let created = ctx
                    .report
                    .map(|r| !r.tasks_created.is_empty())
                    .unwrap_or(false);
                if created {
                    (true, "tasks created".to_string())
                } else {
                    (false, "no tasks created".to_string())
                }
            }
        }
    }
}

/// Evaluation context: scratchpad state plus the agent's raw output and
/// whatever tracker/build facts the caller gathered.
#[derive(Debug, Clone)]
pub struct CheckContext<'a> {
    pub scratchpad: &'a Scratchpad,
    pub output: &'a str,
    pub report: Option<&'a SelfReport>,
    pub handoff: Option<&'a Handoff>,
    pub epic_exists: Option<bool>,
    pub ready_task_count: Option<usize>,
    pub stuck_task_count: Option<usize>,
    pub build_ok: Option<bool>,
    pub files_counted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub results: Vec<CheckResult>,
    pub valid: bool,
}

impl ValidationReport {
    pub fn failure_details(&self) -> String {
        self.results
            .iter()
            .filter(|result| !result.passed)
            .map(|result| format!("{}: {}", result.check, result.details))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Run the named checks. Names outside the closed set pass with a
/// "skipped" note; the aggregate is valid iff all pass.
pub fn run_checks(names: &[String], ctx: &CheckContext<'_>) -> ValidationReport {
    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let result = match ContractCheck::from_name(name) {
            Some(check) => {
                let (passed, details) = check.evaluate(ctx);
                CheckResult {
                    check: name.clone(),
                    passed,
                    details,
                }
            }
            None => CheckResult {
                check: name.clone(),
                passed: true,
                details: "skipped: unknown check".to_string(),
            },
        };
        results.push(result);
    }
    let valid = results.iter().all(|result| result.passed);
    ValidationReport { results, valid }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_types::{extract_report, REPORT_END, REPORT_START};

    fn scratchpad() -> Scratchpad {
        Scratchpad::new("run_1", "trace-1", "objective")
    }

    fn base_ctx<'a>(pad: &'a Scratchpad, report: Option<&'a SelfReport>) -> CheckContext<'a> {
        CheckContext {
            scratchpad: pad,
            output: "",
            report,
            handoff: None,
            epic_exists: None,
            ready_task_count: None,
            stuck_task_count: None,
            build_ok: None,
            files_counted: 0,
        }
    }

    fn report(raw: &str) -> SelfReport {
        extract_report(&format!("{REPORT_START}\n{raw}\n{REPORT_END}"))
            .expect("parse")
            .expect("present")
    }

    #[test]
    fn unknown_checks_pass_as_skipped() {
        let pad = scratchpad();
        let out = run_checks(&["NotARealCheck".to_string()], &base_ctx(&pad, None));
        assert!(out.valid);
        assert!(out.results[0].details.contains("skipped"));
    }

    #[test]
    fn aggregate_fails_when_any_check_fails() {
        let pad = scratchpad();
        let out = run_checks(
            &["EpicExists".to_string(), "TasksCreated".to_string()],
            &CheckContext {
                epic_exists: Some(true),
                ..base_ctx(&pad, None)
            },
        );
        assert!(!out.valid);
        assert!(out.failure_details().contains("TasksCreated"));
    }

    #[test]
    fn build_failure_is_acceptable_with_a_blocker() {
        let mut pad = scratchpad();
        let failing = run_checks(
            &["BuildPassesOrBlockerFiled".to_string()],
            &CheckContext {
                build_ok: Some(false),
                ..base_ctx(&pad, None)
            },
        );
        assert!(!failing.valid);

        pad.add_blocker("tester", "build broken on main");
        let excused = run_checks(
            &["BuildPassesOrBlockerFiled".to_string()],
            &CheckContext {
                build_ok: Some(false),
                ..base_ctx(&pad, None)
            },
        );
        assert!(excused.valid);
    }

    #[test]
    fn files_modified_accuracy_compares_claim_to_output() {
        let pad = scratchpad();
        let claimed = report(r#"{"status":"complete","files_modified":["a.ts","b.ts"]}"#);
        let inaccurate = run_checks(
            &["FilesModifiedAccurate".to_string()],
            &base_ctx(&pad, Some(&claimed)),
        );
        assert!(!inaccurate.valid);

        let accurate = run_checks(
            &["FilesModifiedAccurate".to_string()],
            &CheckContext {
                files_counted: 2,
                ..base_ctx(&pad, Some(&claimed))
            },
        );
        assert!(accurate.valid);
    }
}
