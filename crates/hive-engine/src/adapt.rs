use hive_types::{Phase, ReportStatus, SelfReport};

use hive_runner::{classify, AgentClass};

/// What the adaptation engine wants done after inspecting a report.
#[derive(Debug, Clone)]
pub enum Adaptation {
    Inject(Phase),
    Escalate(String),
}

/// Run-scoped adaptation state: each trigger fires at most once per run,
/// tester failures accumulate toward an escalation.
#[derive(Debug)]
pub struct AdaptationEngine {
    enabled: bool,
    many_files: usize,
    max_failures: u32,
    test_failure_count: u32,
    injected_extra_review: bool,
    injected_security: bool,
}

impl AdaptationEngine {
    pub fn new(enabled: bool, many_files: usize, max_failures: u32) -> Self {
        Self {
            enabled,
            many_files,
            max_failures,
            test_failure_count: 0,
            injected_extra_review: false,
            injected_security: false,
        }
    }

    pub fn on_agent_result(&mut self, agent: &str, report: &SelfReport) -> Vec<Adaptation> {
        if !self.enabled {
            return Vec::new();
        }
        let mut out = Vec::new();

        let succeeded = matches!(
            report.status,
            ReportStatus::Complete | ReportStatus::Partial
        );

        if succeeded
            && report.files_modified.len() > self.many_files
            && !self.injected_extra_review
        {
            self.injected_extra_review = true;
            out.push(Adaptation::Inject(Phase::injected(
                "extra_review",
                "reviewer",
                format!("{} files modified in one pass", report.files_modified.len()),
            )));
        }

        if classify(agent) == AgentClass::Tester
            && matches!(report.status, ReportStatus::Blocked | ReportStatus::Partial)
        {
            self.test_failure_count += 1;
            if self.test_failure_count >= self.max_failures {
                out.push(Adaptation::Escalate(format!(
                    "{} test failures this run",
                    self.test_failure_count
                )));
            }
        }

        if succeeded
            && report.serious_issue_count() > 0
            && agent != "security"
            && !self.injected_security
        {
            self.injected_security = true;
            out.push(Adaptation::Inject(Phase::injected(
                "security_review",
                "security",
                "critical or high severity issues reported".to_string(),
            )));
        }

        out
    }
}
