use std::path::{Path, PathBuf};

use serde::Deserialize;

use hive_types::HiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOrigin {
    ProjectSpecialized,
    ProjectGeneric,
    GlobalSpecialized,
    GlobalGeneric,
    Bundled,
}

/// Optional YAML frontmatter on a prompt override file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PromptFrontmatter {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cli: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPrompt {
    pub body: String,
    pub origin: PromptOrigin,
    pub frontmatter: PromptFrontmatter,
}

/// Resolve an agent's system prompt. First existing wins:
/// project `<agent>-<framework>.md`, project `<agent>.md`, the same pair
/// under the global agents dir, then the bundled generic prompt.
pub fn resolve_prompt(
    agent: &str,
    framework: Option<&str>,
    project_agents_dir: &Path,
    global_agents_dir: Option<&Path>,
) -> Result<ResolvedPrompt, HiveError> {
    let mut candidates: Vec<(PathBuf, PromptOrigin)> = Vec::new();
    if let Some(framework) = framework {
        candidates.push((
            project_agents_dir.join(format!("{agent}-{framework}.md")),
            PromptOrigin::ProjectSpecialized,
        ));
    }
    candidates.push((
        project_agents_dir.join(format!("{agent}.md")),
        PromptOrigin::ProjectGeneric,
    ));
    if let Some(global) = global_agents_dir {
        if let Some(framework) = framework {
            candidates.push((
                global.join(format!("{agent}-{framework}.md")),
                PromptOrigin::GlobalSpecialized,
            ));
        }
        candidates.push((
            global.join(format!("{agent}.md")),
            PromptOrigin::GlobalGeneric,
        ));
    }

    for (path, origin) in candidates {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            let (frontmatter, body) = parse_prompt_markdown(&raw);
            return Ok(ResolvedPrompt {
                body,
                origin,
                frontmatter,
            });
        }
    }

    bundled_prompt(agent)
        .map(|body| ResolvedPrompt {
            body: body.to_string(),
            origin: PromptOrigin::Bundled,
            frontmatter: PromptFrontmatter::default(),
        })
        .ok_or_else(|| HiveError::AgentNotFound(agent.to_string()))
}

/// Split optional `---` YAML frontmatter from the prompt body.
fn parse_prompt_markdown(raw: &str) -> (PromptFrontmatter, String) {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with("---") {
        return (PromptFrontmatter::default(), raw.trim().to_string());
    }
    let mut parts = trimmed.splitn(3, "---");
    let _ = parts.next();
    let Some(frontmatter) = parts.next() else {
        return (PromptFrontmatter::default(), raw.trim().to_string());
    };
    let Some(body) = parts.next() else {
        return (PromptFrontmatter::default(), raw.trim().to_string());
    };
    let parsed = serde_yaml::from_str::<PromptFrontmatter>(frontmatter).unwrap_or_default();
    (parsed, body.trim().to_string())
}

/// `{{KEY}}` substitution for prompt templates.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

fn bundled_prompt(agent: &str) -> Option<&'static str> {
    let prompt = match agent {
        "architect" => {
            "You are the architect agent. Decompose the objective into tasks with \
clear boundaries, decide the technical approach, and record every decision \
with a rationale. Create tasks in the tracker under epic {{EPIC_ID}} and hand \
off a build plan to the implementer."
        }
        "implementer" => {
            "You are the implementer agent. Work the ready tasks for epic \
{{EPIC_ID}} one at a time. Follow the established patterns in the codebase, \
keep changes minimal, and report every file you modify."
        }
        "tester" => {
            "You are the tester agent. Run the project's test command against the \
current diff, add missing coverage for changed behavior, and report failures \
as blockers with exact output."
        }
        "e2e-tester" => {
            "You are the end-to-end tester agent. Exercise the changed flows \
through the application's outer surface and report each failure with \
reproduction steps."
        }
        "component-tester" => {
            "You are the component tester agent. Test changed components in \
isolation, covering props, events, and edge states."
        }
        "reviewer" => {
            "You are the reviewer agent. Review the current diff for correctness, \
maintainability, and missed requirements. File each problem as an issue with \
severity, file, and line. Challenge a prior agent only for blocking defects."
        }
        "security" => {
            "You are the security agent. Review the current diff for injection, \
authentication, authorization, and data-exposure problems. File each finding \
with severity and a concrete fix."
        }
        "documenter" => {
            "You are the documenter agent. Update project documentation for the \
changes in this run, following the project's documentation conventions."
        }
        "debugger" => {
            "You are the debugger agent. Reproduce the reported failure, isolate \
the root cause, and either fix it or file a precise blocker describing what \
you found."
        }
        _ => return None,
    };
    Some(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_specialized_wins_over_generic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agents = temp.path().join("agents");
        std::fs::create_dir_all(&agents).expect("agents");
        std::fs::write(agents.join("reviewer-react.md"), "react reviewer").expect("specialized");
        std::fs::write(agents.join("reviewer.md"), "generic reviewer").expect("generic");

        let resolved =
            resolve_prompt("reviewer", Some("react"), &agents, None).expect("resolve");
        assert_eq!(resolved.origin, PromptOrigin::ProjectSpecialized);
        assert_eq!(resolved.body, "react reviewer");

        let generic = resolve_prompt("reviewer", None, &agents, None).expect("resolve");
        assert_eq!(generic.origin, PromptOrigin::ProjectGeneric);
    }

    #[test]
    fn bundled_prompt_is_the_last_resort() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolved =
            resolve_prompt("implementer", None, &temp.path().join("agents"), None)
                .expect("resolve");
        assert_eq!(resolved.origin, PromptOrigin::Bundled);
        assert!(resolved.body.contains("implementer"));
    }

    #[test]
    fn unknown_agent_with_no_files_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            resolve_prompt("astrologer", None, &temp.path().join("agents"), None),
            Err(HiveError::AgentNotFound(_))
        ));
    }

    #[test]
    fn frontmatter_overrides_parse() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agents = temp.path().join("agents");
        std::fs::create_dir_all(&agents).expect("agents");
        std::fs::write(
            agents.join("tester.md"),
            "---\nmodel: haiku\ncli: claude\n---\nProject tester prompt",
        )
        .expect("write");

        let resolved = resolve_prompt("tester", None, &agents, None).expect("resolve");
        assert_eq!(resolved.frontmatter.model.as_deref(), Some("haiku"));
        assert_eq!(resolved.body, "Project tester prompt");
    }

    #[test]
    fn substitution_replaces_all_occurrences() {
        let out = substitute(
            "Epic {{EPIC_ID}} for {{EPIC_ID}}",
            &[("EPIC_ID", "epic-9")],
        );
        assert_eq!(out, "Epic epic-9 for epic-9");
    }
}
