use hive_types::Handoff;

/// Broad role classes driving context curation. Specific agent names
/// collapse into a class; unknown names get the conservative default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentClass {
    Architect,
    Implementer,
    Tester,
    Reviewer,
    Documenter,
    Debugger,
    Other,
}

pub fn classify(agent: &str) -> AgentClass {
    match agent {
        "architect" => AgentClass::Architect,
        "implementer" => AgentClass::Implementer,
        "tester" | "e2e-tester" | "component-tester" => AgentClass::Tester,
        "reviewer" | "security" => AgentClass::Reviewer,
        "documenter" => AgentClass::Documenter,
        "debugger" => AgentClass::Debugger,
        _ => AgentClass::Other,
    }
}

/// Everything the curator may draw from. Sections the role does not use
/// simply stay empty.
#[derive(Debug, Clone, Default)]
pub struct CurationInput {
    pub objective: String,
    pub memory_md: String,
    pub agent_history_md: String,
    pub index_md: String,
    pub guidelines_md: String,
    pub user_context_md: String,
    pub diff_context: String,
    pub test_command: Option<String>,
    pub scratchpad_md: String,
    pub handoff: Option<Handoff>,
    pub ready_tasks_md: String,
    pub challenge_history_md: String,
    pub warnings: Vec<String>,
}

/// Assemble the role-specific context block of an agent prompt. Each class
/// sees a different subset; the scratchpad summary, handoff, ready tasks,
/// challenge history, and warnings are always appended.
pub fn curate(agent: &str, input: &CurationInput) -> String {
    let mut sections: Vec<&str> = Vec::new();
    let test_command_line = input
        .test_command
        .as_ref()
        .map(|cmd| format!("## Test command\n\n`{cmd}`\n"));

    match classify(agent) {
        AgentClass::Architect => {
            sections.extend([
                input.memory_md.as_str(),
                input.index_md.as_str(),
                input.guidelines_md.as_str(),
                input.user_context_md.as_str(),
            ]);
        }
        AgentClass::Implementer => {
            sections.extend([
                input.agent_history_md.as_str(),
                input.index_md.as_str(),
                input.memory_md.as_str(),
                input.user_context_md.as_str(),
            ]);
        }
        AgentClass::Tester => {
            sections.extend([
                input.diff_context.as_str(),
                input.agent_history_md.as_str(),
            ]);
        }
        AgentClass::Reviewer => {
            sections.extend([
                input.objective.as_str(),
                input.diff_context.as_str(),
                input.agent_history_md.as_str(),
            ]);
        }
        AgentClass::Documenter => {
            sections.extend([input.guidelines_md.as_str(), input.index_md.as_str()]);
        }
        AgentClass::Debugger => {
            sections.extend([
                input.memory_md.as_str(),
                input.index_md.as_str(),
                input.agent_history_md.as_str(),
            ]);
        }
        AgentClass::Other => {
            sections.extend([
                input.memory_md.as_str(),
                input.index_md.as_str(),
                input.guidelines_md.as_str(),
            ]);
        }
    }

    let mut out = String::new();
    for section in sections {
        push_section(&mut out, section);
    }
    if classify(agent) == AgentClass::Tester {
        if let Some(line) = &test_command_line {
            push_section(&mut out, line);
        }
    }

    push_section(&mut out, &input.scratchpad_md);
    if let Some(handoff) = &input.handoff {
        push_section(&mut out, &handoff.render_markdown());
    }
    push_section(&mut out, &input.ready_tasks_md);
    push_section(&mut out, &input.challenge_history_md);
    if !input.warnings.is_empty() {
        let mut warnings = String::from("## Warnings\n\n");
        for warning in &input.warnings {
            warnings.push_str(&format!("- {warning}\n"));
        }
        push_section(&mut out, &warnings);
    }
    out
}

fn push_section(out: &mut String, section: &str) {
    let trimmed = section.trim();
    if trimmed.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(trimmed);
    out.push('\n');
}
