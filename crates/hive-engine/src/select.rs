use regex::Regex;

/// Keyword table per built-in workflow, with a tie-breaking priority.
const WORKFLOW_KEYWORDS: &[(&str, &[&str], u32)] = &[
    (
        "feature",
        &["add", "implement", "create", "build", "feature", "endpoint", "support"],
        50,
    ),
    (
        "bugfix",
        &["fix", "bug", "issue", "crash", "error", "broken", "regression"],
        60,
    ),
    (
        "refactor",
        &["refactor", "restructure", "cleanup", "extract", "simplify"],
        55,
    ),
    ("test", &["test", "tests", "coverage", "spec", "flaky"], 40),
    ("review", &["review", "audit", "inspect", "check"], 30),
    ("quick", &["quick", "small", "minor", "typo", "tweak"], 20),
    ("docs", &["docs", "document", "documentation", "readme", "changelog"], 35),
    (
        "migration",
        &["migrate", "migration", "upgrade", "port", "convert"],
        45,
    ),
];

#[derive(Debug, Clone)]
pub struct WorkflowChoice {
    pub name: String,
    pub score: f64,
    /// Likely-relevant paths detected from domain buckets, pre-loaded into
    /// the run context.
    pub preload_files: Vec<String>,
}

/// Score every built-in workflow against the objective and pick the best.
/// Score = 10·matches + 20 if a keyword starts the objective + priority/10.
pub fn select_workflow(objective: &str) -> WorkflowChoice {
    let lowered = objective.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let first_word = words.first().copied().unwrap_or("");

    let issue_ref =
        Regex::new(r"(?i)(#\d+|\bissue\s+\d+|\bGH-\d+)").expect("static regex");
    if issue_ref.is_match(objective) {
        return WorkflowChoice {
            name: "bugfix".to_string(),
            score: f64::MAX,
            preload_files: domain_files(&lowered),
        };
    }

    // objectives that match no keyword at all fall back to the default
    // workflow before the short-objective rule is applied
    let mut best: Option<(&str, f64)> = None;
    for (name, keywords, priority) in WORKFLOW_KEYWORDS {
        let matches = keywords
            .iter()
            .filter(|keyword| words.iter().any(|word| word == *keyword))
            .count() as f64;
        let starts = keywords.iter().any(|keyword| first_word == *keyword);
        if matches == 0.0 && !starts {
            continue;
        }
        let score = 10.0 * matches + if starts { 20.0 } else { 0.0 } + *priority as f64 / 10.0;
        if best.map(|(_, existing)| score > existing).unwrap_or(true) {
            best = Some((name, score));
        }
    }

    let (mut name, score) = best
        .map(|(name, score)| (name.to_string(), score))
        .unwrap_or_else(|| ("feature".to_string(), 0.0));
    if words.len() < 5 && name == "feature" {
        name = "quick".to_string();
    }

    WorkflowChoice {
        name,
        score,
        preload_files: domain_files(&lowered),
    }
}

/// Domain buckets map objective vocabulary to likely-relevant file areas.
fn domain_files(lowered: &str) -> Vec<String> {
    let mut files = Vec::new();
    let buckets: &[(&[&str], &[&str])] = &[
        (
            &["auth", "login", "session", "password", "token"],
            &["src/auth/", "src/middleware/auth.ts", "src/lib/session.ts"],
        ),
        (
            &["api", "endpoint", "route", "handler"],
            &["src/api/", "src/routes/", "src/controllers/"],
        ),
        (
            &["database", "migration", "schema", "query"],
            &["src/db/", "migrations/", "src/models/"],
        ),
        (
            &["ui", "component", "page", "styling", "layout"],
            &["src/components/", "src/pages/", "src/styles/"],
        ),
    ];
    for (keywords, paths) in buckets {
        if keywords.iter().any(|keyword| lowered.contains(keyword)) {
            files.extend(paths.iter().map(|p| p.to_string()));
        }
    }
    files
}
