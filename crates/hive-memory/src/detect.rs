use std::path::Path;

use tracing::debug;

use crate::ProjectFacts;

/// Inspect the project tree for well-known marker files and derive scalar
/// facts. Conservative by contract: an already-populated field is never
/// overwritten, so user corrections survive re-detection.
pub fn detect_project_facts(project_root: &Path, facts: &mut ProjectFacts) {
    let detected = scan_markers(project_root);
    fill(&mut facts.name, detected.name);
    fill(&mut facts.language, detected.language);
    fill(&mut facts.framework, detected.framework);
    fill(&mut facts.package_manager, detected.package_manager);
    fill(&mut facts.build_command, detected.build_command);
    fill(&mut facts.test_command, detected.test_command);
    fill(&mut facts.deploy_target, detected.deploy_target);
}

fn fill(slot: &mut Option<String>, detected: Option<String>) {
    if slot.is_none() {
        *slot = detected;
    }
}

fn scan_markers(root: &Path) -> ProjectFacts {
    let mut facts = ProjectFacts::default();

    if root.join("package.json").exists() {
        detect_node(root, &mut facts);
    } else if root.join("Cargo.toml").exists() {
        detect_cargo(root, &mut facts);
    } else if root.join("go.mod").exists() {
        facts.language = Some("go".to_string());
        facts.package_manager = Some("go".to_string());
        facts.build_command = Some("go build ./...".to_string());
        facts.test_command = Some("go test ./...".to_string());
    } else if root.join("pyproject.toml").exists() || root.join("requirements.txt").exists() {
        facts.language = Some("python".to_string());
        facts.package_manager = Some(
            if root.join("poetry.lock").exists() {
                "poetry"
            } else {
                "pip"
            }
            .to_string(),
        );
        facts.test_command = Some("pytest".to_string());
    }

    if root.join("Dockerfile").exists() {
        facts.deploy_target = Some("docker".to_string());
    }

    debug!(?facts, "marker-file detection finished");
    facts
}

fn detect_node(root: &Path, facts: &mut ProjectFacts) {
    facts.language = Some(
        if root.join("tsconfig.json").exists() {
            "typescript"
        } else {
            "javascript"
        }
        .to_string(),
    );
    facts.package_manager = Some(
        if root.join("pnpm-lock.yaml").exists() {
            "pnpm"
        } else if root.join("yarn.lock").exists() {
            "yarn"
        } else {
            "npm"
        }
        .to_string(),
    );

    let Ok(raw) = std::fs::read_to_string(root.join("package.json")) else {
        return;
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return;
    };

    facts.name = manifest
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    if let Some(scripts) = manifest.get("scripts").and_then(|v| v.as_object()) {
        let manager = facts.package_manager.as_deref().unwrap_or("npm");
        if scripts.contains_key("build") {
            facts.build_command = Some(format!("{manager} run build"));
        }
        if scripts.contains_key("test") {
            facts.test_command = Some(format!("{manager} test"));
        }
    }

    let deps = ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|key| manifest.get(*key))
        .filter_map(|v| v.as_object().cloned())
        .flat_map(|map| map.into_iter().map(|(name, _)| name))
        .collect::<Vec<_>>();
    for (marker, framework) in [
        ("next", "nextjs"),
        ("react", "react"),
        ("vue", "vue"),
        ("express", "express"),
        ("fastify", "fastify"),
    ] {
        if deps.iter().any(|dep| dep == marker) {
            facts.framework = Some(framework.to_string());
            break;
        }
    }
}

fn detect_cargo(root: &Path, facts: &mut ProjectFacts) {
    facts.language = Some("rust".to_string());
    facts.package_manager = Some("cargo".to_string());
    facts.build_command = Some("cargo build".to_string());
    facts.test_command = Some("cargo test".to_string());

    // cheap line scan for the package name, good enough for a fact seed
    if let Ok(raw) = std::fs::read_to_string(root.join("Cargo.toml")) {
        for line in raw.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("name") {
                if let Some(value) = rest.split('=').nth(1) {
                    facts.name = Some(value.trim().trim_matches('"').to_string());
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_project_detection_reads_scripts_and_lockfiles() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name":"demo-api","scripts":{"build":"tsc","test":"vitest"},"dependencies":{"express":"^4"}}"#,
        )
        .expect("package.json");
        std::fs::write(temp.path().join("tsconfig.json"), "{}").expect("tsconfig");
        std::fs::write(temp.path().join("pnpm-lock.yaml"), "").expect("lock");

        let mut facts = ProjectFacts::default();
        detect_project_facts(temp.path(), &mut facts);
        assert_eq!(facts.name.as_deref(), Some("demo-api"));
        assert_eq!(facts.language.as_deref(), Some("typescript"));
        assert_eq!(facts.package_manager.as_deref(), Some("pnpm"));
        assert_eq!(facts.framework.as_deref(), Some("express"));
        assert_eq!(facts.build_command.as_deref(), Some("pnpm run build"));
        assert_eq!(facts.test_command.as_deref(), Some("pnpm test"));
    }

    #[test]
    fn detector_never_overwrites_existing_facts() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n")
            .expect("cargo");

        let mut facts = ProjectFacts {
            language: Some("zig".to_string()),
            ..ProjectFacts::default()
        };
        detect_project_facts(temp.path(), &mut facts);
        assert_eq!(facts.language.as_deref(), Some("zig"));
        assert_eq!(facts.name.as_deref(), Some("demo"));
        assert_eq!(facts.test_command.as_deref(), Some("cargo test"));
    }

    #[test]
    fn dockerfile_marks_deploy_target() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("go.mod"), "module demo").expect("go.mod");
        std::fs::write(temp.path().join("Dockerfile"), "FROM scratch").expect("dockerfile");

        let mut facts = ProjectFacts::default();
        detect_project_facts(temp.path(), &mut facts);
        assert_eq!(facts.language.as_deref(), Some("go"));
        assert_eq!(facts.deploy_target.as_deref(), Some("docker"));
    }
}
