use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Resolved locations of everything the engine persists under the project
/// directory. The layout is stable: external collaborators read these files
/// by name.
#[derive(Debug, Clone)]
pub struct HivePaths {
    pub project_root: PathBuf,
    pub root: PathBuf,
    pub scratchpad_path: PathBuf,
    pub memory_path: PathBuf,
    pub events_path: PathBuf,
    pub index_path: PathBuf,
    pub runs_dir: PathBuf,
    pub handoffs_dir: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub agents_dir: PathBuf,
    pub workflows_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
}

impl HivePaths {
    /// `hive_dir` is the `HIVE_DIR` override; default `.hive`.
    pub fn resolve(project_root: impl Into<PathBuf>, hive_dir: Option<&str>) -> Self {
        let project_root = project_root.into();
        let root = project_root.join(hive_dir.unwrap_or(".hive"));
        Self {
            scratchpad_path: root.join("scratchpad.json"),
            memory_path: root.join("memory.json"),
            events_path: root.join("events.jsonl"),
            index_path: root.join("index.md"),
            runs_dir: root.join("runs"),
            handoffs_dir: root.join("handoffs"),
            checkpoints_dir: root.join("checkpoints"),
            agents_dir: root.join("agents"),
            workflows_dir: root.join("workflows"),
            worktrees_dir: root.join("worktrees"),
            logs_dir: root.join("logs"),
            config_path: root.join("config.json"),
            project_root,
            root,
        }
    }

    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in [
            &self.root,
            &self.runs_dir,
            &self.handoffs_dir,
            &self.checkpoints_dir,
            &self.agents_dir,
            &self.workflows_dir,
            &self.logs_dir,
        ] {
            fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    pub fn run_output_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("output")
    }

    pub fn run_snapshots_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("snapshots")
    }

    pub fn trace_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(".trace")
    }

    pub fn compose_state_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(".compose").join("state.json")
    }

    pub fn parallel_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(".parallel")
    }

    pub fn cost_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("cost.json")
    }

    pub fn findings_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("findings.json")
    }

    pub fn git_state_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("git_state.json")
    }

    pub fn worktree_dir(&self, run_id: &str, task_id: &str) -> PathBuf {
        self.worktrees_dir.join(run_id).join(task_id)
    }

    pub fn agent_prompt_path(&self, agent: &str) -> PathBuf {
        self.agents_dir.join(format!("{agent}.md"))
    }

    pub fn workflow_path(&self, name: &str) -> PathBuf {
        self.workflows_dir.join(format!("{name}.json"))
    }
}

/// Global (cross-project) root under the platform data dir.
pub fn global_root() -> Option<PathBuf> {
    dirs::data_dir().map(|base| base.join("hive"))
}

pub fn global_config_path() -> Option<PathBuf> {
    global_root().map(|root| root.join("config.json"))
}

pub fn global_agents_dir() -> Option<PathBuf> {
    global_root().map(|root| root.join("agents"))
}

/// Atomic JSON persistence: serialize to a sibling temp file, then rename
/// over the target. All mutable documents (scratchpad, memory, checkpoints,
/// handoffs) go through this.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, format!("{}\n", text))
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_stable_names() {
        let paths = HivePaths::resolve("/work/demo", None);
        assert!(paths.scratchpad_path.ends_with(".hive/scratchpad.json"));
        assert!(paths.events_path.ends_with(".hive/events.jsonl"));
        assert!(paths
            .trace_dir("run_1")
            .ends_with(".hive/runs/run_1/.trace"));
        assert!(paths
            .worktree_dir("run_1", "t-2")
            .ends_with(".hive/worktrees/run_1/t-2"));
    }

    #[test]
    fn hive_dir_override_is_honored() {
        let paths = HivePaths::resolve("/work/demo", Some(".hive-test"));
        assert!(paths.root.ends_with(".hive-test"));
    }

    #[test]
    fn atomic_write_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("doc.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).expect("write");
        let value: serde_json::Value = read_json(&path).expect("read");
        assert_eq!(value["a"], 1);
        // no temp leftovers
        let leftovers = fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .count();
        assert_eq!(leftovers, 1);
    }
}
