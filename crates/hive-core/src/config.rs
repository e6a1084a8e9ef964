use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{global_config_path, read_json, write_json_atomic, HivePaths};

pub const DEFAULT_CLI: &str = "claude";

/// Effective per-agent configuration after layer merging.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HiveConfig {
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub features: HashMap<String, bool>,
    #[serde(default)]
    pub cli_overrides: HashMap<String, String>,
}

impl HiveConfig {
    pub fn model_for(&self, agent: &str) -> Option<&str> {
        self.models
            .get(agent)
            .or_else(|| self.models.get("default"))
            .map(String::as_str)
    }

    pub fn cli_for(&self, agent: &str) -> &str {
        self.cli_overrides
            .get(agent)
            .map(String::as_str)
            .unwrap_or(DEFAULT_CLI)
    }

    /// Feature flags with their documented aliases.
    pub fn feature(&self, name: &str) -> Option<bool> {
        if let Some(value) = self.features.get(name) {
            return Some(*value);
        }
        let alias = match name {
            "parallel_worktrees" => "worktree_parallel",
            "worktree_parallel" => "parallel_worktrees",
            "cost_tracking" => "cost_aware",
            "cost_aware" => "cost_tracking",
            _ => return None,
        };
        self.features.get(alias).copied()
    }
}

/// On-disk shape of a config file. The modern shape nests models under
/// `models`; the legacy shape keeps per-agent `{model, cli}` objects under
/// `agents`. Writers reproduce whichever shape the file already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigShape {
    Simple,
    Legacy,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    project_path: PathBuf,
    global_path: Option<PathBuf>,
    project_shape: ConfigShape,
    merged: Value,
}

impl ConfigStore {
    pub fn load(paths: &HivePaths) -> Self {
        Self::load_with_global(paths, global_config_path())
    }

    pub fn load_with_global(paths: &HivePaths, global_path: Option<PathBuf>) -> Self {
        let global = global_path
            .as_deref()
            .and_then(|path| read_layer(path))
            .unwrap_or_else(empty_object);
        let (project, project_shape) = match read_layer(&paths.config_path) {
            Some(raw) => {
                let shape = detect_shape(&raw);
                (normalize_layer(raw, shape), shape)
            }
            None => (empty_object(), ConfigShape::Simple),
        };

        let mut merged = defaults_layer();
        deep_merge(&mut merged, &normalize_layer(global, ConfigShape::Simple));
        deep_merge(&mut merged, &project);

        Self {
            project_path: paths.config_path.clone(),
            global_path,
            project_shape,
            merged,
        }
    }

    pub fn effective(&self) -> HiveConfig {
        serde_json::from_value(self.merged.clone()).unwrap_or_default()
    }

    pub fn effective_value(&self) -> &Value {
        &self.merged
    }

    /// Persist a patch to the project layer, preserving the existing shape.
    pub fn patch_project(&mut self, patch: Value) -> anyhow::Result<HiveConfig> {
        deep_merge(&mut self.merged, &patch);
        let config = self.effective();
        let body = match self.project_shape {
            ConfigShape::Simple => serde_json::to_value(&config)?,
            ConfigShape::Legacy => to_legacy_value(&config),
        };
        write_json_atomic(&self.project_path, &body)?;
        Ok(config)
    }

    pub fn global_path(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }
}

fn read_layer(path: &Path) -> Option<Value> {
    read_json::<Value>(path).ok().filter(Value::is_object)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn defaults_layer() -> Value {
    serde_json::json!({
        "models": {},
        "features": {
            "testing_required": true,
            "parallel_worktrees": false,
            "auto_mode": false,
            "cost_tracking": true
        },
        "cli_overrides": {}
    })
}

fn detect_shape(raw: &Value) -> ConfigShape {
    if raw.get("agents").map(Value::is_object).unwrap_or(false) {
        ConfigShape::Legacy
    } else {
        ConfigShape::Simple
    }
}

/// Bring a legacy-shaped layer into the simple shape before merging.
fn normalize_layer(raw: Value, shape: ConfigShape) -> Value {
    match shape {
        ConfigShape::Simple => raw,
        ConfigShape::Legacy => {
            let mut models = Map::new();
            let mut clis = Map::new();
            if let Some(agents) = raw.get("agents").and_then(Value::as_object) {
                for (agent, entry) in agents {
                    if let Some(model) = entry.get("model").and_then(Value::as_str) {
                        models.insert(agent.clone(), Value::String(model.to_string()));
                    }
                    if let Some(cli) = entry.get("cli").and_then(Value::as_str) {
                        clis.insert(agent.clone(), Value::String(cli.to_string()));
                    }
                }
            }
            let features = raw
                .get("features")
                .cloned()
                .unwrap_or_else(empty_object);
            serde_json::json!({
                "models": models,
                "features": features,
                "cli_overrides": clis
            })
        }
    }
}

fn to_legacy_value(config: &HiveConfig) -> Value {
    let mut agents = Map::new();
    let names: std::collections::BTreeSet<&String> = config
        .models
        .keys()
        .chain(config.cli_overrides.keys())
        .collect();
    for name in names {
        let mut entry = Map::new();
        if let Some(model) = config.models.get(name.as_str()) {
            entry.insert("model".to_string(), Value::String(model.clone()));
        }
        if let Some(cli) = config.cli_overrides.get(name.as_str()) {
            entry.insert("cli".to_string(), Value::String(cli.clone()));
        }
        agents.insert(name.clone(), Value::Object(entry));
    }
    serde_json::json!({
        "agents": agents,
        "features": config.features
    })
}

pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths_in(dir: &Path) -> HivePaths {
        HivePaths::resolve(dir, None)
    }

    #[test]
    fn defaults_apply_without_any_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load_with_global(&paths_in(temp.path()), None);
        let config = store.effective();
        assert_eq!(config.cli_for("implementer"), DEFAULT_CLI);
        assert_eq!(config.feature("testing_required"), Some(true));
        assert_eq!(config.feature("auto_mode"), Some(false));
    }

    #[test]
    fn project_layer_overrides_global() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(temp.path());
        let global_path = temp.path().join("global-config.json");
        std::fs::write(
            &global_path,
            r#"{"models":{"default":"opus","reviewer":"sonnet"}}"#,
        )
        .expect("global");
        std::fs::create_dir_all(&paths.root).expect("root");
        std::fs::write(&paths.config_path, r#"{"models":{"default":"sonnet"}}"#).expect("project");

        let store = ConfigStore::load_with_global(&paths, Some(global_path));
        let config = store.effective();
        assert_eq!(config.model_for("implementer"), Some("sonnet"));
        assert_eq!(config.model_for("reviewer"), Some("sonnet"));
    }

    #[test]
    fn legacy_shape_parses_and_writes_back_as_legacy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(temp.path());
        std::fs::create_dir_all(&paths.root).expect("root");
        std::fs::write(
            &paths.config_path,
            r#"{"agents":{"tester":{"model":"haiku","cli":"claude"}},"features":{"auto_mode":true}}"#,
        )
        .expect("project");

        let mut store = ConfigStore::load_with_global(&paths, None);
        let config = store.effective();
        assert_eq!(config.model_for("tester"), Some("haiku"));
        assert_eq!(config.feature("auto_mode"), Some(true));

        store
            .patch_project(serde_json::json!({"models": {"tester": "sonnet"}}))
            .expect("patch");
        let written: Value = read_json(&paths.config_path).expect("reread");
        assert_eq!(written["agents"]["tester"]["model"], "sonnet");
    }

    #[test]
    fn feature_aliases_resolve() {
        let config = HiveConfig {
            features: HashMap::from([("worktree_parallel".to_string(), true)]),
            ..HiveConfig::default()
        };
        assert_eq!(config.feature("parallel_worktrees"), Some(true));
    }
}
