use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use sha2::{Digest, Sha256};

use hive_types::{Checkpoint, HiveError, ResumeAction};

use crate::write_json_atomic;

const LATEST_MARKER: &str = "LATEST";

/// Content-addressed checkpoint store. The file name is derived from the
/// serialized record, so re-saving identical state is idempotent; a marker
/// file points at the most recent checkpoint for resume.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> anyhow::Result<String> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_string(checkpoint)?;
        let digest = Sha256::digest(body.as_bytes());
        let id: String = digest.iter().take(8).map(|byte| format!("{byte:02x}")).collect();
        write_json_atomic(&self.dir.join(format!("{id}.json")), checkpoint)?;
        fs::write(self.dir.join(LATEST_MARKER), &id)?;
        Ok(id)
    }

    /// Load a checkpoint by id, or the latest one when `name` is `None`.
    pub fn load(&self, name: Option<&str>) -> Result<Checkpoint, HiveError> {
        let id = match name {
            Some(id) => id.to_string(),
            None => fs::read_to_string(self.dir.join(LATEST_MARKER))
                .map_err(|_| HiveError::CheckpointCorrupt("latest".to_string()))?
                .trim()
                .to_string(),
        };
        let path = self.dir.join(format!("{id}.json"));
        let raw = fs::read_to_string(&path)
            .map_err(|_| HiveError::CheckpointCorrupt(id.clone()))?;
        serde_json::from_str(&raw).map_err(|_| HiveError::CheckpointCorrupt(id))
    }

    pub fn latest_id(&self) -> Option<String> {
        fs::read_to_string(self.dir.join(LATEST_MARKER))
            .ok()
            .map(|id| id.trim().to_string())
    }
}

/// Restore a run from a named (or the latest) checkpoint: the checkpoint
/// record plus the scratchpad it references. Unreadable state surfaces as
/// `CheckpointCorrupt`; the checkpoint's `next_action` tells the caller
/// whether to continue the phase, retry the agent, or escalate.
pub fn resume_run(
    store: &CheckpointStore,
    scratchpad: &crate::ScratchpadStore,
    name: Option<&str>,
) -> Result<(Checkpoint, hive_types::Scratchpad), HiveError> {
    let checkpoint = store.load(name)?;
    let pad = scratchpad
        .load()
        .map_err(|_| HiveError::CheckpointCorrupt(checkpoint.scratchpad_ref.clone()))?;
    Ok((checkpoint, pad))
}

/// Build the after-phase checkpoint record.
pub fn checkpoint_for(
    run_id: &str,
    epic_id: Option<&str>,
    objective: &str,
    current_phase: Option<&str>,
    current_agent: Option<&str>,
    scratchpad_ref: &str,
    next_action: ResumeAction,
) -> Checkpoint {
    Checkpoint {
        run_id: run_id.to_string(),
        epic_id: epic_id.map(str::to_string),
        objective: objective.to_string(),
        current_phase: current_phase.map(str::to_string),
        current_agent: current_agent.map(str::to_string),
        scratchpad_ref: scratchpad_ref.to_string(),
        next_action,
        ts: Utc::now(),
    }
}
