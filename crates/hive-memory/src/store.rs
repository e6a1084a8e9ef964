use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::ProjectMemory;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("memory document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Disk-backed access to `memory.json`. Missing file loads as an empty
/// document; every save is atomic (temp file + rename).
#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ProjectMemory, MemoryError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "memory document absent, starting empty");
            return Ok(ProjectMemory::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, memory: &ProjectMemory) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(memory)?;
        let tmp = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, format!("{}\n", text))?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn update<F>(&self, mutate: F) -> Result<ProjectMemory, MemoryError>
    where
        F: FnOnce(&mut ProjectMemory),
    {
        let mut memory = self.load()?;
        mutate(&mut memory);
        self.save(&memory)?;
        Ok(memory)
    }
}
