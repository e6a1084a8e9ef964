use std::path::{Path, PathBuf};

use anyhow::Context;

use hive_types::Scratchpad;

use crate::{read_json, write_json_atomic};

/// Disk-backed access to the run's scratchpad. Mutations follow
/// read-compute-write: callers pass a closure, the store re-reads the
/// document, applies the change, and atomically replaces the file.
#[derive(Debug, Clone)]
pub struct ScratchpadStore {
    path: PathBuf,
}

impl ScratchpadStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn create(&self, pad: &Scratchpad) -> anyhow::Result<()> {
        write_json_atomic(&self.path, pad)
    }

    pub fn load(&self) -> anyhow::Result<Scratchpad> {
        read_json(&self.path).context("failed to load scratchpad")
    }

    pub fn save(&self, pad: &Scratchpad) -> anyhow::Result<()> {
        write_json_atomic(&self.path, pad)
    }

    pub fn update<F>(&self, mutate: F) -> anyhow::Result<Scratchpad>
    where
        F: FnOnce(&mut Scratchpad),
    {
        let mut pad = self.load()?;
        mutate(&mut pad);
        self.save(&pad)?;
        Ok(pad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_read_compute_write() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ScratchpadStore::new(temp.path().join("scratchpad.json"));
        store
            .create(&Scratchpad::new("run_1", "trace-1", "objective"))
            .expect("create");

        let updated = store
            .update(|pad| pad.add_decision("architect", "use sqlite", None))
            .expect("update");
        assert_eq!(updated.decisions.len(), 1);

        let reloaded = store.load().expect("load");
        assert_eq!(reloaded.decisions.len(), 1);
    }

    #[test]
    fn write_read_write_is_byte_identical() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ScratchpadStore::new(temp.path().join("scratchpad.json"));
        let mut pad = Scratchpad::new("run_1", "trace-1", "objective");
        pad.add_tech("rust");
        pad.add_decision("architect", "keep it small", Some("scope".to_string()));
        store.create(&pad).expect("create");
        let first = std::fs::read(store.path()).expect("first");

        let reloaded = store.load().expect("load");
        store.save(&reloaded).expect("save");
        let second = std::fs::read(store.path()).expect("second");
        assert_eq!(first, second);
    }
}
