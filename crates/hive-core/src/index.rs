use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ignore::WalkBuilder;
use serde::Serialize;

pub const DEFAULT_INDEX_CAP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Default)]
pub struct IndexSnapshot {
    pub file_count: usize,
    pub truncated: bool,
    pub top_dirs: Vec<(String, usize)>,
    pub largest_files: Vec<IndexedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexedFile {
    pub path: String,
    pub bytes: u64,
}

/// Walk the project tree (honoring ignore files) and write a markdown
/// digest to `index.md`. The walk is capped in wall time; when the cap is
/// hit the digest is written anyway, marked as partial — the only
/// operation in the engine with an implicit timeout.
pub async fn refresh_index(
    project_root: PathBuf,
    index_path: PathBuf,
    cap: Duration,
) -> anyhow::Result<IndexSnapshot> {
    let root = project_root.clone();
    let snapshot = tokio::task::spawn_blocking(move || scan_tree(&root, cap))
        .await
        .map_err(|err| anyhow::anyhow!("index walk task join error: {err}"))?;
    let body = render_index(&project_root, &snapshot);
    if let Some(parent) = index_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&index_path, body)?;
    Ok(snapshot)
}

fn scan_tree(root: &Path, cap: Duration) -> IndexSnapshot {
    let started = Instant::now();
    let mut snapshot = IndexSnapshot::default();
    let mut dirs: BTreeMap<String, usize> = BTreeMap::new();
    let mut files: Vec<IndexedFile> = Vec::new();

    for entry in WalkBuilder::new(root).build().flatten() {
        if started.elapsed() > cap {
            snapshot.truncated = true;
            break;
        }
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        snapshot.file_count += 1;
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        let top = rel.split(['/', '\\']).next().unwrap_or("").to_string();
        *dirs.entry(top).or_insert(0) += 1;
        if let Ok(meta) = entry.metadata() {
            files.push(IndexedFile {
                path: rel,
                bytes: meta.len(),
            });
        }
    }

    files.sort_by(|a, b| b.bytes.cmp(&a.bytes));
    snapshot.largest_files = files.into_iter().take(20).collect();
    let mut top_dirs: Vec<(String, usize)> = dirs.into_iter().collect();
    top_dirs.sort_by(|a, b| b.1.cmp(&a.1));
    top_dirs.truncate(15);
    snapshot.top_dirs = top_dirs;
    snapshot
}

fn render_index(root: &Path, snapshot: &IndexSnapshot) -> String {
    let mut out = String::new();
    out.push_str("# Codebase index\n\n");
    out.push_str(&format!("Root: {}\n", root.display()));
    out.push_str(&format!("Files: {}\n", snapshot.file_count));
    if snapshot.truncated {
        out.push_str("\nNote: walk hit the time cap; this index is partial.\n");
    }
    if !snapshot.top_dirs.is_empty() {
        out.push_str("\n## Layout\n\n");
        for (dir, count) in &snapshot.top_dirs {
            out.push_str(&format!("- {dir} ({count} files)\n"));
        }
    }
    if !snapshot.largest_files.is_empty() {
        out.push_str("\n## Largest files\n\n");
        for file in &snapshot.largest_files {
            out.push_str(&format!("- {} ({} bytes)\n", file.path, file.bytes));
        }
    }
    out
}
