use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Reads and deserializes a JSON file into the specified type.
pub(crate) fn read_json_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .with_context(|| format!("failed to parse JSON from {}", path.display()))
}

/// Writes a value to a JSON file atomically: serialize to `<file>.tmp`,
/// fsync, then rename over the target. The parent directory is created on
/// demand.
pub(crate) fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create temp file {}", tmp_path.display()))?;
    serde_json::to_writer_pretty(&file, value)
        .with_context(|| format!("failed to write JSON to {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", tmp_path.display()))?;
    drop(file);
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to atomically rename {} -> {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Moves a malformed JSON file aside to `<file>.broken.<unix_ts>` so the
/// caller can regenerate defaults without destroying the evidence. Returns
/// the backup path when the rename succeeded.
pub(crate) fn quarantine_broken_file(path: &Path) -> Option<PathBuf> {
    let ts = chrono::Utc::now().timestamp();
    let backup = PathBuf::from(format!("{}.broken.{ts}", path.display()));
    match fs::rename(path, &backup) {
        Ok(()) => Some(backup),
        Err(err) => {
            crate::debug_eprintln!(
                "failed to quarantine broken file {}: {err}",
                path.display()
            );
            None
        }
    }
}
