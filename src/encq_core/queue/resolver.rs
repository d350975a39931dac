//! Output path resolution with cross-worker reservations.
//!
//! Two concurrent jobs must never land on the same final path, including
//! paths that are only claimed (reserved) and do not exist on disk yet. The
//! whole resolve body runs under one mutex; the critical section is short
//! and includes the disk stat.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::encq_core::domain::{AppConfig, OutputFolderMode, OverwriteMode};
use crate::encq_core::error::EncqError;
use crate::encq_core::ids::short_id;
use crate::sync_ext::MutexExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolveResult {
    pub final_output_path: PathBuf,
    pub temp_output_path: PathBuf,
    pub needs_overwrite: bool,
}

#[derive(Default)]
pub(crate) struct OutputResolver {
    reserved: Mutex<HashSet<PathBuf>>,
}

impl OutputResolver {
    pub(crate) fn new() -> Self {
        OutputResolver::default()
    }

    /// Resolves final and temp output paths for one input, reserving the
    /// final path. In `ask` mode an occupied target comes back with
    /// `needs_overwrite` and no reservation; the caller re-resolves with
    /// `resolve_accept_overwrite` once the user decides.
    pub(crate) fn resolve(
        &self,
        input_path: &Path,
        config: &AppConfig,
    ) -> Result<ResolveResult, EncqError> {
        self.resolve_inner(input_path, config, false)
    }

    /// Re-resolve after an explicit overwrite decision: the on-disk occupant
    /// no longer blocks the path.
    pub(crate) fn resolve_accept_overwrite(
        &self,
        input_path: &Path,
        config: &AppConfig,
    ) -> Result<ResolveResult, EncqError> {
        self.resolve_inner(input_path, config, true)
    }

    fn resolve_inner(
        &self,
        input_path: &Path,
        config: &AppConfig,
        accept_overwrite: bool,
    ) -> Result<ResolveResult, EncqError> {
        let mut reserved = self.reserved.lock_unpoisoned();

        let dir = match config.output_folder_mode {
            OutputFolderMode::SameAsInput => input_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf(),
            OutputFolderMode::Specified => {
                let trimmed = config.output_folder_path.trim();
                if trimmed.is_empty() {
                    // Caught by config validation upstream; double-checked so
                    // a stale snapshot cannot write next to nothing.
                    return Err(EncqError::validation_field(
                        "output_folder_path",
                        "required when output_folder_mode is specified",
                    ));
                }
                PathBuf::from(trimmed)
            }
        };
        std::fs::create_dir_all(&dir)
            .map_err(|err| EncqError::Io(format!("create output dir {}: {err}", dir.display())))?;

        let base = input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let ext = {
            let trimmed = config.output_container.trim().trim_start_matches('.');
            if trimmed.is_empty() { "mkv" } else { trimmed }
        };
        let rendered = apply_template(&config.output_name_template, base, ext);
        let mut final_path = dir.join(rendered);

        match config.overwrite_mode {
            OverwriteMode::AutoRename => {
                final_path = unique_final_path(final_path, &reserved);
            }
            OverwriteMode::Ask => {
                if !accept_overwrite
                    && (reserved.contains(&final_path) || final_path.exists())
                {
                    return Ok(ResolveResult {
                        final_output_path: final_path,
                        temp_output_path: PathBuf::new(),
                        needs_overwrite: true,
                    });
                }
            }
        }

        reserved.insert(final_path.clone());

        let final_stem = final_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let temp_path = dir.join(format!("{final_stem}.{}.tmp.{ext}", short_id(8)));

        Ok(ResolveResult {
            final_output_path: final_path,
            temp_output_path: temp_path,
            needs_overwrite: false,
        })
    }

    /// Drops a reservation; called exactly when the owning job reaches a
    /// terminal state.
    pub(crate) fn release(&self, final_path: &Path) {
        self.reserved.lock_unpoisoned().remove(final_path);
    }
}

fn apply_template(template: &str, name: &str, ext: &str) -> String {
    let template = if template.trim().is_empty() {
        "{name}_encoded.{ext}"
    } else {
        template
    };
    template.replace("{name}", name).replace("{ext}", ext)
}

/// Appends `_001`, `_002`, ... until the candidate is free on disk and in
/// the reservation set. Both must be consulted or two in-flight jobs for the
/// same input would agree on the same "free" name.
fn unique_final_path(path: PathBuf, reserved: &HashSet<PathBuf>) -> PathBuf {
    let occupied = |p: &Path| reserved.contains(p) || p.exists();
    if !occupied(&path) {
        return path;
    }
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    for i in 1u32.. {
        let candidate = dir.join(format!("{stem}_{i:03}{ext}"));
        if !occupied(&candidate) {
            return candidate;
        }
    }
    unreachable!("auto-rename counter exhausted");
}
