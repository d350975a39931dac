//! Persistent index of in-flight temp outputs at `runtime/temp_index.json`.
//!
//! An entry is appended before the child spawns and removed once the file is
//! renamed to its final name, deleted, or proven absent. After a crash the
//! next startup lists surviving entries so the user can clean them up.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::encq_core::settings::io;
use crate::sync_ext::MutexExt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TempArtifact {
    pub path: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TempIndexFile {
    artifacts: Vec<TempArtifact>,
}

pub(crate) struct TempArtifactIndex {
    path: PathBuf,
    entries: Mutex<Vec<TempArtifact>>,
}

impl TempArtifactIndex {
    /// Loads the index. Missing or malformed files yield an empty index;
    /// this must never block startup.
    pub(crate) fn load(path: PathBuf) -> Self {
        let entries = match io::read_json_file::<TempIndexFile>(&path) {
            Ok(file) => file.artifacts,
            Err(err) => {
                if path.exists() {
                    crate::debug_eprintln!("temp index unreadable, starting empty: {err:#}");
                }
                Vec::new()
            }
        };
        TempArtifactIndex {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Registers a temp path, deduplicating, and replaces the file
    /// atomically.
    pub(crate) fn append(&self, path: &Path) {
        let key = path.to_string_lossy().into_owned();
        let mut entries = self.entries.lock_unpoisoned();
        if !entries.iter().any(|e| e.path == key) {
            entries.push(TempArtifact { path: key });
        }
        self.save(&entries);
    }

    pub(crate) fn remove(&self, path: &Path) {
        let key = path.to_string_lossy();
        let mut entries = self.entries.lock_unpoisoned();
        let before = entries.len();
        entries.retain(|e| e.path != key);
        if entries.len() != before {
            self.save(&entries);
        }
    }

    /// Entries whose file still exists on disk; stale entries are dropped
    /// from the persisted index as a side effect.
    pub(crate) fn list_existing(&self) -> Vec<String> {
        let mut entries = self.entries.lock_unpoisoned();
        let before = entries.len();
        entries.retain(|e| Path::new(&e.path).exists());
        if entries.len() != before {
            self.save(&entries);
        }
        entries.iter().map(|e| e.path.clone()).collect()
    }

    fn save(&self, entries: &[TempArtifact]) {
        let file = TempIndexFile {
            artifacts: entries.to_vec(),
        };
        if let Err(err) = io::write_json_file(&self.path, &file) {
            crate::debug_eprintln!("failed to persist temp index: {err:#}");
        }
    }
}
