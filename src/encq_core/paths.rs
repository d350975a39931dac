use std::path::{Path, PathBuf};

/// Layout of the per-user data directory:
///
/// ```text
/// <base>/config.json
/// <base>/profiles.json
/// <base>/logs/<job_id>.json
/// <base>/logs/<job_id>.stderr.log
/// <base>/runtime/temp_index.json
/// ```
#[derive(Debug, Clone)]
pub struct DataPaths {
    base: PathBuf,
}

impl DataPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        DataPaths { base: base.into() }
    }

    /// Resolves the per-user data directory, falling back to a dot directory
    /// under the current working directory when the platform dir is unknown.
    pub fn default_user() -> Self {
        let base = dirs::config_dir()
            .map(|dir| dir.join("encq"))
            .unwrap_or_else(|| PathBuf::from(".encq"));
        DataPaths { base }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn config_path(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.base.join("profiles.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn job_record_path(&self, job_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{job_id}.json"))
    }

    pub fn job_stderr_log_path(&self, job_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{job_id}.stderr.log"))
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.base.join("runtime")
    }

    pub fn temp_index_path(&self) -> PathBuf {
        self.runtime_dir().join("temp_index.json")
    }
}
