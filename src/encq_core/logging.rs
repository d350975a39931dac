//! Durable per-job outputs: the JSON job record and the raw stderr capture.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::encq_core::settings::io;

pub(crate) const JOB_RECORD_SCHEMA_VERSION: u32 = 1;

/// Execution record written to `logs/<job_id>.json` when a job terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JobRecord {
    pub schema_version: u32,
    pub job_id: String,
    pub session_id: String,
    pub input_path: String,
    pub output_path: String,
    pub temp_output_path: String,
    pub command_line: Vec<String>,
    pub display_command: String,
    pub encoder_type: String,
    pub encoder_path: String,
    pub exit_code: Option<i32>,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub worker_id: u32,
    pub profile_id: String,
    pub profile_name: String,
    pub profile_version: u32,
    pub device: String,
    pub max_concurrent_jobs: u32,
    pub used_job_object: bool,
    pub started_at: String,
    pub finished_at: String,
    pub duration_sec: f64,
    pub retry_applied: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub retry_detail: String,
}

impl JobRecord {
    /// Atomic write to the logs directory; failures are the caller's to
    /// downgrade to a warning.
    pub(crate) fn save(&self, record_path: &Path) -> Result<()> {
        io::write_json_file(record_path, self)
            .with_context(|| format!("write job record {}", record_path.display()))
    }
}

/// Line-oriented writer for `logs/<job_id>.stderr.log`. Creation failure is
/// tolerated: the writer goes inert and the caller surfaces one warning.
pub(crate) struct StderrLogWriter {
    file: Option<fs::File>,
}

impl StderrLogWriter {
    pub(crate) fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create logs dir {}", parent.display()))?;
        }
        let file = fs::File::create(path)
            .with_context(|| format!("create stderr log {}", path.display()))?;
        Ok(StderrLogWriter { file: Some(file) })
    }

    pub(crate) fn inert() -> Self {
        StderrLogWriter { file: None }
    }

    pub(crate) fn write_line(&mut self, line: &str) {
        if let Some(file) = self.file.as_mut() {
            let _ = writeln!(file, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> JobRecord {
        JobRecord {
            schema_version: JOB_RECORD_SCHEMA_VERSION,
            job_id: "j1".to_string(),
            session_id: "s1".to_string(),
            input_path: "/in/a.mp4".to_string(),
            output_path: "/out/a_encoded.mkv".to_string(),
            temp_output_path: "/out/a_encoded.abc12345.tmp.mkv".to_string(),
            command_line: vec!["NVEncC64".to_string(), "--avhw".to_string()],
            display_command: "NVEncC64 --avhw".to_string(),
            encoder_type: "nvencc".to_string(),
            encoder_path: "NVEncC64".to_string(),
            exit_code: Some(0),
            status: "completed".to_string(),
            error_message: String::new(),
            worker_id: 0,
            profile_id: "p_abc".to_string(),
            profile_name: "HEVC Quality".to_string(),
            profile_version: 4,
            device: "auto".to_string(),
            max_concurrent_jobs: 2,
            used_job_object: false,
            started_at: "2026-01-01T00:00:00.000Z".to_string(),
            finished_at: "2026-01-01T00:05:00.000Z".to_string(),
            duration_sec: 300.0,
            retry_applied: false,
            retry_detail: String::new(),
        }
    }

    #[test]
    fn job_record_round_trips_and_omits_empty_optional_strings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("j1.json");
        sample_record().save(&path).expect("save record");

        let raw = std::fs::read_to_string(&path).expect("read record");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("parse record");
        assert_eq!(value["job_id"], "j1");
        assert_eq!(value["schema_version"], 1);
        assert!(value.get("error_message").is_none());
        assert!(value.get("retry_detail").is_none());

        let back: JobRecord = serde_json::from_str(&raw).expect("deserialize record");
        assert_eq!(back.status, "completed");
        assert_eq!(back.command_line.len(), 2);
    }

    #[test]
    fn stderr_writer_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("j1.stderr.log");
        let mut writer = StderrLogWriter::create(&path).expect("create writer");
        writer.write_line("first");
        writer.write_line("second");
        drop(writer);
        let content = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn inert_writer_swallows_lines() {
        let mut writer = StderrLogWriter::inert();
        writer.write_line("dropped");
    }
}
