//! Command facade: the typed surface a host shell (GUI, RPC bindings, test
//! harness) drives. One `App` owns the managers and the event sink for the
//! process lifetime.

use std::sync::Arc;

use serde::Serialize;

use crate::encq_core::domain::{
    AppConfig, EncoderType, OverwriteDecision, Profile, SessionSnapshot, StartEncodeRequest,
};
use crate::encq_core::encoder::BuildRequest;
use crate::encq_core::error::EncqError;
use crate::encq_core::events::{EventHub, EventSink};
use crate::encq_core::paths::DataPaths;
use crate::encq_core::profiles::ProfileManager;
use crate::encq_core::queue::manager::QueueManager;
use crate::encq_core::settings::ConfigManager;
use crate::encq_core::tools::{
    GpuInfo, ToolsSnapshot, detect_external_tools, detect_nvencc, ensure_nvencc_ready, gpu_info,
};

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapResponse {
    pub config: AppConfig,
    pub profiles: Vec<Profile>,
    pub tools: ToolsSnapshot,
    pub temp_artifacts: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewCommandResponse {
    pub argv: Vec<String>,
    pub display_command: String,
}

pub struct App {
    paths: DataPaths,
    config: ConfigManager,
    profiles: ProfileManager,
    queue: QueueManager,
}

impl App {
    pub fn new(paths: DataPaths, sink: Arc<dyn EventSink>) -> Self {
        let events = EventHub::new(sink);
        App {
            config: ConfigManager::new(paths.config_path()),
            profiles: ProfileManager::new(paths.profiles_path()),
            queue: QueueManager::new(events, paths.clone()),
            paths,
        }
    }

    pub fn data_paths(&self) -> &DataPaths {
        &self.paths
    }

    /// Startup call: loads (or regenerates) config and profiles, probes the
    /// external tools, and lists temp outputs surviving a previous crash so
    /// the shell can offer cleanup.
    pub fn bootstrap(&self) -> Result<BootstrapResponse, EncqError> {
        let config = self.config.load()?;
        let profiles = self.profiles.load()?;
        let tools = detect_external_tools(
            &config.nvencc_path,
            &config.qsvenc_path,
            &config.ffmpeg_path,
            &config.ffprobe_path,
        );
        let temp_artifacts = self.queue.list_temp_artifacts();

        let mut warnings = Vec::new();
        if !tools.nvencc.error.is_empty() {
            warnings.push(format!("NVEncC: {}", tools.nvencc.error));
        }

        Ok(BootstrapResponse {
            config,
            profiles,
            tools,
            temp_artifacts,
            warnings,
        })
    }

    pub fn save_app_config(&self, config: AppConfig) -> Result<(), EncqError> {
        self.config.save(config)
    }

    pub fn list_profiles(&self) -> Vec<Profile> {
        self.profiles.list()
    }

    pub fn upsert_profile(&self, profile: Profile) -> Result<Profile, EncqError> {
        self.profiles.upsert(profile)
    }

    pub fn delete_profile(&self, profile_id: &str) -> Result<(), EncqError> {
        self.profiles.delete(profile_id)
    }

    pub fn duplicate_profile(&self, profile_id: &str, new_name: &str) -> Result<Profile, EncqError> {
        self.profiles.duplicate(profile_id, new_name)
    }

    pub fn set_default_profile(&self, profile_id: &str) -> Result<(), EncqError> {
        if self.profiles.get(profile_id).is_none() {
            return Err(EncqError::validation_field("id", "profile not found"));
        }
        let mut config = self.config.get();
        config.default_profile_id = profile_id.to_string();
        self.config.save(config)
    }

    pub fn detect_external_tools(&self) -> ToolsSnapshot {
        let config = self.config.get();
        detect_external_tools(
            &config.nvencc_path,
            &config.qsvenc_path,
            &config.ffmpeg_path,
            &config.ffprobe_path,
        )
    }

    pub fn get_gpu_info(&self) -> Result<GpuInfo, EncqError> {
        let config = self.config.get();
        let info = detect_nvencc(&config.nvencc_path);
        let path = ensure_nvencc_ready(&info)?;
        gpu_info(&path)
    }

    /// Builds argv + display command without running anything; used by
    /// profile editors for a live preview. The config snapshot is validated
    /// so the editor surfaces problems before an encode is attempted.
    pub fn preview_command(
        &self,
        profile: &Profile,
        config: &AppConfig,
        input_path: &str,
        output_path: &str,
    ) -> Result<PreviewCommandResponse, EncqError> {
        let config_errs = crate::encq_core::domain::validate_app_config(config);
        if !config_errs.is_empty() {
            return Err(EncqError::validation(config_errs));
        }
        let adapter = self.queue.registry().resolve(profile.encoder_type)?;
        let build = adapter.build_args(&BuildRequest {
            profile,
            input_path,
            output_path,
        })?;
        Ok(PreviewCommandResponse {
            argv: build.argv,
            display_command: build.display_command,
        })
    }

    /// Validates the request, gates on tool readiness, and launches the
    /// session worker pool.
    pub fn start_encode(&self, req: &StartEncodeRequest) -> Result<SessionSnapshot, EncqError> {
        let encoder_path = match req.profile.encoder_type {
            EncoderType::Nvencc => {
                let info = detect_nvencc(&req.app_config_snapshot.nvencc_path);
                ensure_nvencc_ready(&info)?
            }
            other => {
                return Err(EncqError::EncoderNotImplemented(format!(
                    "{} adapter is not implemented",
                    other.as_str()
                )));
            }
        };
        self.queue.start_encode(req, &encoder_path)
    }

    pub fn request_graceful_stop(&self, session_id: &str) -> Result<(), EncqError> {
        self.queue.request_graceful_stop(session_id)
    }

    pub fn request_abort(&self, session_id: &str) -> Result<(), EncqError> {
        self.queue.request_abort(session_id)
    }

    pub fn cancel_job(&self, session_id: &str, job_id: &str) -> Result<(), EncqError> {
        self.queue.cancel_job(session_id, job_id)
    }

    pub fn resolve_overwrite(
        &self,
        session_id: &str,
        job_id: &str,
        decision: OverwriteDecision,
    ) -> Result<(), EncqError> {
        self.queue.resolve_overwrite(session_id, job_id, decision)
    }

    pub fn current_session(&self) -> Option<SessionSnapshot> {
        self.queue.current_session()
    }

    pub fn list_temp_artifacts(&self) -> Vec<String> {
        self.queue.list_temp_artifacts()
    }

    pub fn cleanup_temp_artifacts(&self, paths: &[String]) {
        self.queue.cleanup_temp_artifacts(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encq_core::events::test_support::CollectingSink;

    fn app_in(dir: &tempfile::TempDir) -> App {
        App::new(
            DataPaths::new(dir.path()),
            Arc::new(CollectingSink::default()),
        )
    }

    #[test]
    fn bootstrap_seeds_defaults_and_presets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_in(&dir);
        let response = app.bootstrap().expect("bootstrap");
        assert_eq!(response.config.max_concurrent_jobs, 1);
        assert_eq!(response.profiles.len(), 4);
        assert!(response.temp_artifacts.is_empty());
        assert!(dir.path().join("config.json").exists());
        assert!(dir.path().join("profiles.json").exists());
    }

    #[test]
    fn preview_command_matches_builder_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_in(&dir);
        let profile = Profile::default();
        let preview = app
            .preview_command(&profile, &AppConfig::default(), "in.mp4", "out.mkv")
            .expect("preview");
        assert_eq!(preview.argv[0], "--avhw");
        assert_eq!(preview.argv.last().map(String::as_str), Some("out.mkv"));
        assert!(preview.display_command.starts_with("--avhw -i in.mp4"));
    }

    #[test]
    fn preview_command_validates_the_config_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_in(&dir);
        let mut config = AppConfig::default();
        config.no_output_timeout_sec = 1;
        let err = app
            .preview_command(&Profile::default(), &config, "in.mp4", "out.mkv")
            .expect_err("invalid snapshot must fail");
        assert_eq!(err.code(), "E_VALIDATION");
    }

    #[test]
    fn start_encode_rejects_unimplemented_encoders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_in(&dir);
        app.bootstrap().expect("bootstrap");
        let mut profile = Profile::default();
        profile.encoder_type = EncoderType::Qsvenc;
        let req = StartEncodeRequest {
            jobs: vec![crate::encq_core::domain::JobInput {
                job_id: String::new(),
                input_path: "/in/a.mp4".to_string(),
            }],
            profile,
            app_config_snapshot: AppConfig::default(),
        };
        let err = app.start_encode(&req).expect_err("qsvenc must fail");
        assert_eq!(err.code(), "E_ENCODER_NOT_IMPLEMENTED");
    }

    #[test]
    fn set_default_profile_requires_existing_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_in(&dir);
        app.bootstrap().expect("bootstrap");
        assert!(app.set_default_profile("missing").is_err());
        app.set_default_profile("preset-hevc-quality")
            .expect("set default");
        let config = app.bootstrap().expect("reload").config;
        assert_eq!(config.default_profile_id, "preset-hevc-quality");
    }
}
