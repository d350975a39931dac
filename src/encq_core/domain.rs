use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const APP_CONFIG_VERSION: u32 = 1;
pub const PROFILE_VERSION: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderType {
    Nvencc,
    Qsvenc,
    Ffmpeg,
}

impl EncoderType {
    pub fn as_str(self) -> &'static str {
        match self {
            EncoderType::Nvencc => "nvencc",
            EncoderType::Qsvenc => "qsvenc",
            EncoderType::Ffmpeg => "ffmpeg",
        }
    }
}

impl Default for EncoderType {
    fn default() -> Self {
        EncoderType::Nvencc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    #[default]
    Hevc,
    Av1,
}

impl Codec {
    pub fn as_str(self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::Hevc => "hevc",
            Codec::Av1 => "av1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateControl {
    #[default]
    Qvbr,
    Cqp,
    Cbr,
    Vbr,
}

impl RateControl {
    pub fn flag(self) -> &'static str {
        match self {
            RateControl::Qvbr => "--qvbr",
            RateControl::Cqp => "--cqp",
            RateControl::Cbr => "--cbr",
            RateControl::Vbr => "--vbr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Multipass {
    #[default]
    None,
    Quarter,
    Full,
}

impl Multipass {
    pub fn as_str(self) -> &'static str {
        match self {
            Multipass::None => "none",
            Multipass::Quarter => "quarter",
            Multipass::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitEnc {
    Off,
    #[default]
    Auto,
    AutoForced,
    #[serde(rename = "forced_2")]
    Forced2,
    #[serde(rename = "forced_3")]
    Forced3,
    #[serde(rename = "forced_4")]
    Forced4,
}

impl SplitEnc {
    pub fn as_str(self) -> &'static str {
        match self {
            SplitEnc::Off => "off",
            SplitEnc::Auto => "auto",
            SplitEnc::AutoForced => "auto_forced",
            SplitEnc::Forced2 => "forced_2",
            SplitEnc::Forced3 => "forced_3",
            SplitEnc::Forced4 => "forced_4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParallelMode {
    #[default]
    Off,
    Auto,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
}

impl ParallelMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ParallelMode::Off => "off",
            ParallelMode::Auto => "auto",
            ParallelMode::Two => "2",
            ParallelMode::Three => "3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Decoder {
    #[default]
    Avhw,
    Avsw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    #[default]
    Copy,
    Aac,
    Opus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Skip,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteMode {
    #[default]
    Ask,
    AutoRename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFolderMode {
    #[default]
    SameAsInput,
    Specified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostAction {
    #[default]
    None,
    Shutdown,
    Sleep,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteDecision {
    Overwrite,
    Skip,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    Skipped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Stopping,
    Aborting,
    Completed,
    Aborted,
}

/// Free-form NVEncC options that override the standard fields by flag
/// repetition. The builder emits these after the standard phases so NVEncC's
/// later-wins rule lets them take effect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NvenccAdvanced {
    pub interlace: String,
    pub avsw_decoder: String,
    pub input_csp: String,
    pub output_csp: String,
    pub tune: String,
    pub max_bitrate: Option<u32>,
    pub vbr_quality: Option<f64>,
    pub lookahead_level: Option<u32>,
    pub weightp: bool,
    pub mv_precision: String,
    pub refs_forward: Option<u32>,
    pub refs_backward: Option<u32>,
    pub level: String,
    pub profile: String,
    pub tier: String,
    pub ssim: bool,
    pub psnr: bool,
    pub trim: String,
    pub seek: String,
    pub seekto: String,
    pub video_metadata: String,
    pub audio_copy: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub audio_quality: String,
    pub audio_samplerate: String,
    pub audio_metadata: String,
    pub sub_copy: String,
    pub sub_metadata: String,
    pub data_copy: String,
    pub attachment_copy: String,
    pub metadata: String,
    pub output_thread: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub id: String,
    /// Schema version. Missing in legacy JSON; serde leaves it at 0 so the
    /// migration pass can detect and upgrade the record.
    #[serde(default)]
    pub version: u32,
    pub name: String,
    pub is_preset: bool,
    pub encoder_type: EncoderType,

    pub codec: Codec,
    pub rate_control: RateControl,
    pub rate_value: f64,
    pub preset: String,
    pub output_depth: u32,
    pub multipass: Multipass,
    pub output_res: String,
    pub bframes: Option<u32>,
    pub r#ref: Option<u32>,
    pub lookahead: Option<u32>,
    pub gop_len: Option<u32>,
    pub aq: bool,
    pub aq_temporal: bool,
    pub split_enc: SplitEnc,
    pub parallel: ParallelMode,
    pub decoder: Decoder,
    /// GPU selector: "auto" or a device index "0".."15".
    pub device: String,
    pub audio_mode: AudioMode,
    pub audio_bitrate: u32,
    pub colormatrix: String,
    pub transfer: String,
    pub colorprim: String,
    pub colorrange: String,
    pub dhdr10_info: String,

    pub metadata_copy: bool,
    pub video_metadata_copy: bool,
    pub audio_metadata_copy: bool,
    pub chapter_copy: bool,
    pub sub_copy: bool,
    pub data_copy: bool,
    pub attachment_copy: bool,
    pub restore_file_time: bool,

    pub nvencc_advanced: NvenccAdvanced,
    pub custom_options: String,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            id: String::new(),
            version: PROFILE_VERSION,
            name: "HEVC Quality".to_string(),
            is_preset: false,
            encoder_type: EncoderType::Nvencc,
            codec: Codec::Hevc,
            rate_control: RateControl::Qvbr,
            rate_value: 28.0,
            preset: "P4".to_string(),
            output_depth: 10,
            multipass: Multipass::None,
            output_res: String::new(),
            bframes: None,
            r#ref: None,
            lookahead: None,
            gop_len: None,
            aq: true,
            aq_temporal: true,
            split_enc: SplitEnc::Auto,
            parallel: ParallelMode::Off,
            decoder: Decoder::Avhw,
            device: "auto".to_string(),
            audio_mode: AudioMode::Copy,
            audio_bitrate: 256,
            colormatrix: "auto".to_string(),
            transfer: "auto".to_string(),
            colorprim: "auto".to_string(),
            colorrange: "auto".to_string(),
            dhdr10_info: "off".to_string(),
            metadata_copy: true,
            video_metadata_copy: true,
            audio_metadata_copy: true,
            chapter_copy: true,
            sub_copy: true,
            data_copy: true,
            attachment_copy: true,
            restore_file_time: false,
            nvencc_advanced: NvenccAdvanced::default(),
            custom_options: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Schema version. Missing in legacy JSON; serde leaves it at 0 so the
    /// migration pass can detect and upgrade the record.
    #[serde(default)]
    pub version: u32,
    pub nvencc_path: String,
    pub qsvenc_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub max_concurrent_jobs: u32,
    pub on_error: OnError,
    pub decoder_fallback: bool,
    pub keep_failed_temp: bool,
    pub no_output_timeout_sec: u32,
    pub no_progress_timeout_sec: u32,
    pub post_complete_action: PostAction,
    pub post_complete_command: String,
    pub output_folder_mode: OutputFolderMode,
    pub output_folder_path: String,
    pub output_name_template: String,
    pub output_container: String,
    pub overwrite_mode: OverwriteMode,
    pub default_profile_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            version: APP_CONFIG_VERSION,
            nvencc_path: String::new(),
            qsvenc_path: String::new(),
            ffmpeg_path: String::new(),
            ffprobe_path: String::new(),
            max_concurrent_jobs: 1,
            on_error: OnError::Skip,
            decoder_fallback: false,
            keep_failed_temp: false,
            no_output_timeout_sec: 600,
            no_progress_timeout_sec: 300,
            post_complete_action: PostAction::None,
            post_complete_command: String::new(),
            output_folder_mode: OutputFolderMode::SameAsInput,
            output_folder_path: String::new(),
            output_name_template: "{name}_encoded.{ext}".to_string(),
            output_container: "mkv".to_string(),
            overwrite_mode: OverwriteMode::Ask,
            default_profile_id: String::new(),
        }
    }
}

/// Parsed progress fields extracted from one stderr line. Each field is
/// independent; a line missing one still contributes the others.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub percent: Option<f64>,
    pub fps: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    pub eta_sec: Option<i64>,
    pub raw_line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub job_id: String,
    pub input_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartEncodeRequest {
    pub jobs: Vec<JobInput>,
    pub profile: Profile,
    pub app_config_snapshot: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub job_id: String,
    pub input_path: String,
    pub input_size_bytes: u64,
    pub status: JobStatus,
    pub worker_id: Option<u32>,
    pub exit_code: Option<i32>,
    pub error_message: String,
    pub progress: Progress,
    pub temp_output_path: String,
    pub final_output_path: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl QueueJob {
    pub fn new(job_id: String, input_path: String) -> Self {
        QueueJob {
            job_id,
            input_path,
            input_size_bytes: 0,
            status: JobStatus::Pending,
            worker_id: None,
            exit_code: None,
            error_message: String::new(),
            progress: Progress::default(),
            temp_output_path: String::new(),
            final_output_path: String::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Session state as emitted on `session_started` / `session_state` /
/// `session_finished`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub encoder_type: EncoderType,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub total_jobs: u32,
    pub pending_jobs: u32,
    pub running_jobs: u32,
    pub completed_jobs: u32,
    pub failed_jobs: u32,
    pub cancelled_jobs: u32,
    pub timeout_jobs: u32,
    pub skipped_jobs: u32,
    pub stop_requested: bool,
    pub abort_requested: bool,
}

static OUTPUT_RES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+x\d+(,[^,=]+=[^,=]+)*$").expect("output_res regex"));
static DEVICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]|1[0-5])$").expect("device regex"));

/// Side-effect-free profile validation. Empty map means valid; callers wrap a
/// non-empty map into `EncqError::Validation`.
pub fn validate_profile(p: &Profile) -> BTreeMap<String, String> {
    let mut errs = BTreeMap::new();
    let name_len = p.name.trim().chars().count();
    if name_len < 1 || name_len > 80 {
        errs.insert("name".to_string(), "must be 1..80 chars".to_string());
    }
    if p.rate_value <= 0.0 {
        errs.insert("rate_value".to_string(), "must be > 0".to_string());
    }
    if p.output_depth != 8 && p.output_depth != 10 {
        errs.insert("output_depth".to_string(), "must be 8 or 10".to_string());
    }
    if !p.output_res.is_empty() && !OUTPUT_RES_RE.is_match(&p.output_res) {
        errs.insert(
            "output_res".to_string(),
            "must match WxH with optional ,k=v suffixes".to_string(),
        );
    }
    if let Some(bf) = p.bframes
        && bf > 7
    {
        errs.insert("bframes".to_string(), "must be 0..7".to_string());
    }
    if let Some(la) = p.lookahead
        && la > 32
    {
        errs.insert("lookahead".to_string(), "must be 0..32".to_string());
    }
    if p.audio_bitrate < 32 || p.audio_bitrate > 1024 {
        errs.insert("audio_bitrate".to_string(), "must be 32..1024".to_string());
    }
    if p.custom_options.chars().count() > 4096 {
        errs.insert(
            "custom_options".to_string(),
            "must be at most 4096 chars".to_string(),
        );
    }
    if p.device != "auto" && !DEVICE_RE.is_match(&p.device) {
        errs.insert("device".to_string(), "must be auto or 0..15".to_string());
    }
    validate_advanced(&p.nvencc_advanced, &mut errs);
    errs
}

fn validate_advanced(adv: &NvenccAdvanced, errs: &mut BTreeMap<String, String>) {
    let mut check_str = |field: &str, value: &str| {
        if value.chars().count() > 1024 {
            errs.insert(
                format!("nvencc_advanced.{field}"),
                "string too long".to_string(),
            );
        }
    };
    check_str("interlace", &adv.interlace);
    check_str("avsw_decoder", &adv.avsw_decoder);
    check_str("input_csp", &adv.input_csp);
    check_str("output_csp", &adv.output_csp);
    check_str("tune", &adv.tune);
    check_str("mv_precision", &adv.mv_precision);
    check_str("level", &adv.level);
    check_str("profile", &adv.profile);
    check_str("tier", &adv.tier);
    check_str("trim", &adv.trim);
    check_str("seek", &adv.seek);
    check_str("seekto", &adv.seekto);
    check_str("video_metadata", &adv.video_metadata);
    check_str("audio_copy", &adv.audio_copy);
    check_str("audio_codec", &adv.audio_codec);
    check_str("audio_bitrate", &adv.audio_bitrate);
    check_str("audio_quality", &adv.audio_quality);
    check_str("audio_samplerate", &adv.audio_samplerate);
    check_str("audio_metadata", &adv.audio_metadata);
    check_str("sub_copy", &adv.sub_copy);
    check_str("sub_metadata", &adv.sub_metadata);
    check_str("data_copy", &adv.data_copy);
    check_str("attachment_copy", &adv.attachment_copy);
    check_str("metadata", &adv.metadata);

    if let Some(mb) = adv.max_bitrate
        && mb == 0
    {
        errs.insert(
            "nvencc_advanced.max_bitrate".to_string(),
            "must be > 0".to_string(),
        );
    }
    if let Some(vq) = adv.vbr_quality
        && vq <= 0.0
    {
        errs.insert(
            "nvencc_advanced.vbr_quality".to_string(),
            "must be > 0".to_string(),
        );
    }
    if let Some(ot) = adv.output_thread
        && !(1..=64).contains(&ot)
    {
        errs.insert(
            "nvencc_advanced.output_thread".to_string(),
            "must be 1..64".to_string(),
        );
    }
}

/// Side-effect-free AppConfig validation, applied before every session.
pub fn validate_app_config(c: &AppConfig) -> BTreeMap<String, String> {
    let mut errs = BTreeMap::new();
    if c.max_concurrent_jobs < 1 || c.max_concurrent_jobs > 8 {
        errs.insert(
            "max_concurrent_jobs".to_string(),
            "must be 1..8".to_string(),
        );
    }
    if c.no_output_timeout_sec < 30 || c.no_output_timeout_sec > 86_400 {
        errs.insert(
            "no_output_timeout_sec".to_string(),
            "must be 30..86400".to_string(),
        );
    }
    if c.no_progress_timeout_sec < 30 || c.no_progress_timeout_sec > 86_400 {
        errs.insert(
            "no_progress_timeout_sec".to_string(),
            "must be 30..86400".to_string(),
        );
    }
    let template_len = c.output_name_template.trim().chars().count();
    if template_len < 1 || template_len > 255 {
        errs.insert(
            "output_name_template".to_string(),
            "must be 1..255 chars".to_string(),
        );
    }
    if c.output_folder_mode == OutputFolderMode::Specified
        && c.output_folder_path.trim().is_empty()
    {
        errs.insert(
            "output_folder_path".to_string(),
            "required when output_folder_mode is specified".to_string(),
        );
    }
    if c.post_complete_action == PostAction::Custom && c.post_complete_command.trim().is_empty() {
        errs.insert(
            "post_complete_command".to_string(),
            "required when post_complete_action is custom".to_string(),
        );
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        let p = Profile::default();
        assert!(validate_profile(&p).is_empty());
    }

    #[test]
    fn default_app_config_is_valid() {
        let c = AppConfig::default();
        assert!(validate_app_config(&c).is_empty());
    }

    #[test]
    fn profile_validation_flags_out_of_range_fields() {
        let mut p = Profile::default();
        p.rate_value = 0.0;
        p.output_depth = 12;
        p.bframes = Some(9);
        p.lookahead = Some(64);
        p.audio_bitrate = 8;
        p.device = "16".to_string();
        let errs = validate_profile(&p);
        for field in [
            "rate_value",
            "output_depth",
            "bframes",
            "lookahead",
            "audio_bitrate",
            "device",
        ] {
            assert!(errs.contains_key(field), "missing error for {field}");
        }
    }

    #[test]
    fn output_res_accepts_dimensions_with_kv_suffixes() {
        let mut p = Profile::default();
        p.output_res = "1920x1080,preserve_aspect_ratio=decrease".to_string();
        assert!(validate_profile(&p).is_empty());

        p.output_res = "1920x".to_string();
        assert!(validate_profile(&p).contains_key("output_res"));
    }

    #[test]
    fn app_config_requires_folder_path_in_specified_mode() {
        let mut c = AppConfig::default();
        c.output_folder_mode = OutputFolderMode::Specified;
        c.output_folder_path = "  ".to_string();
        assert!(validate_app_config(&c).contains_key("output_folder_path"));
    }

    #[test]
    fn overwrite_mode_rejects_unknown_wire_values() {
        // The resolver historically saw a stray "overwrite" value; only the
        // two enum values are accepted at the serde boundary.
        let err = serde_json::from_str::<OverwriteMode>("\"overwrite\"");
        assert!(err.is_err());
        let ok: OverwriteMode = serde_json::from_str("\"auto_rename\"").expect("known value");
        assert_eq!(ok, OverwriteMode::AutoRename);
    }

    #[test]
    fn profile_round_trips_through_snake_case_json() {
        let mut p = Profile::default();
        p.split_enc = SplitEnc::Forced3;
        p.parallel = ParallelMode::Two;
        let value = serde_json::to_value(&p).expect("serialize profile");
        assert_eq!(value["split_enc"], "forced_3");
        assert_eq!(value["parallel"], "2");
        assert_eq!(value["encoder_type"], "nvencc");
        let back: Profile = serde_json::from_value(value).expect("deserialize profile");
        assert_eq!(back.split_enc, SplitEnc::Forced3);
        assert_eq!(back.parallel, ParallelMode::Two);
    }

    #[test]
    fn legacy_profile_json_fills_missing_fields_with_defaults() {
        let legacy = serde_json::json!({
            "name": "Old profile",
            "rate_value": 23.0,
        });
        let p: Profile = serde_json::from_value(legacy).expect("legacy profile");
        assert_eq!(p.version, 0, "missing version must read as v0");
        assert_eq!(p.rate_value, 23.0);
        assert_eq!(p.preset, "P4");
        assert_eq!(p.audio_bitrate, 256);
    }
}
