//! External tool detection: candidate lookup, version probing, and the
//! NVEncC major-version gate.

use std::process::Command;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::encq_core::error::EncqError;
use crate::process_ext::run_command_with_timeout;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const CAPABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_CAPTURE_LIMIT: usize = 256 * 1024;

/// Minimum supported NVEncC major version.
const NVENCC_MIN_MAJOR: u32 = 8;

static NVENCC_CANDIDATES: &[&str] = &["NVEncC64", "NVEncC"];
static QSVENC_CANDIDATES: &[&str] = &["QSVEncC64", "QSVEncC"];
static FFMPEG_CANDIDATES: &[&str] = &["ffmpeg"];
static FFPROBE_CANDIDATES: &[&str] = &["ffprobe"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub path: String,
    pub found: bool,
    pub version: String,
    pub supported: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsSnapshot {
    pub nvencc: ToolInfo,
    pub qsvenc: ToolInfo,
    pub ffmpeg: ToolInfo,
    pub ffprobe: ToolInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuInfo {
    pub check_device: String,
    pub check_features: String,
}

/// Probes all known tools. The configured path, when present, is tried
/// before the well-known executable names.
pub(crate) fn detect_external_tools(
    nvencc_path: &str,
    qsvenc_path: &str,
    ffmpeg_path: &str,
    ffprobe_path: &str,
) -> ToolsSnapshot {
    ToolsSnapshot {
        nvencc: detect_nvencc(nvencc_path),
        qsvenc: detect_presence("QSVEncC", qsvenc_path, QSVENC_CANDIDATES),
        ffmpeg: detect_presence("ffmpeg", ffmpeg_path, FFMPEG_CANDIDATES),
        ffprobe: detect_presence("ffprobe", ffprobe_path, FFPROBE_CANDIDATES),
    }
}

/// NVEncC detection with the version gate: majors below 8 are reported
/// found-but-unsupported.
pub(crate) fn detect_nvencc(configured_path: &str) -> ToolInfo {
    let mut info = ToolInfo {
        name: "NVEncC".to_string(),
        ..ToolInfo::default()
    };

    let Some((path, output)) = first_responding(configured_path, NVENCC_CANDIDATES) else {
        info.error = "E_TOOL_NOT_FOUND".to_string();
        return info;
    };
    info.path = path;
    info.found = true;

    let Some(version) = parse_version_string(&output) else {
        info.error = "version detection failed".to_string();
        return info;
    };
    info.version = version;

    match parse_major_version(&info.version) {
        Some(major) if major >= NVENCC_MIN_MAJOR => info.supported = true,
        Some(_) => info.error = "E_TOOL_VERSION_UNSUPPORTED".to_string(),
        None => info.error = "version parse failed".to_string(),
    }
    info
}

fn detect_presence(name: &str, configured_path: &str, candidates: &[&str]) -> ToolInfo {
    let mut info = ToolInfo {
        name: name.to_string(),
        ..ToolInfo::default()
    };
    match first_responding(configured_path, candidates) {
        Some((path, output)) => {
            info.path = path;
            info.found = true;
            info.supported = true;
            info.version = parse_version_string(&output).unwrap_or_default();
        }
        None => info.error = "E_TOOL_NOT_FOUND".to_string(),
    }
    info
}

/// Tries `--version` on the configured path first, then each candidate
/// name, returning the first that produced any output.
fn first_responding(configured_path: &str, candidates: &[&str]) -> Option<(String, String)> {
    let configured = configured_path.trim();
    let mut paths: Vec<&str> = Vec::with_capacity(candidates.len() + 1);
    if !configured.is_empty() {
        paths.push(configured);
    }
    paths.extend(candidates);

    for path in paths {
        let mut cmd = Command::new(path);
        cmd.arg("--version");
        let Ok(output) = run_command_with_timeout(cmd, VERSION_PROBE_TIMEOUT, PROBE_CAPTURE_LIMIT)
        else {
            continue;
        };
        // Some encoder builds print the banner and exit non-zero; any
        // output counts as a response.
        let combined = combine_output(&output.stdout, &output.stderr);
        if !combined.trim().is_empty() || output.status.success() {
            return Some((path.to_string(), combined));
        }
    }
    None
}

/// Turns a found-and-supported NVEncC probe into its path; otherwise the
/// matching taxonomy error.
pub(crate) fn ensure_nvencc_ready(info: &ToolInfo) -> Result<String, EncqError> {
    if !info.found {
        return Err(EncqError::ToolNotFound("NVEncC not found".to_string()));
    }
    if !info.supported {
        return Err(EncqError::ToolVersionUnsupported(format!(
            "NVEncC {} is not supported (requires major >= {NVENCC_MIN_MAJOR})",
            if info.version.is_empty() {
                "unknown"
            } else {
                &info.version
            }
        )));
    }
    Ok(info.path.clone())
}

/// Runs `--check-device` and `--check-features` and returns the raw text.
pub(crate) fn gpu_info(nvencc_path: &str) -> Result<GpuInfo, EncqError> {
    if nvencc_path.trim().is_empty() {
        return Err(EncqError::ToolNotFound("NVEncC path not set".to_string()));
    }
    let check_device = run_capability_probe(nvencc_path, "--check-device")?;
    let check_features = run_capability_probe(nvencc_path, "--check-features")?;
    Ok(GpuInfo {
        check_device,
        check_features,
    })
}

fn run_capability_probe(path: &str, flag: &str) -> Result<String, EncqError> {
    let mut cmd = Command::new(path);
    cmd.arg(flag);
    let output = run_command_with_timeout(cmd, CAPABILITY_PROBE_TIMEOUT, PROBE_CAPTURE_LIMIT)
        .map_err(|err| EncqError::Io(format!("{flag}: {err}")))?;
    if output.timed_out {
        return Err(EncqError::Io(format!("{flag}: probe timed out")));
    }
    Ok(combine_output(&output.stdout, &output.stderr))
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    let err = String::from_utf8_lossy(stderr);
    if !err.trim().is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&err);
    }
    combined
}

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.\d+[\.\d]*)").expect("version regex"));

/// Pulls a dotted version out of a `--version` banner, preferring lines
/// that mention the tool.
pub(crate) fn parse_version_string(output: &str) -> Option<String> {
    for line in output.lines() {
        let lower = line.to_ascii_lowercase();
        if (lower.contains("nvencc") || lower.contains("version"))
            && let Some(m) = VERSION_RE.find(line)
        {
            return Some(m.as_str().to_string());
        }
    }
    VERSION_RE.find(output).map(|m| m.as_str().to_string())
}

pub(crate) fn parse_major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}
