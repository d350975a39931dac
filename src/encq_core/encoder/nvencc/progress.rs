//! Field extraction from NVEncC progress lines, e.g.
//! `[53.2%] 1234 frames: 245.67 fps, 12345 kb/s, remain 0:01:23, GPU 45%`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::encq_core::domain::Progress;

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)%").expect("percent regex"));
static FPS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([0-9]+(?:\.[0-9]+)?)\s*fps").expect("fps regex"));
// NVEncC spells the unit "kb/s"; other builds report "kbps"/"Mbps".
static BITRATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([0-9]+(?:\.[0-9]+)?)\s*(k|m)?b(?:ps|/s)").expect("bitrate regex"));
static ETA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:eta|remain)\D*?([0-9]+):([0-9]{2}):([0-9]{2})").expect("eta regex")
});

/// Extracts progress fields from one decoded stderr line. Fields are
/// independent; the boolean reports whether anything matched at all.
pub(crate) fn parse_progress(line: &str) -> (Progress, bool) {
    let mut progress = Progress {
        raw_line: line.to_string(),
        ..Progress::default()
    };
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return (progress, false);
    }

    if let Some(caps) = PERCENT_RE.captures(trimmed) {
        progress.percent = caps[1].parse::<f64>().ok();
    }
    if let Some(caps) = FPS_RE.captures(trimmed) {
        progress.fps = caps[1].parse::<f64>().ok();
    }
    if let Some(caps) = BITRATE_RE.captures(trimmed) {
        if let Ok(mut value) = caps[1].parse::<f64>() {
            if let Some(unit) = caps.get(2)
                && unit.as_str().eq_ignore_ascii_case("m")
            {
                value *= 1000.0;
            }
            progress.bitrate_kbps = Some(value);
        }
    }
    if let Some(caps) = ETA_RE.captures(trimmed) {
        let hours: i64 = caps[1].parse().unwrap_or(0);
        let minutes: i64 = caps[2].parse().unwrap_or(0);
        let seconds: i64 = caps[3].parse().unwrap_or(0);
        progress.eta_sec = Some(hours * 3600 + minutes * 60 + seconds);
    }

    let matched = progress.percent.is_some()
        || progress.fps.is_some()
        || progress.bitrate_kbps.is_some()
        || progress.eta_sec.is_some();
    (progress, matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_nvencc_progress_line() {
        let line = "[53.2%] 1234 frames: 245.67 fps, 12345 kb/s, remain 0:01:23, GPU 45%, VE 78%, VD 12%";
        let (p, matched) = parse_progress(line);
        assert!(matched);
        assert_eq!(p.percent, Some(53.2));
        assert_eq!(p.fps, Some(245.67));
        assert_eq!(p.bitrate_kbps, Some(12345.0));
        assert_eq!(p.eta_sec, Some(83));
        assert_eq!(p.raw_line, line);
    }

    #[test]
    fn parses_mbps_line_with_eta_token() {
        let (p, matched) = parse_progress("42.3% 123.4 fps 5.6 Mbps ETA 00:01:12");
        assert!(matched);
        assert_eq!(p.percent, Some(42.3));
        assert_eq!(p.fps, Some(123.4));
        assert_eq!(p.bitrate_kbps, Some(5600.0));
        assert_eq!(p.eta_sec, Some(72));
    }

    #[test]
    fn hundred_percent_with_zero_eta() {
        let (p, _) = parse_progress("[100.0%] 5000 frames: 300.00 fps, 8765 kb/s, remain 0:00:00");
        assert_eq!(p.percent, Some(100.0));
        assert_eq!(p.eta_sec, Some(0));
    }

    #[test]
    fn fields_are_independent_when_some_are_missing() {
        let (p, matched) = parse_progress("[10.5%] 100 frames: 50.00 fps, 5000 kb/s");
        assert!(matched);
        assert_eq!(p.percent, Some(10.5));
        assert_eq!(p.eta_sec, None);

        let (p, matched) = parse_progress("encoding at 30 fps");
        assert!(matched);
        assert_eq!(p.percent, None);
        assert_eq!(p.fps, Some(30.0));
    }

    #[test]
    fn banner_line_matches_nothing_but_keeps_raw() {
        let line = "NVEncC (x64) 8.05 (r2994) by rigaya";
        let (p, matched) = parse_progress(line);
        assert!(!matched);
        assert_eq!(p.percent, None);
        assert_eq!(p.fps, None);
        assert_eq!(p.bitrate_kbps, None);
        assert_eq!(p.eta_sec, None);
        assert_eq!(p.raw_line, line);
    }

    #[test]
    fn empty_line_matches_nothing() {
        let (p, matched) = parse_progress("");
        assert!(!matched);
        assert_eq!(p, Progress::default());
    }

    #[test]
    fn long_eta_accumulates_hours() {
        let (p, _) = parse_progress("[1.0%] 50 frames: 10.00 fps, 5000 kb/s, remain 2:30:45");
        assert_eq!(p.eta_sec, Some(2 * 3600 + 30 * 60 + 45));
    }

    #[test]
    fn high_bitrate_stays_in_kbps() {
        let (p, _) = parse_progress("[75.3%] 3750 frames: 500.12 fps, 123456 kb/s, remain 0:00:30");
        assert_eq!(p.bitrate_kbps, Some(123456.0));
    }
}
