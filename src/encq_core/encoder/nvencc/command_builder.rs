//! Strictly ordered NVEncC argv assembly.
//!
//! Ordering is a hard contract: NVEncC applies a later-wins rule to repeated
//! flags, so the advanced block must follow the standard fields and the user
//! custom options must follow everything except the output path.

use crate::encq_core::domain::{
    AudioMode, Decoder, Multipass, NvenccAdvanced, ParallelMode, Profile, SplitEnc,
    validate_profile,
};
use crate::encq_core::encoder::tokenizer::tokenize_custom_options;
use crate::encq_core::encoder::{BuildRequest, BuildResult};
use crate::encq_core::error::EncqError;

pub(crate) fn build_command(req: &BuildRequest<'_>) -> Result<BuildResult, EncqError> {
    let errs = validate_profile(req.profile);
    if !errs.is_empty() {
        return Err(EncqError::validation(errs));
    }
    let p = req.profile;

    let mut args: Vec<String> = Vec::new();

    // 1. Decoder (front-positioned)
    append_decoder(&mut args, p);

    // 2. Input
    push_pair(&mut args, "-i", req.input_path);

    // 3. Video basic
    push_pair(&mut args, "-c", p.codec.as_str());
    push_pair(&mut args, p.rate_control.flag(), &format_rate(p.rate_value));
    push_pair(&mut args, "--preset", &p.preset);
    push_pair(&mut args, "--output-depth", &p.output_depth.to_string());

    // 4. Video detail
    append_video_detail(&mut args, p);

    // 5. Speed
    append_speed(&mut args, p);

    // 6. Audio
    append_audio(&mut args, p);

    // 7. Color
    append_color(&mut args, p);

    // 8. Metadata
    append_metadata(&mut args, p);

    // 9. Advanced (later-wins overrides of the standard fields)
    append_advanced(&mut args, &p.nvencc_advanced);

    // 10. Custom options (final priority before the output path)
    if !p.custom_options.is_empty() {
        args.extend(tokenize_custom_options(&p.custom_options)?);
    }

    // 11. Output
    push_pair(&mut args, "-o", req.output_path);

    let display_command = render_display_command(&args);
    Ok(BuildResult {
        argv: args,
        display_command,
        effective_decoder: p.decoder,
    })
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

/// Formats a rate value without trailing zeros: 28.0 -> "28", 23.5 -> "23.5".
fn format_rate(value: f64) -> String {
    format!("{value}")
}

fn append_decoder(args: &mut Vec<String>, p: &Profile) {
    match p.decoder {
        Decoder::Avsw => {
            args.push("--avsw".to_string());
            if !p.nvencc_advanced.avsw_decoder.is_empty() {
                args.push(p.nvencc_advanced.avsw_decoder.clone());
            }
        }
        Decoder::Avhw => args.push("--avhw".to_string()),
    }
}

fn append_video_detail(args: &mut Vec<String>, p: &Profile) {
    if p.multipass != Multipass::None {
        push_pair(args, "--multipass", p.multipass.as_str());
    }
    if !p.output_res.is_empty() {
        push_pair(args, "--output-res", &p.output_res);
    }
    if let Some(bframes) = p.bframes {
        push_pair(args, "--bframes", &bframes.to_string());
    }
    if let Some(r) = p.r#ref {
        push_pair(args, "--ref", &r.to_string());
    }
    if let Some(lookahead) = p.lookahead {
        push_pair(args, "--lookahead", &lookahead.to_string());
    }
    if let Some(gop_len) = p.gop_len {
        push_pair(args, "--gop-len", &gop_len.to_string());
    }
    if p.aq {
        args.push("--aq".to_string());
    }
    if p.aq_temporal {
        args.push("--aq-temporal".to_string());
    }
}

fn append_speed(args: &mut Vec<String>, p: &Profile) {
    if p.split_enc != SplitEnc::Off {
        push_pair(args, "--split-enc", p.split_enc.as_str());
    }
    if p.parallel != ParallelMode::Off {
        push_pair(args, "--parallel", p.parallel.as_str());
    }
    if p.device != "auto" && !p.device.is_empty() {
        push_pair(args, "--device", &p.device);
    }
}

fn append_audio(args: &mut Vec<String>, p: &Profile) {
    match p.audio_mode {
        AudioMode::Copy => args.push("--audio-copy".to_string()),
        AudioMode::Aac => {
            push_pair(args, "--audio-codec", "aac");
            push_pair(args, "--audio-bitrate", &p.audio_bitrate.to_string());
        }
        AudioMode::Opus => {
            push_pair(args, "--audio-codec", "opus");
            push_pair(args, "--audio-bitrate", &p.audio_bitrate.to_string());
        }
    }
}

fn append_color(args: &mut Vec<String>, p: &Profile) {
    for (flag, value) in [
        ("--colormatrix", &p.colormatrix),
        ("--transfer", &p.transfer),
        ("--colorprim", &p.colorprim),
        ("--colorrange", &p.colorrange),
    ] {
        if value != "auto" && !value.is_empty() {
            push_pair(args, flag, value);
        }
    }
    if p.dhdr10_info == "copy" {
        push_pair(args, "--dhdr10-info", "copy");
    }
}

fn append_metadata(args: &mut Vec<String>, p: &Profile) {
    if p.metadata_copy {
        push_pair(args, "--metadata", "copy");
    }
    if p.video_metadata_copy {
        push_pair(args, "--video-metadata", "copy");
    }
    if p.audio_metadata_copy {
        push_pair(args, "--audio-metadata", "copy");
    }
    if p.chapter_copy {
        args.push("--chapter-copy".to_string());
    }
    if p.sub_copy {
        args.push("--sub-copy".to_string());
    }
    if p.data_copy {
        args.push("--data-copy".to_string());
    }
    if p.attachment_copy {
        args.push("--attachment-copy".to_string());
    }
}

fn append_advanced(args: &mut Vec<String>, adv: &NvenccAdvanced) {
    let mut push_str = |flag: &str, value: &str| {
        if !value.is_empty() {
            push_pair(args, flag, value);
        }
    };
    push_str("--interlace", &adv.interlace);
    push_str("--input-csp", &adv.input_csp);
    push_str("--output-csp", &adv.output_csp);
    push_str("--tune", &adv.tune);

    if let Some(max_bitrate) = adv.max_bitrate {
        push_pair(args, "--max-bitrate", &max_bitrate.to_string());
    }
    if let Some(vbr_quality) = adv.vbr_quality {
        push_pair(args, "--vbr-quality", &format_rate(vbr_quality));
    }
    if let Some(lookahead_level) = adv.lookahead_level {
        push_pair(args, "--lookahead-level", &lookahead_level.to_string());
    }
    if adv.weightp {
        args.push("--weightp".to_string());
    }
    if !adv.mv_precision.is_empty() {
        push_pair(args, "--mv-precision", &adv.mv_precision);
    }
    if let Some(refs_forward) = adv.refs_forward {
        push_pair(args, "--refs-forward", &refs_forward.to_string());
    }
    if let Some(refs_backward) = adv.refs_backward {
        push_pair(args, "--refs-backward", &refs_backward.to_string());
    }
    if !adv.level.is_empty() {
        push_pair(args, "--level", &adv.level);
    }
    if !adv.profile.is_empty() {
        push_pair(args, "--profile", &adv.profile);
    }
    if !adv.tier.is_empty() {
        push_pair(args, "--tier", &adv.tier);
    }
    if let Some(output_thread) = adv.output_thread {
        push_pair(args, "--output-thread", &output_thread.to_string());
    }
    if adv.ssim {
        args.push("--ssim".to_string());
    }
    if adv.psnr {
        args.push("--psnr".to_string());
    }
    if !adv.trim.is_empty() {
        push_pair(args, "--trim", &adv.trim);
    }
    if !adv.seek.is_empty() {
        push_pair(args, "--seek", &adv.seek);
    }
    if !adv.seekto.is_empty() {
        push_pair(args, "--seekto", &adv.seekto);
    }
    if !adv.video_metadata.is_empty() {
        push_pair(args, "--video-metadata", &adv.video_metadata);
    }
    if !adv.audio_copy.is_empty() {
        push_pair(args, "--audio-copy", &adv.audio_copy);
    }
    if !adv.audio_codec.is_empty() {
        push_pair(args, "--audio-codec", &adv.audio_codec);
    }
    if !adv.audio_bitrate.is_empty() {
        push_pair(args, "--audio-bitrate", &adv.audio_bitrate);
    }
    if !adv.audio_quality.is_empty() {
        push_pair(args, "--audio-quality", &adv.audio_quality);
    }
    if !adv.audio_samplerate.is_empty() {
        push_pair(args, "--audio-samplerate", &adv.audio_samplerate);
    }
    if !adv.audio_metadata.is_empty() {
        push_pair(args, "--audio-metadata", &adv.audio_metadata);
    }
    if !adv.sub_copy.is_empty() {
        push_pair(args, "--sub-copy", &adv.sub_copy);
    }
    if !adv.sub_metadata.is_empty() {
        push_pair(args, "--sub-metadata", &adv.sub_metadata);
    }
    if !adv.data_copy.is_empty() {
        push_pair(args, "--data-copy", &adv.data_copy);
    }
    if !adv.attachment_copy.is_empty() {
        push_pair(args, "--attachment-copy", &adv.attachment_copy);
    }
    if !adv.metadata.is_empty() {
        push_pair(args, "--metadata", &adv.metadata);
    }
}

/// Shell-quoted rendering of the argv for display and job records: tokens
/// containing whitespace or quotes are wrapped in double quotes with inner
/// double quotes escaped.
pub(crate) fn render_display_command(args: &[String]) -> String {
    let rendered: Vec<String> = args
        .iter()
        .map(|token| {
            if token.contains(' ')
                || token.contains('\t')
                || token.contains('"')
                || token.contains('\'')
            {
                format!("\"{}\"", token.replace('"', "\\\""))
            } else {
                token.clone()
            }
        })
        .collect();
    rendered.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encq_core::domain::{Codec, Profile, RateControl};

    fn build(profile: &Profile) -> BuildResult {
        build_command(&BuildRequest {
            profile,
            input_path: "in.mp4",
            output_path: "out.mkv",
        })
        .expect("build should succeed")
    }

    fn index_of(argv: &[String], token: &str) -> usize {
        argv.iter()
            .position(|a| a == token)
            .unwrap_or_else(|| panic!("missing {token} in {argv:?}"))
    }

    #[test]
    fn default_profile_produces_contract_prefix_and_suffix() {
        let result = build(&Profile::default());
        let argv = &result.argv;
        assert_eq!(
            &argv[..11],
            &[
                "--avhw",
                "-i",
                "in.mp4",
                "-c",
                "hevc",
                "--qvbr",
                "28",
                "--preset",
                "P4",
                "--output-depth",
                "10",
            ]
        );
        assert_eq!(&argv[argv.len() - 2..], &["-o", "out.mkv"]);
        assert_eq!(result.effective_decoder, Decoder::Avhw);
    }

    #[test]
    fn build_is_a_pure_function() {
        let profile = Profile::default();
        let a = build(&profile);
        let b = build(&profile);
        assert_eq!(a.argv, b.argv);
        assert_eq!(a.display_command, b.display_command);
    }

    #[test]
    fn rate_value_drops_trailing_zeros() {
        let mut profile = Profile::default();
        profile.rate_control = RateControl::Cqp;
        profile.rate_value = 23.5;
        let result = build(&profile);
        let cqp = index_of(&result.argv, "--cqp");
        assert_eq!(result.argv[cqp + 1], "23.5");

        profile.rate_value = 24.0;
        let result = build(&profile);
        let cqp = index_of(&result.argv, "--cqp");
        assert_eq!(result.argv[cqp + 1], "24");
    }

    #[test]
    fn all_codecs_emit_c_flag() {
        for (codec, name) in [
            (Codec::H264, "h264"),
            (Codec::Hevc, "hevc"),
            (Codec::Av1, "av1"),
        ] {
            let mut profile = Profile::default();
            profile.codec = codec;
            let result = build(&profile);
            let c = index_of(&result.argv, "-c");
            assert_eq!(result.argv[c + 1], name);
        }
    }

    #[test]
    fn avsw_with_named_decoder() {
        let mut profile = Profile::default();
        profile.decoder = Decoder::Avsw;
        profile.nvencc_advanced.avsw_decoder = "h264_sw".to_string();
        let result = build(&profile);
        assert_eq!(&result.argv[..3], &["--avsw", "h264_sw", "-i"]);
        assert!(!result.argv.contains(&"--avhw".to_string()));
    }

    #[test]
    fn optional_video_detail_fields_are_omitted_when_absent() {
        let result = build(&Profile::default());
        for flag in ["--bframes", "--ref", "--lookahead", "--gop-len", "--multipass"] {
            assert!(
                !result.argv.contains(&flag.to_string()),
                "unset field emitted {flag}"
            );
        }
    }

    #[test]
    fn optional_video_detail_fields_are_emitted_when_set() {
        let mut profile = Profile::default();
        profile.bframes = Some(3);
        profile.r#ref = Some(4);
        profile.lookahead = Some(16);
        profile.gop_len = Some(300);
        profile.multipass = Multipass::Quarter;
        let result = build(&profile);
        for (flag, value) in [
            ("--multipass", "quarter"),
            ("--bframes", "3"),
            ("--ref", "4"),
            ("--lookahead", "16"),
            ("--gop-len", "300"),
        ] {
            let i = index_of(&result.argv, flag);
            assert_eq!(result.argv[i + 1], value);
        }
    }

    #[test]
    fn device_only_emitted_when_not_auto() {
        let result = build(&Profile::default());
        assert!(!result.argv.contains(&"--device".to_string()));

        let mut profile = Profile::default();
        profile.device = "1".to_string();
        let result = build(&profile);
        let i = index_of(&result.argv, "--device");
        assert_eq!(result.argv[i + 1], "1");
    }

    #[test]
    fn audio_modes() {
        let mut profile = Profile::default();
        profile.audio_mode = AudioMode::Aac;
        profile.audio_bitrate = 192;
        let result = build(&profile);
        let i = index_of(&result.argv, "--audio-codec");
        assert_eq!(&result.argv[i..i + 4], &[
            "--audio-codec",
            "aac",
            "--audio-bitrate",
            "192"
        ]);

        profile.audio_mode = AudioMode::Copy;
        let result = build(&profile);
        assert!(result.argv.contains(&"--audio-copy".to_string()));
        assert!(!result.argv.contains(&"--audio-codec".to_string()));
    }

    #[test]
    fn color_flags_only_when_not_auto() {
        let result = build(&Profile::default());
        for flag in ["--colormatrix", "--transfer", "--colorprim", "--colorrange"] {
            assert!(!result.argv.contains(&flag.to_string()));
        }

        let mut profile = Profile::default();
        profile.colormatrix = "bt709".to_string();
        profile.transfer = "smpte2084".to_string();
        profile.colorprim = "bt2020".to_string();
        profile.colorrange = "full".to_string();
        profile.dhdr10_info = "copy".to_string();
        let result = build(&profile);
        for (flag, value) in [
            ("--colormatrix", "bt709"),
            ("--transfer", "smpte2084"),
            ("--colorprim", "bt2020"),
            ("--colorrange", "full"),
            ("--dhdr10-info", "copy"),
        ] {
            let i = index_of(&result.argv, flag);
            assert_eq!(result.argv[i + 1], value);
        }
    }

    #[test]
    fn metadata_flags_disappear_when_disabled() {
        let mut profile = Profile::default();
        profile.metadata_copy = false;
        profile.video_metadata_copy = false;
        profile.audio_metadata_copy = false;
        profile.chapter_copy = false;
        profile.sub_copy = false;
        profile.data_copy = false;
        profile.attachment_copy = false;
        let result = build(&profile);
        for flag in [
            "--metadata",
            "--video-metadata",
            "--audio-metadata",
            "--chapter-copy",
            "--sub-copy",
            "--data-copy",
            "--attachment-copy",
        ] {
            assert!(!result.argv.contains(&flag.to_string()), "{flag} leaked");
        }
    }

    #[test]
    fn advanced_metadata_appears_after_standard_for_later_wins() {
        let mut profile = Profile::default();
        profile.nvencc_advanced.metadata = "title=test".to_string();
        let result = build(&profile);
        let argv = &result.argv;

        let std_pos = argv
            .windows(2)
            .position(|w| w[0] == "--metadata" && w[1] == "copy")
            .expect("standard --metadata copy present");
        let adv_pos = argv
            .windows(2)
            .position(|w| w[0] == "--metadata" && w[1] == "title=test")
            .expect("advanced --metadata present");
        assert!(
            adv_pos > std_pos,
            "advanced occurrence must come later so NVEncC later-wins applies"
        );
    }

    #[test]
    fn phase_ordering_holds_across_a_full_profile() {
        let mut profile = Profile::default();
        profile.bframes = Some(3);
        profile.multipass = Multipass::Quarter;
        profile.split_enc = SplitEnc::Forced3;
        profile.colormatrix = "bt709".to_string();
        profile.nvencc_advanced.max_bitrate = Some(50_000);
        profile.custom_options = "--vpp-nlmeans sigma=0.005".to_string();
        let result = build(&profile);
        let argv = &result.argv;

        let phases = [
            "--avhw",
            "-i",
            "-c",
            "--multipass",
            "--split-enc",
            "--audio-copy",
            "--colormatrix",
            "--metadata",
            "--max-bitrate",
            "--vpp-nlmeans",
            "-o",
        ];
        let positions: Vec<usize> = phases.iter().map(|f| index_of(argv, f)).collect();
        for pair in positions.windows(2) {
            assert!(
                pair[0] < pair[1],
                "phase ordering violated in {argv:?}"
            );
        }
        assert_eq!(argv[argv.len() - 2], "-o", "-o must be last flag");
    }

    #[test]
    fn custom_options_errors_surface_as_validation() {
        let mut profile = Profile::default();
        profile.custom_options = "--opt \"unclosed".to_string();
        let err = build_command(&BuildRequest {
            profile: &profile,
            input_path: "in.mp4",
            output_path: "out.mkv",
        })
        .expect_err("unclosed quote must fail");
        assert_eq!(err.code(), "E_VALIDATION");
    }

    #[test]
    fn invalid_profile_fails_before_assembly() {
        let mut profile = Profile::default();
        profile.rate_value = 0.0;
        let err = build_command(&BuildRequest {
            profile: &profile,
            input_path: "in.mp4",
            output_path: "out.mkv",
        })
        .expect_err("invalid profile must fail");
        assert_eq!(err.code(), "E_VALIDATION");
    }

    #[test]
    fn scenario_hevc_qvbr_with_advanced_metadata_and_custom_options() {
        let mut profile = Profile::default();
        profile.nvencc_advanced.metadata = "delete".to_string();
        profile.custom_options = r#"--metadata keep --foo "bar baz""#.to_string();
        let result = build_command(&BuildRequest {
            profile: &profile,
            input_path: r"C:\in video.mp4",
            output_path: r"C:\out.mkv",
        })
        .expect("scenario build");
        let argv = &result.argv;

        assert_eq!(
            &argv[..11],
            &[
                "--avhw",
                "-i",
                r"C:\in video.mp4",
                "-c",
                "hevc",
                "--qvbr",
                "28",
                "--preset",
                "P4",
                "--output-depth",
                "10",
            ]
        );
        for flag in ["--aq", "--aq-temporal"] {
            assert!(argv.contains(&flag.to_string()));
        }
        let split = index_of(argv, "--split-enc");
        assert_eq!(argv[split + 1], "auto");
        assert!(argv.contains(&"--audio-copy".to_string()));

        // delete (advanced) before keep (custom), both before the output.
        let tail: Vec<&str> = argv[argv.len() - 8..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--metadata",
                "delete",
                "--metadata",
                "keep",
                "--foo",
                "bar baz",
                "-o",
                r"C:\out.mkv",
            ]
        );

        // Display command double-quotes exactly the two tokens with spaces.
        assert!(
            result
                .display_command
                .contains(r#""C:\in video.mp4""#)
        );
        assert!(result.display_command.contains(r#""bar baz""#));
        assert!(result.display_command.ends_with(r"-o C:\out.mkv"));
    }

    #[test]
    fn display_command_escapes_embedded_double_quotes() {
        let rendered = render_display_command(&[
            "--metadata".to_string(),
            "title=say \"hi\"".to_string(),
        ]);
        assert_eq!(rendered, r#"--metadata "title=say \"hi\"""#);
    }
}
