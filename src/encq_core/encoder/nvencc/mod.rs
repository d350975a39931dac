//! NVEncC adapter: deterministic argv assembly and stderr progress parsing.

pub(crate) mod command_builder;
pub(crate) mod progress;

use crate::encq_core::domain::{Decoder, EncoderType, Progress};
use crate::encq_core::encoder::{BuildRequest, BuildResult, EncoderAdapter};
use crate::encq_core::error::EncqError;

pub(crate) struct NvenccAdapter;

impl EncoderAdapter for NvenccAdapter {
    fn encoder_type(&self) -> EncoderType {
        EncoderType::Nvencc
    }

    fn supports_decoder_fallback(&self) -> bool {
        true
    }

    fn build_args(&self, req: &BuildRequest<'_>) -> Result<BuildResult, EncqError> {
        command_builder::build_command(req)
    }

    fn build_retry_args(
        &self,
        req: &BuildRequest<'_>,
        previous: &BuildResult,
    ) -> Result<Option<BuildResult>, EncqError> {
        if previous.effective_decoder != Decoder::Avhw {
            return Ok(None);
        }
        // Force the plain software decoder; the advanced avsw_decoder name
        // only applies to deliberate avsw profiles, not to the fallback run.
        let mut profile = req.profile.clone();
        profile.decoder = Decoder::Avsw;
        profile.nvencc_advanced.avsw_decoder.clear();
        let retry_req = BuildRequest {
            profile: &profile,
            input_path: req.input_path,
            output_path: req.output_path,
        };
        command_builder::build_command(&retry_req).map(Some)
    }

    fn parse_progress(&self, line: &str) -> (Progress, bool) {
        progress::parse_progress(line)
    }
}
