//! Encoder adapters and the process machinery that drives them.

pub(crate) mod line_splitter;
pub(crate) mod nvencc;
pub(crate) mod process_group;
pub(crate) mod process_runner;
pub(crate) mod timeout_guard;
pub(crate) mod tokenizer;

use std::collections::HashMap;
use std::sync::Arc;

use crate::encq_core::domain::{Decoder, EncoderType, Profile, Progress};
use crate::encq_core::error::EncqError;

/// Inputs for one argv build.
#[derive(Debug, Clone)]
pub(crate) struct BuildRequest<'a> {
    pub profile: &'a Profile,
    pub input_path: &'a str,
    pub output_path: &'a str,
}

/// A fully built command line plus the decoder it ended up selecting, which
/// the retry path inspects.
#[derive(Debug, Clone)]
pub(crate) struct BuildResult {
    pub argv: Vec<String>,
    pub display_command: String,
    pub effective_decoder: Decoder,
}

pub(crate) trait EncoderAdapter: Send + Sync {
    fn encoder_type(&self) -> EncoderType;

    fn supports_decoder_fallback(&self) -> bool {
        false
    }

    fn build_args(&self, req: &BuildRequest<'_>) -> Result<BuildResult, EncqError>;

    /// Builds the argv for the one-shot software-decoder retry, or `None`
    /// when the previous build does not qualify for a fallback.
    fn build_retry_args(
        &self,
        req: &BuildRequest<'_>,
        previous: &BuildResult,
    ) -> Result<Option<BuildResult>, EncqError>;

    /// Parses one stderr line. The boolean reports whether any field
    /// matched, independent of which ones.
    fn parse_progress(&self, line: &str) -> (Progress, bool);
}

pub(crate) struct Registry {
    adapters: HashMap<EncoderType, Arc<dyn EncoderAdapter>>,
}

impl Registry {
    pub(crate) fn with_default_adapters() -> Self {
        let declared: [Arc<dyn EncoderAdapter>; 3] = [
            Arc::new(nvencc::NvenccAdapter),
            Arc::new(NotImplementedAdapter(EncoderType::Qsvenc)),
            Arc::new(NotImplementedAdapter(EncoderType::Ffmpeg)),
        ];
        let mut adapters: HashMap<EncoderType, Arc<dyn EncoderAdapter>> = HashMap::new();
        for adapter in declared {
            adapters.insert(adapter.encoder_type(), adapter);
        }
        Registry { adapters }
    }

    pub(crate) fn resolve(
        &self,
        encoder_type: EncoderType,
    ) -> Result<Arc<dyn EncoderAdapter>, EncqError> {
        self.adapters.get(&encoder_type).cloned().ok_or_else(|| {
            EncqError::EncoderNotImplemented(format!(
                "encoder_type {} is not implemented",
                encoder_type.as_str()
            ))
        })
    }
}

/// Declared adapters for encoders the queue does not drive yet. Every build
/// fails with the stable `EncoderNotImplemented` code.
struct NotImplementedAdapter(EncoderType);

impl EncoderAdapter for NotImplementedAdapter {
    fn encoder_type(&self) -> EncoderType {
        self.0
    }

    fn build_args(&self, _req: &BuildRequest<'_>) -> Result<BuildResult, EncqError> {
        Err(EncqError::EncoderNotImplemented(format!(
            "{} adapter is not implemented",
            self.0.as_str()
        )))
    }

    fn build_retry_args(
        &self,
        _req: &BuildRequest<'_>,
        _previous: &BuildResult,
    ) -> Result<Option<BuildResult>, EncqError> {
        Ok(None)
    }

    fn parse_progress(&self, line: &str) -> (Progress, bool) {
        (
            Progress {
                raw_line: line.to_string(),
                ..Progress::default()
            },
            false,
        )
    }
}
