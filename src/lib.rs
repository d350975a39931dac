#[macro_export]
macro_rules! debug_eprintln {
    ($($arg:tt)*) => {{
        #[cfg(debug_assertions)]
        {
            eprintln!($($arg)*);
        }
        // In release builds we still want the arguments to be "used" so we
        // don't get unused variable/import warnings, but we do not want to
        // evaluate potentially expensive formatting expressions.
        #[cfg(not(debug_assertions))]
        {
            let _ = || {
                let _ = format_args!($($arg)*);
            };
        }
    }};
}

mod encq_core;
mod process_ext;
mod sync_ext;

pub use crate::encq_core::app::{App, BootstrapResponse, PreviewCommandResponse};
pub use crate::encq_core::domain::{
    AppConfig, AudioMode, Codec, Decoder, EncoderType, JobInput, JobStatus, Multipass,
    NvenccAdvanced, OnError, OutputFolderMode, OverwriteDecision, OverwriteMode, ParallelMode,
    PostAction, Profile, Progress, QueueJob, RateControl, SessionSnapshot, SessionState,
    SplitEnc, StartEncodeRequest,
};
pub use crate::encq_core::error::EncqError;
pub use crate::encq_core::events::{EventSink, event_names};
pub use crate::encq_core::paths::DataPaths;
pub use crate::encq_core::tools::{GpuInfo, ToolInfo, ToolsSnapshot};
