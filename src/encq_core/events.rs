//! Event emission contract between the queue core and its host shell.
//!
//! The host (GUI, RPC layer, test harness) implements [`EventSink`]; the
//! core serializes typed payloads and emits them by name. Sinks must be safe
//! to call from any worker thread.

use std::sync::Arc;

use serde::Serialize;

use crate::encq_core::domain::SessionSnapshot;

pub trait EventSink: Send + Sync {
    fn emit(&self, name: &str, payload: serde_json::Value);
}

pub mod event_names {
    pub const SESSION_STARTED: &str = "session_started";
    pub const SESSION_STATE: &str = "session_state";
    pub const SESSION_FINISHED: &str = "session_finished";
    pub const JOB_STARTED: &str = "job_started";
    pub const JOB_PROGRESS: &str = "job_progress";
    pub const JOB_LOG: &str = "job_log";
    pub const JOB_NEEDS_OVERWRITE: &str = "job_needs_overwrite";
    pub const JOB_FINISHED: &str = "job_finished";
    pub const WARNING: &str = "warning";
    pub const ERROR: &str = "error";
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobStartedPayload {
    pub session_id: String,
    pub job_id: String,
    pub worker_id: u32,
    pub input_path: String,
    pub input_size_bytes: u64,
    pub temp_output_path: String,
    pub encoder_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobProgressPayload {
    pub session_id: String,
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_sec: Option<i64>,
    pub raw_line: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobLogPayload {
    pub session_id: String,
    pub job_id: String,
    pub line: String,
    pub ts: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobNeedsOverwritePayload {
    pub session_id: String,
    pub job_id: String,
    pub final_output_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobFinishedPayload {
    pub session_id: String,
    pub job_id: String,
    pub status: &'static str,
    pub exit_code: Option<i32>,
    pub error_message: String,
    pub final_output_path: String,
    pub retry_applied: bool,
    pub retry_detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct NoticePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Thin typed wrapper over the sink; every emission funnels through
/// [`EventHub::emit`] so payload serialization lives in one place.
#[derive(Clone)]
pub(crate) struct EventHub {
    sink: Arc<dyn EventSink>,
}

impl EventHub {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        EventHub { sink }
    }

    fn emit<T: Serialize>(&self, name: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.sink.emit(name, value),
            Err(err) => crate::debug_eprintln!("failed to serialize {name} payload: {err}"),
        }
    }

    pub(crate) fn session_started(&self, snapshot: &SessionSnapshot) {
        self.emit(event_names::SESSION_STARTED, snapshot);
    }

    pub(crate) fn session_state(&self, snapshot: &SessionSnapshot) {
        self.emit(event_names::SESSION_STATE, snapshot);
    }

    pub(crate) fn session_finished(&self, snapshot: &SessionSnapshot) {
        self.emit(event_names::SESSION_FINISHED, snapshot);
    }

    pub(crate) fn job_started(&self, payload: &JobStartedPayload) {
        self.emit(event_names::JOB_STARTED, payload);
    }

    pub(crate) fn job_progress(&self, payload: &JobProgressPayload) {
        self.emit(event_names::JOB_PROGRESS, payload);
    }

    pub(crate) fn job_log(&self, payload: &JobLogPayload) {
        self.emit(event_names::JOB_LOG, payload);
    }

    pub(crate) fn job_needs_overwrite(&self, payload: &JobNeedsOverwritePayload) {
        self.emit(event_names::JOB_NEEDS_OVERWRITE, payload);
    }

    pub(crate) fn job_finished(&self, payload: &JobFinishedPayload) {
        self.emit(event_names::JOB_FINISHED, payload);
    }

    pub(crate) fn warning(&self, payload: &NoticePayload) {
        self.emit(event_names::WARNING, payload);
    }

    pub(crate) fn error(&self, payload: &NoticePayload) {
        self.emit(event_names::ERROR, payload);
    }
}
