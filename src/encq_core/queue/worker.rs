//! Worker task: drains the job channel and drives each job through resolve,
//! spawn, stream-parse, finalize.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};

use crate::encq_core::cancel::CancellationToken;
use crate::encq_core::domain::{AppConfig, JobStatus, OnError, OverwriteDecision, Profile};
use crate::encq_core::encoder::process_runner::{self, RunResult, RunSpec};
use crate::encq_core::encoder::{BuildRequest, BuildResult, EncoderAdapter};
use crate::encq_core::events::{
    EventHub, JobFinishedPayload, JobLogPayload, JobNeedsOverwritePayload, JobProgressPayload,
    JobStartedPayload, NoticePayload,
};
use crate::encq_core::logging::{JOB_RECORD_SCHEMA_VERSION, JobRecord, StderrLogWriter};
use crate::encq_core::paths::DataPaths;
use crate::encq_core::queue::file_times;
use crate::encq_core::queue::manager::OverwriteWaiters;
use crate::encq_core::queue::resolver::{OutputResolver, ResolveResult};
use crate::encq_core::queue::session::Session;
use crate::encq_core::queue::temp_index::TempArtifactIndex;
use crate::sync_ext::MutexExt;

/// Spacing floor for `job_progress` emissions, per job. `job_log` is never
/// throttled.
const PROGRESS_EMIT_FLOOR: Duration = Duration::from_millis(500);
const OVERWRITE_WAIT: Duration = Duration::from_secs(600);

pub(crate) struct WorkerContext {
    pub worker_id: u32,
    pub session: Arc<Mutex<Session>>,
    pub adapter: Arc<dyn EncoderAdapter>,
    pub resolver: Arc<OutputResolver>,
    pub temp_index: Arc<TempArtifactIndex>,
    pub events: EventHub,
    pub overwrites: Arc<OverwriteWaiters>,
    pub profile: Profile,
    pub config: AppConfig,
    pub encoder_path: String,
    pub paths: DataPaths,
}

/// Drains job ids until the channel closes. Abort bails immediately; a
/// graceful stop keeps draining so the remaining jobs terminate as skipped.
pub(crate) fn worker_loop(ctx: &WorkerContext, jobs: &Mutex<Receiver<String>>) {
    loop {
        let job_id = {
            let rx = jobs.lock_unpoisoned();
            match rx.recv() {
                Ok(id) => id,
                Err(_) => break,
            }
        };

        let (abort_requested, stop_requested) = {
            let session = ctx.session.lock_unpoisoned();
            (session.abort_requested, session.stop_requested)
        };
        if abort_requested {
            break;
        }
        if stop_requested {
            finish_without_run(ctx, &job_id, JobStatus::Skipped, None, "stop requested");
            continue;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| execute_job(ctx, &job_id)));
        if let Err(payload) = outcome {
            let reason = format!("job panicked: {}", panic_payload_to_string(payload.as_ref()));
            finish_without_run(ctx, &job_id, JobStatus::Failed, Some(-1), &reason);
        }
    }
}

fn execute_job(ctx: &WorkerContext, job_id: &str) {
    let input_path = {
        let session = ctx.session.lock_unpoisoned();
        match session.jobs.iter().find(|j| j.job_id == job_id) {
            Some(job) => job.input_path.clone(),
            None => return,
        }
    };
    let input = Path::new(&input_path).to_path_buf();

    // 1. Reserve output paths, possibly pausing for an overwrite decision.
    let resolved = match ctx.resolver.resolve(&input, &ctx.config) {
        Ok(resolved) => resolved,
        Err(err) => {
            finish_without_run(ctx, job_id, JobStatus::Failed, Some(-1), &err.to_string());
            return;
        }
    };
    let resolved = if resolved.needs_overwrite {
        match wait_for_overwrite_decision(ctx, job_id, &resolved) {
            Some(resolved) => resolved,
            None => return,
        }
    } else {
        resolved
    };
    let temp_path = resolved.temp_output_path.clone();
    let final_path = resolved.final_output_path.clone();

    // 2. Record the temp artifact before anything can crash mid-encode.
    ctx.temp_index.append(&temp_path);

    // 3. Build the argv.
    let temp_str = temp_path.to_string_lossy().into_owned();
    let final_str = final_path.to_string_lossy().into_owned();
    let build_req = BuildRequest {
        profile: &ctx.profile,
        input_path: &input_path,
        output_path: &temp_str,
    };
    let first_build = match ctx.adapter.build_args(&build_req) {
        Ok(build) => build,
        Err(err) => {
            ctx.temp_index.remove(&temp_path);
            ctx.resolver.release(&final_path);
            finish_without_run(ctx, job_id, JobStatus::Failed, Some(-1), &err.to_string());
            return;
        }
    };

    // 4. Cancellation token + running transition.
    let token = CancellationToken::new();
    let input_size_bytes = std::fs::metadata(&input).map(|m| m.len()).unwrap_or(0);
    let started = Instant::now();
    let started_at = rfc3339_now();
    let (session_id, snapshot) = {
        let mut session = ctx.session.lock_unpoisoned();
        session.register_job_token(job_id, token.clone());
        session.mark_running(job_id, ctx.worker_id);
        if let Some(job) = session.job_mut(job_id) {
            job.input_size_bytes = input_size_bytes;
            job.temp_output_path = temp_str.clone();
            job.final_output_path = final_str.clone();
        }
        (session.id.clone(), session.snapshot())
    };
    ctx.events.job_started(&JobStartedPayload {
        session_id: session_id.clone(),
        job_id: job_id.to_string(),
        worker_id: ctx.worker_id,
        input_path: input_path.clone(),
        input_size_bytes,
        temp_output_path: temp_str.clone(),
        encoder_type: ctx.adapter.encoder_type().as_str(),
    });
    ctx.events.session_state(&snapshot);

    // 5. Per-job stderr capture.
    let mut stderr_log = match StderrLogWriter::create(&ctx.paths.job_stderr_log_path(job_id)) {
        Ok(writer) => writer,
        Err(err) => {
            warn(ctx, &session_id, Some(job_id), &format!("stderr log: {err:#}"));
            StderrLogWriter::inert()
        }
    };

    // 6. Run, with one software-decoder retry when the adapter opts in.
    let mut result = run_encoder(ctx, &session_id, job_id, &first_build, &token, &mut stderr_log);
    let mut effective_build = first_build.clone();
    let mut retry_applied = false;
    let mut retry_detail = String::new();

    if result.exit_code != 0
        && !result.timed_out
        && !result.cancelled
        && ctx.config.decoder_fallback
        && ctx.adapter.supports_decoder_fallback()
    {
        match ctx.adapter.build_retry_args(&build_req, &first_build) {
            Ok(Some(retry_build)) => {
                warn(
                    ctx,
                    &session_id,
                    Some(job_id),
                    "retrying with software decoder (avsw)",
                );
                retry_applied = true;
                retry_detail = "nvencc: avhw->avsw".to_string();
                result = run_encoder(ctx, &session_id, job_id, &retry_build, &token, &mut stderr_log);
                effective_build = retry_build;
            }
            Ok(None) => {}
            Err(err) => {
                warn(
                    ctx,
                    &session_id,
                    Some(job_id),
                    &format!("decoder fallback rebuild failed: {err}"),
                );
            }
        }
    }

    // 8. Token is done regardless of outcome.
    {
        let mut session = ctx.session.lock_unpoisoned();
        session.deregister_job_token(job_id);
    }

    // 9. Derive the terminal status; the first observed terminal condition
    // wins (a cancelled job that exited 0 stays completed).
    let mut status = if result.timed_out {
        JobStatus::Timeout
    } else if result.exit_code == 0 {
        JobStatus::Completed
    } else if result.cancelled {
        JobStatus::Cancelled
    } else {
        JobStatus::Failed
    };
    let mut error_message = result.error_message.clone();

    // 10. Success path: temp becomes final; a failed rename downgrades.
    if status == JobStatus::Completed {
        if let Err(err) = std::fs::rename(&temp_path, &final_path) {
            status = JobStatus::Failed;
            error_message = format!(
                "rename {} -> {}: {err}",
                temp_path.display(),
                final_path.display()
            );
        } else if ctx.profile.restore_file_time {
            let times = file_times::read_file_times(&input);
            if let Err(err) = file_times::apply_file_times(&final_path, &times) {
                warn(
                    ctx,
                    &session_id,
                    Some(job_id),
                    &format!("failed to restore file time: {err}"),
                );
            }
        }
    }

    // 11. Failure path: drop the partial output unless asked to keep it.
    if status != JobStatus::Completed && !ctx.config.keep_failed_temp {
        let _ = std::fs::remove_file(&temp_path);
    }

    // 12. The artifact is either final or gone.
    ctx.temp_index.remove(&temp_path);

    // 13. Terminal transition + events.
    let snapshot = {
        let mut session = ctx.session.lock_unpoisoned();
        session.mark_terminal(job_id, status, Some(result.exit_code), &error_message);
        session.snapshot()
    };
    ctx.events.job_finished(&JobFinishedPayload {
        session_id: session_id.clone(),
        job_id: job_id.to_string(),
        status: status.as_str(),
        exit_code: Some(result.exit_code),
        error_message: error_message.clone(),
        final_output_path: final_str.clone(),
        retry_applied,
        retry_detail: retry_detail.clone(),
    });
    ctx.events.session_state(&snapshot);

    // 14. Error policy.
    if matches!(status, JobStatus::Failed | JobStatus::Timeout)
        && ctx.config.on_error == OnError::Stop
    {
        ctx.session.lock_unpoisoned().request_stop();
    }

    // 15. Durable record, then release the reservation.
    let record = JobRecord {
        schema_version: JOB_RECORD_SCHEMA_VERSION,
        job_id: job_id.to_string(),
        session_id: session_id.clone(),
        input_path: input_path.clone(),
        output_path: final_str,
        temp_output_path: temp_str,
        command_line: {
            let mut cmd = Vec::with_capacity(effective_build.argv.len() + 1);
            cmd.push(ctx.encoder_path.clone());
            cmd.extend(effective_build.argv.iter().cloned());
            cmd
        },
        display_command: effective_build.display_command.clone(),
        encoder_type: ctx.adapter.encoder_type().as_str().to_string(),
        encoder_path: ctx.encoder_path.clone(),
        exit_code: Some(result.exit_code),
        status: status.as_str().to_string(),
        error_message,
        worker_id: ctx.worker_id,
        profile_id: ctx.profile.id.clone(),
        profile_name: ctx.profile.name.clone(),
        profile_version: ctx.profile.version,
        device: ctx.profile.device.clone(),
        max_concurrent_jobs: ctx.config.max_concurrent_jobs,
        used_job_object: result.used_job_object,
        started_at,
        finished_at: rfc3339_now(),
        duration_sec: started.elapsed().as_secs_f64(),
        retry_applied,
        retry_detail,
    };
    if let Err(err) = record.save(&ctx.paths.job_record_path(job_id)) {
        warn(
            ctx,
            &session_id,
            Some(job_id),
            &format!("failed to write job record: {err:#}"),
        );
    }
    ctx.resolver.release(&final_path);
}

/// Emits `job_needs_overwrite` and blocks on the single-slot reply channel.
/// Returns the re-resolved paths on `overwrite`, `None` when the job ended
/// as skipped.
fn wait_for_overwrite_decision(
    ctx: &WorkerContext,
    job_id: &str,
    resolved: &ResolveResult,
) -> Option<ResolveResult> {
    // Register the reply slot first; a shell that answers instantly must
    // find it waiting.
    let rx = ctx.overwrites.register(job_id);
    let (session_id, abort_requested) = {
        let session = ctx.session.lock_unpoisoned();
        (session.id.clone(), session.abort_requested)
    };
    ctx.events.job_needs_overwrite(&JobNeedsOverwritePayload {
        session_id,
        job_id: job_id.to_string(),
        final_output_path: resolved.final_output_path.to_string_lossy().into_owned(),
    });

    // An abort that landed before registration would otherwise leave this
    // worker blocked for the full deadline; answer the slot ourselves.
    if abort_requested {
        ctx.overwrites.resolve(job_id, OverwriteDecision::Abort);
    }
    let decision = ctx.overwrites.await_decision(job_id, rx, OVERWRITE_WAIT);
    match decision {
        OverwriteDecision::Overwrite => {
            let input_path = {
                let session = ctx.session.lock_unpoisoned();
                session
                    .jobs
                    .iter()
                    .find(|j| j.job_id == job_id)
                    .map(|j| j.input_path.clone())
                    .unwrap_or_default()
            };
            let input = Path::new(&input_path).to_path_buf();
            match ctx.resolver.resolve_accept_overwrite(&input, &ctx.config) {
                Ok(resolved) => Some(resolved),
                Err(err) => {
                    finish_without_run(ctx, job_id, JobStatus::Failed, Some(-1), &err.to_string());
                    None
                }
            }
        }
        OverwriteDecision::Skip => {
            finish_without_run(
                ctx,
                job_id,
                JobStatus::Skipped,
                Some(-1),
                "overwrite skipped by user",
            );
            None
        }
        OverwriteDecision::Abort => {
            {
                let mut session = ctx.session.lock_unpoisoned();
                session.request_abort();
            }
            ctx.overwrites.abort_all();
            finish_without_run(
                ctx,
                job_id,
                JobStatus::Skipped,
                Some(-1),
                "overwrite aborted by user",
            );
            None
        }
    }
}

fn run_encoder(
    ctx: &WorkerContext,
    session_id: &str,
    job_id: &str,
    build: &BuildResult,
    token: &CancellationToken,
    stderr_log: &mut StderrLogWriter,
) -> RunResult {
    let spec = RunSpec {
        executable: &ctx.encoder_path,
        argv: &build.argv,
        no_output_timeout: Duration::from_secs(u64::from(ctx.config.no_output_timeout_sec)),
        no_progress_timeout: Duration::from_secs(u64::from(ctx.config.no_progress_timeout_sec)),
    };

    let mut last_percent: Option<f64> = None;
    let mut last_emit: Option<Instant> = None;

    process_runner::run(
        &spec,
        token,
        &mut |line| {
            stderr_log.write_line(line);
            ctx.events.job_log(&JobLogPayload {
                session_id: session_id.to_string(),
                job_id: job_id.to_string(),
                line: line.to_string(),
                ts: rfc3339_now(),
            });
        },
        &mut |line, guard| {
            let (progress, matched) = ctx.adapter.parse_progress(line);
            if !matched {
                return;
            }
            if let Some(percent) = progress.percent
                && last_percent != Some(percent)
            {
                last_percent = Some(percent);
                guard.mark_progress();
            }
            {
                let mut session = ctx.session.lock_unpoisoned();
                session.update_progress(job_id, progress.clone());
            }
            let now = Instant::now();
            let due = last_emit
                .is_none_or(|prev| now.duration_since(prev) >= PROGRESS_EMIT_FLOOR);
            if due {
                last_emit = Some(now);
                ctx.events.job_progress(&JobProgressPayload {
                    session_id: session_id.to_string(),
                    job_id: job_id.to_string(),
                    percent: progress.percent,
                    fps: progress.fps,
                    bitrate_kbps: progress.bitrate_kbps,
                    eta_sec: progress.eta_sec,
                    raw_line: progress.raw_line,
                });
            }
        },
    )
}

/// Terminal transition for jobs that never reached the spawn: skipped jobs,
/// pre-spawn failures, panics.
fn finish_without_run(
    ctx: &WorkerContext,
    job_id: &str,
    status: JobStatus,
    exit_code: Option<i32>,
    reason: &str,
) {
    let (session_id, final_output_path, snapshot) = {
        let mut session = ctx.session.lock_unpoisoned();
        session.deregister_job_token(job_id);
        session.mark_terminal(job_id, status, exit_code, reason);
        let final_output_path = session
            .jobs
            .iter()
            .find(|j| j.job_id == job_id)
            .map(|j| j.final_output_path.clone())
            .unwrap_or_default();
        (session.id.clone(), final_output_path, session.snapshot())
    };
    if status == JobStatus::Failed {
        ctx.events.error(&NoticePayload {
            session_id: Some(session_id.clone()),
            job_id: Some(job_id.to_string()),
            message: reason.to_string(),
            error: None,
        });
    }
    ctx.events.job_finished(&JobFinishedPayload {
        session_id,
        job_id: job_id.to_string(),
        status: status.as_str(),
        exit_code,
        error_message: reason.to_string(),
        final_output_path,
        retry_applied: false,
        retry_detail: String::new(),
    });
    ctx.events.session_state(&snapshot);
}

fn warn(ctx: &WorkerContext, session_id: &str, job_id: Option<&str>, message: &str) {
    ctx.events.warning(&NoticePayload {
        session_id: Some(session_id.to_string()),
        job_id: job_id.map(str::to_string),
        message: message.to_string(),
        error: None,
    });
}

fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_string()
}
