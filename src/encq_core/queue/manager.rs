//! Session manager: owns the active session, the worker pool, the overwrite
//! reply channels, and the crash-recovery temp index.

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::encq_core::domain::{
    OverwriteDecision, SessionSnapshot, StartEncodeRequest, validate_app_config, validate_profile,
};
use crate::encq_core::error::EncqError;
use crate::encq_core::events::{EventHub, NoticePayload};
use crate::encq_core::ids::{session_id, short_id};
use crate::encq_core::paths::DataPaths;
use crate::encq_core::queue::post_action::execute_post_action;
use crate::encq_core::queue::resolver::OutputResolver;
use crate::encq_core::queue::session::Session;
use crate::encq_core::queue::temp_index::TempArtifactIndex;
use crate::encq_core::queue::worker::{WorkerContext, worker_loop};
use crate::encq_core::encoder::Registry;
use crate::sync_ext::MutexExt;

/// Single-slot reply channels for pending overwrite questions, keyed by job
/// id. Delivering a decision with no pending wait is a no-op.
#[derive(Default)]
pub(crate) struct OverwriteWaiters {
    senders: Mutex<HashMap<String, SyncSender<OverwriteDecision>>>,
}

impl OverwriteWaiters {
    /// Opens the single-slot reply channel for a job. Must happen before the
    /// `job_needs_overwrite` event goes out so a prompt answer cannot race
    /// the registration.
    pub(crate) fn register(&self, job_id: &str) -> std::sync::mpsc::Receiver<OverwriteDecision> {
        let (tx, rx) = sync_channel(1);
        self.senders
            .lock_unpoisoned()
            .insert(job_id.to_string(), tx);
        rx
    }

    /// Blocks the calling worker until a decision arrives; the deadline
    /// resolves to `skip` so an unattended queue keeps moving.
    pub(crate) fn await_decision(
        &self,
        job_id: &str,
        rx: std::sync::mpsc::Receiver<OverwriteDecision>,
        timeout: Duration,
    ) -> OverwriteDecision {
        let decision = rx.recv_timeout(timeout).unwrap_or(OverwriteDecision::Skip);
        self.senders.lock_unpoisoned().remove(job_id);
        decision
    }

    pub(crate) fn resolve(&self, job_id: &str, decision: OverwriteDecision) -> bool {
        let senders = self.senders.lock_unpoisoned();
        match senders.get(job_id) {
            Some(tx) => !matches!(tx.try_send(decision), Err(TrySendError::Disconnected(_))),
            None => false,
        }
    }

    /// Session abort resolves every pending wait with the abort outcome.
    pub(crate) fn abort_all(&self) {
        let senders = self.senders.lock_unpoisoned();
        for tx in senders.values() {
            let _ = tx.try_send(OverwriteDecision::Abort);
        }
    }
}

struct ActiveSession {
    session: Arc<Mutex<Session>>,
    overwrites: Arc<OverwriteWaiters>,
}

pub(crate) struct QueueManager {
    registry: Registry,
    events: EventHub,
    temp_index: Arc<TempArtifactIndex>,
    paths: DataPaths,
    active: Mutex<Option<ActiveSession>>,
}

impl QueueManager {
    pub(crate) fn new(events: EventHub, paths: DataPaths) -> Self {
        let temp_index = Arc::new(TempArtifactIndex::load(paths.temp_index_path()));
        QueueManager {
            registry: Registry::with_default_adapters(),
            events,
            temp_index,
            paths,
            active: Mutex::new(None),
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Validates the request, constructs the session, and fans out the
    /// worker pool. Fails with `SessionRunning` while a session is active.
    pub(crate) fn start_encode(
        &self,
        req: &StartEncodeRequest,
        encoder_path: &str,
    ) -> Result<SessionSnapshot, EncqError> {
        let config_errs = validate_app_config(&req.app_config_snapshot);
        if !config_errs.is_empty() {
            return Err(EncqError::validation(config_errs));
        }
        let profile_errs = validate_profile(&req.profile);
        if !profile_errs.is_empty() {
            return Err(EncqError::validation(profile_errs));
        }
        if req.jobs.is_empty() {
            return Err(EncqError::validation_field(
                "jobs",
                "at least one job is required",
            ));
        }
        let adapter = self.registry.resolve(req.profile.encoder_type)?;
        if encoder_path.trim().is_empty() {
            return Err(EncqError::ToolNotFound(format!(
                "encoder path not configured for {}",
                req.profile.encoder_type.as_str()
            )));
        }

        let mut active = self.active.lock_unpoisoned();
        if let Some(current) = active.as_ref()
            && current.session.lock_unpoisoned().is_active()
        {
            return Err(EncqError::SessionRunning);
        }

        let mut jobs = req.jobs.clone();
        for job in &mut jobs {
            if job.job_id.trim().is_empty() {
                job.job_id = format!("job_{}", short_id(8));
            }
        }

        let session = Arc::new(Mutex::new(Session::new(
            session_id(),
            &jobs,
            req.profile.encoder_type,
        )));
        let overwrites = Arc::new(OverwriteWaiters::default());
        let resolver = Arc::new(OutputResolver::new());

        // Bounded channel sized to the job count; everything is enqueued up
        // front and the sender dropped, so workers drain until disconnect.
        let (tx, rx) = sync_channel::<String>(jobs.len());
        for job in &jobs {
            let _ = tx.send(job.job_id.clone());
        }
        drop(tx);
        let rx = Arc::new(Mutex::new(rx));

        let snapshot = session.lock_unpoisoned().snapshot();
        self.events.session_started(&snapshot);

        let worker_count = req.app_config_snapshot.max_concurrent_jobs.max(1) as usize;
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let ctx = WorkerContext {
                worker_id: worker_id as u32,
                session: session.clone(),
                adapter: adapter.clone(),
                resolver: resolver.clone(),
                temp_index: self.temp_index.clone(),
                events: self.events.clone(),
                overwrites: overwrites.clone(),
                profile: req.profile.clone(),
                config: req.app_config_snapshot.clone(),
                encoder_path: encoder_path.to_string(),
                paths: self.paths.clone(),
            };
            let rx = rx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("encq-worker-{worker_id}"))
                .spawn(move || worker_loop(&ctx, &rx));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    crate::debug_eprintln!("failed to spawn worker thread: {err}");
                }
            }
        }

        // Completion monitor: join the pool, finish the session, fire the
        // post-complete hook only when not aborted.
        {
            let session = session.clone();
            let events = self.events.clone();
            let post_action = req.app_config_snapshot.post_complete_action;
            let post_command = req.app_config_snapshot.post_complete_command.clone();
            let spawned = std::thread::Builder::new()
                .name("encq-session-monitor".to_string())
                .spawn(move || {
                    for handle in handles {
                        let _ = handle.join();
                    }
                    let (snapshot, aborted) = {
                        let mut session = session.lock_unpoisoned();
                        session.finish();
                        (session.snapshot(), session.abort_requested)
                    };
                    events.session_finished(&snapshot);
                    if !aborted
                        && let Err(err) = execute_post_action(post_action, &post_command)
                    {
                        events.warning(&NoticePayload {
                            session_id: Some(snapshot.session_id.clone()),
                            job_id: None,
                            message: format!("post-complete action failed: {err}"),
                            error: None,
                        });
                    }
                });
            if let Err(err) = spawned {
                crate::debug_eprintln!("failed to spawn session monitor: {err}");
            }
        }

        *active = Some(ActiveSession {
            session,
            overwrites,
        });
        Ok(snapshot)
    }

    pub(crate) fn request_graceful_stop(&self, session_id: &str) -> Result<(), EncqError> {
        let active = self.active.lock_unpoisoned();
        let current = find_session(&active, session_id)?;
        let snapshot = {
            let mut session = current.session.lock_unpoisoned();
            session.request_stop();
            session.snapshot()
        };
        drop(active);
        self.events.session_state(&snapshot);
        Ok(())
    }

    /// Abort: cancels every in-flight job token and resolves outstanding
    /// overwrite waits with the abort outcome.
    pub(crate) fn request_abort(&self, session_id: &str) -> Result<(), EncqError> {
        let active = self.active.lock_unpoisoned();
        let current = find_session(&active, session_id)?;
        let snapshot = {
            let mut session = current.session.lock_unpoisoned();
            session.request_abort();
            session.snapshot()
        };
        current.overwrites.abort_all();
        drop(active);
        self.events.session_state(&snapshot);
        Ok(())
    }

    pub(crate) fn cancel_job(&self, session_id: &str, job_id: &str) -> Result<(), EncqError> {
        let active = self.active.lock_unpoisoned();
        let current = find_session(&active, session_id)?;
        current.session.lock_unpoisoned().cancel_job(job_id);
        Ok(())
    }

    /// Delivers a pending overwrite decision; a no-op when no wait is
    /// pending for the job.
    pub(crate) fn resolve_overwrite(
        &self,
        session_id: &str,
        job_id: &str,
        decision: OverwriteDecision,
    ) -> Result<(), EncqError> {
        let active = self.active.lock_unpoisoned();
        let current = find_session(&active, session_id)?;
        current.overwrites.resolve(job_id, decision);
        Ok(())
    }

    pub(crate) fn current_session(&self) -> Option<SessionSnapshot> {
        let active = self.active.lock_unpoisoned();
        active
            .as_ref()
            .map(|current| current.session.lock_unpoisoned().snapshot())
    }

    pub(crate) fn list_temp_artifacts(&self) -> Vec<String> {
        self.temp_index.list_existing()
    }

    pub(crate) fn cleanup_temp_artifacts(&self, paths: &[String]) {
        for path in paths {
            let p = Path::new(path);
            if p.exists()
                && let Err(err) = std::fs::remove_file(p)
            {
                self.events.warning(&NoticePayload {
                    session_id: None,
                    job_id: None,
                    message: format!("failed to cleanup temp file {path}: {err}"),
                    error: None,
                });
            }
            self.temp_index.remove(p);
        }
    }
}

fn find_session<'a>(
    active: &'a Option<ActiveSession>,
    session_id: &str,
) -> Result<&'a ActiveSession, EncqError> {
    match active.as_ref() {
        Some(current) if current.session.lock_unpoisoned().id == session_id => Ok(current),
        _ => Err(EncqError::validation_field("session_id", "session not found")),
    }
}
