//! One `StartEncode` invocation: job table, counters, and the stop/abort
//! state machine. The whole struct lives behind a single mutex shared by the
//! manager and every worker.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::encq_core::cancel::CancellationToken;
use crate::encq_core::domain::{
    EncoderType, JobInput, JobStatus, Progress, QueueJob, SessionSnapshot, SessionState,
};

pub(crate) struct Session {
    pub id: String,
    pub encoder_type: EncoderType,
    pub state: SessionState,
    pub jobs: Vec<QueueJob>,
    pub stop_requested: bool,
    pub abort_requested: bool,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    running_jobs: u32,
    completed_jobs: u32,
    failed_jobs: u32,
    cancelled_jobs: u32,
    timeout_jobs: u32,
    skipped_jobs: u32,
    job_tokens: HashMap<String, CancellationToken>,
}

impl Session {
    pub(crate) fn new(id: String, jobs: &[JobInput], encoder_type: EncoderType) -> Self {
        Session {
            id,
            encoder_type,
            state: SessionState::Running,
            jobs: jobs
                .iter()
                .map(|j| QueueJob::new(j.job_id.clone(), j.input_path.clone()))
                .collect(),
            stop_requested: false,
            abort_requested: false,
            started_at: Utc::now(),
            finished_at: None,
            running_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            cancelled_jobs: 0,
            timeout_jobs: 0,
            skipped_jobs: 0,
            job_tokens: HashMap::new(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(
            self.state,
            SessionState::Running | SessionState::Stopping | SessionState::Aborting
        )
    }

    pub(crate) fn request_stop(&mut self) {
        if self.state == SessionState::Running {
            self.state = SessionState::Stopping;
        }
        self.stop_requested = true;
    }

    /// Abort fans out to every registered job token so in-flight runs die.
    pub(crate) fn request_abort(&mut self) {
        if matches!(self.state, SessionState::Running | SessionState::Stopping) {
            self.state = SessionState::Aborting;
        }
        self.abort_requested = true;
        for token in self.job_tokens.values() {
            token.cancel();
        }
    }

    pub(crate) fn register_job_token(&mut self, job_id: &str, token: CancellationToken) {
        // Abort may have already happened; a late registration must not
        // produce an uncancellable run.
        if self.abort_requested {
            token.cancel();
        }
        self.job_tokens.insert(job_id.to_string(), token);
    }

    pub(crate) fn deregister_job_token(&mut self, job_id: &str) {
        self.job_tokens.remove(job_id);
    }

    pub(crate) fn cancel_job(&mut self, job_id: &str) -> bool {
        match self.job_tokens.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn job_mut(&mut self, job_id: &str) -> Option<&mut QueueJob> {
        self.jobs.iter_mut().find(|j| j.job_id == job_id)
    }

    pub(crate) fn mark_running(&mut self, job_id: &str, worker_id: u32) {
        let now = rfc3339_now();
        let Some(job) = self.jobs.iter_mut().find(|j| j.job_id == job_id) else {
            return;
        };
        if job.status != JobStatus::Pending {
            return;
        }
        job.status = JobStatus::Running;
        job.worker_id = Some(worker_id);
        job.started_at = Some(now);
        self.running_jobs += 1;
    }

    pub(crate) fn update_progress(&mut self, job_id: &str, progress: Progress) {
        if let Some(job) = self.job_mut(job_id) {
            job.progress = progress;
        }
    }

    /// Terminal transition: updates the job record and the session counters.
    /// Terminal states are final; a second transition is ignored.
    pub(crate) fn mark_terminal(
        &mut self,
        job_id: &str,
        status: JobStatus,
        exit_code: Option<i32>,
        error_message: &str,
    ) {
        debug_assert!(status.is_terminal());
        let now = rfc3339_now();
        let Some(job) = self.jobs.iter_mut().find(|j| j.job_id == job_id) else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }
        if job.status == JobStatus::Running {
            self.running_jobs = self.running_jobs.saturating_sub(1);
        }
        job.status = status;
        job.exit_code = exit_code;
        job.error_message = error_message.to_string();
        job.finished_at = Some(now);

        match status {
            JobStatus::Completed => self.completed_jobs += 1,
            JobStatus::Failed => self.failed_jobs += 1,
            JobStatus::Cancelled => self.cancelled_jobs += 1,
            JobStatus::Timeout => self.timeout_jobs += 1,
            JobStatus::Skipped => self.skipped_jobs += 1,
            JobStatus::Pending | JobStatus::Running => {}
        }
    }

    /// Marks the session terminal once the worker pool has drained.
    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.state = if self.abort_requested {
            SessionState::Aborted
        } else {
            SessionState::Completed
        };
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let total = self.jobs.len() as u32;
        let terminal = self.completed_jobs
            + self.failed_jobs
            + self.cancelled_jobs
            + self.timeout_jobs
            + self.skipped_jobs;
        SessionSnapshot {
            session_id: self.id.clone(),
            state: self.state,
            encoder_type: self.encoder_type,
            started_at: self
                .started_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            finished_at: self
                .finished_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            total_jobs: total,
            pending_jobs: total.saturating_sub(terminal + self.running_jobs),
            running_jobs: self.running_jobs,
            completed_jobs: self.completed_jobs,
            failed_jobs: self.failed_jobs,
            cancelled_jobs: self.cancelled_jobs,
            timeout_jobs: self.timeout_jobs,
            skipped_jobs: self.skipped_jobs,
            stop_requested: self.stop_requested,
            abort_requested: self.abort_requested,
        }
    }
}

fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_jobs(n: usize) -> Session {
        let jobs: Vec<JobInput> = (0..n)
            .map(|i| JobInput {
                job_id: format!("j{i}"),
                input_path: format!("/in/{i}.mp4"),
            })
            .collect();
        Session::new("s_test".to_string(), &jobs, EncoderType::Nvencc)
    }

    fn assert_counter_invariant(session: &Session) {
        let s = session.snapshot();
        assert_eq!(
            s.pending_jobs
                + s.running_jobs
                + s.completed_jobs
                + s.failed_jobs
                + s.cancelled_jobs
                + s.timeout_jobs
                + s.skipped_jobs,
            s.total_jobs,
            "counter invariant violated"
        );
    }

    #[test]
    fn counters_hold_through_every_transition() {
        let mut session = session_with_jobs(5);
        assert_counter_invariant(&session);

        session.mark_running("j0", 0);
        session.mark_running("j1", 1);
        assert_counter_invariant(&session);

        session.mark_terminal("j0", JobStatus::Completed, Some(0), "");
        session.mark_terminal("j1", JobStatus::Failed, Some(1), "boom");
        session.mark_running("j2", 0);
        session.mark_terminal("j2", JobStatus::Timeout, Some(-1), "timeout: no output");
        session.mark_terminal("j3", JobStatus::Skipped, None, "stop requested");
        assert_counter_invariant(&session);

        let s = session.snapshot();
        assert_eq!(s.completed_jobs, 1);
        assert_eq!(s.failed_jobs, 1);
        assert_eq!(s.timeout_jobs, 1);
        assert_eq!(s.skipped_jobs, 1);
        assert_eq!(s.pending_jobs, 1);
        assert_eq!(s.running_jobs, 0);
    }

    #[test]
    fn terminal_job_transitions_are_final() {
        let mut session = session_with_jobs(1);
        session.mark_running("j0", 0);
        session.mark_terminal("j0", JobStatus::Completed, Some(0), "");
        session.mark_terminal("j0", JobStatus::Failed, Some(1), "late failure");
        let s = session.snapshot();
        assert_eq!(s.completed_jobs, 1);
        assert_eq!(s.failed_jobs, 0);
        assert_eq!(session.jobs[0].status, JobStatus::Completed);
    }

    #[test]
    fn stop_then_abort_walks_the_state_machine() {
        let mut session = session_with_jobs(1);
        assert_eq!(session.state, SessionState::Running);

        session.request_stop();
        assert_eq!(session.state, SessionState::Stopping);
        assert!(session.stop_requested);

        session.request_abort();
        assert_eq!(session.state, SessionState::Aborting);
        assert!(session.abort_requested);

        session.finish();
        assert_eq!(session.state, SessionState::Aborted);
        assert!(!session.is_active());
    }

    #[test]
    fn finish_without_abort_completes() {
        let mut session = session_with_jobs(1);
        session.mark_terminal("j0", JobStatus::Completed, Some(0), "");
        session.finish();
        assert_eq!(session.state, SessionState::Completed);
        assert!(session.snapshot().finished_at.is_some());
    }

    #[test]
    fn abort_cancels_registered_tokens_and_late_registrations() {
        let mut session = session_with_jobs(2);
        let early = CancellationToken::new();
        session.register_job_token("j0", early.clone());
        session.request_abort();
        assert!(early.is_cancelled());

        let late = CancellationToken::new();
        session.register_job_token("j1", late.clone());
        assert!(late.is_cancelled(), "late registration must arrive cancelled");
    }

    #[test]
    fn cancel_job_targets_one_token() {
        let mut session = session_with_jobs(2);
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        session.register_job_token("j0", a.clone());
        session.register_job_token("j1", b.clone());
        assert!(session.cancel_job("j0"));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!session.cancel_job("missing"));
    }
}
