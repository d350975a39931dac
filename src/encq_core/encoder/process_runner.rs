//! Spawns the external encoder and supervises it: streams stderr lines in
//! order, enforces the two-stage liveness timeouts, and terminates the whole
//! process group on timeout or cancellation.

use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use crate::encq_core::cancel::CancellationToken;
use crate::encq_core::encoder::line_splitter::LineSplitter;
use crate::encq_core::encoder::process_group::{self, ProcessGroup};
use crate::encq_core::encoder::timeout_guard::TimeoutGuard;

#[derive(Debug, Clone, Default)]
pub(crate) struct RunResult {
    pub exit_code: i32,
    pub error_message: String,
    pub timed_out: bool,
    pub timeout_reason: String,
    pub cancelled: bool,
    pub used_job_object: bool,
}

pub(crate) struct RunSpec<'a> {
    pub executable: &'a str,
    pub argv: &'a [String],
    pub no_output_timeout: Duration,
    pub no_progress_timeout: Duration,
}

const LINE_POLL: Duration = Duration::from_millis(50);
const GUARD_TICK: Duration = Duration::from_secs(1);

/// Runs one encoder process to completion.
///
/// Every decoded stderr line feeds the guard and both callbacks, in child
/// emission order. `on_progress` is expected to run the progress parser and
/// call `TimeoutGuard::mark_progress` on new percentages. The reader thread
/// is joined before returning so callers observe all log lines.
pub(crate) fn run(
    spec: &RunSpec<'_>,
    cancel: &CancellationToken,
    on_log: &mut dyn FnMut(&str),
    on_progress: &mut dyn FnMut(&str, &TimeoutGuard),
) -> RunResult {
    let guard = Arc::new(TimeoutGuard::new(
        spec.no_output_timeout,
        spec.no_progress_timeout,
    ));

    let mut cmd = Command::new(spec.executable);
    cmd.args(spec.argv)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    process_group::prepare_command(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            return RunResult {
                exit_code: -1,
                error_message: format!("failed to spawn {}: {err}", spec.executable),
                ..RunResult::default()
            };
        }
    };

    let (group, used_job_object) = process_group::attach(&child);
    let mut pump = StderrPump::spawn(&mut child);

    let mut handle_line = |line: &str| {
        guard.mark_line();
        on_log(line);
        on_progress(line, &guard);
    };

    let mut last_guard_check = Instant::now();
    let outcome = loop {
        if let Some(line) = pump.recv_timeout(LINE_POLL) {
            handle_line(&line);
        }

        // Checked every iteration so an overwhelming child cannot starve
        // exit, cancellation, or timeout detection.
        match child.try_wait() {
            Ok(Some(status)) => break Outcome::Exited(status.code().unwrap_or(-1)),
            Ok(None) => {}
            Err(err) => break Outcome::WaitFailed(err.to_string()),
        }

        if cancel.is_cancelled() {
            break Outcome::Cancelled;
        }

        if last_guard_check.elapsed() >= GUARD_TICK {
            last_guard_check = Instant::now();
            if let Some(reason) = guard.timeout_reason() {
                break Outcome::TimedOut(reason);
            }
        }
    };

    let result = match outcome {
        Outcome::Exited(exit_code) => {
            pump.join();
            pump.drain(&mut handle_line);
            RunResult {
                exit_code,
                error_message: if exit_code == 0 {
                    String::new()
                } else {
                    format!("encoder exited with code {exit_code}")
                },
                used_job_object,
                ..RunResult::default()
            }
        }
        Outcome::TimedOut(reason) => {
            terminate_child(group.as_ref(), &mut child);
            pump.join();
            pump.drain(&mut handle_line);
            RunResult {
                exit_code: -1,
                error_message: format!("timeout: {reason}"),
                timed_out: true,
                timeout_reason: reason.to_string(),
                used_job_object,
                ..RunResult::default()
            }
        }
        Outcome::Cancelled => {
            terminate_child(group.as_ref(), &mut child);
            pump.join();
            pump.drain(&mut handle_line);
            RunResult {
                exit_code: -1,
                error_message: "cancelled".to_string(),
                cancelled: true,
                used_job_object,
                ..RunResult::default()
            }
        }
        Outcome::WaitFailed(message) => {
            terminate_child(group.as_ref(), &mut child);
            pump.join();
            pump.drain(&mut handle_line);
            RunResult {
                exit_code: -1,
                error_message: format!("wait failed: {message}"),
                used_job_object,
                ..RunResult::default()
            }
        }
    };

    result
}

enum Outcome {
    Exited(i32),
    TimedOut(&'static str),
    Cancelled,
    WaitFailed(String),
}

fn terminate_child(group: &dyn ProcessGroup, child: &mut Child) {
    if !group.terminate() {
        process_group::kill_fallback(child.id());
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Reader-thread pump: raw stderr bytes go through the CR/LF splitter and
/// each decoded line is forwarded over a channel to the supervising loop.
struct StderrPump {
    rx: Option<Receiver<String>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl StderrPump {
    fn spawn(child: &mut Child) -> Self {
        let Some(mut stderr) = child.stderr.take() else {
            return StderrPump {
                rx: None,
                join: None,
            };
        };

        let (tx, rx) = std::sync::mpsc::channel::<String>();
        let join = std::thread::Builder::new()
            .name("encq-stderr-reader".to_string())
            .spawn(move || {
                use std::io::Read as _;
                let mut splitter = LineSplitter::new();
                let mut buf = [0u8; 8192];
                loop {
                    let n = match stderr.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(_) => break,
                    };
                    splitter.feed(&buf[..n], |line| {
                        let _ = tx.send(line.to_string());
                    });
                }
                splitter.finish(|line| {
                    let _ = tx.send(line.to_string());
                });
            })
            .ok();

        StderrPump {
            rx: Some(rx),
            join,
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Option<String> {
        let Some(rx) = self.rx.as_ref() else {
            std::thread::sleep(timeout);
            return None;
        };
        match rx.recv_timeout(timeout) {
            Ok(line) => Some(line),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Hands over lines still buffered in the channel after the reader
    /// thread finished, preserving emission order.
    fn drain(&mut self, on_line: &mut impl FnMut(&str)) {
        let Some(rx) = self.rx.as_ref() else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(line) => on_line(&line),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn join(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
