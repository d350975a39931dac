use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

pub(crate) struct CapturedOutput {
    pub(crate) status: ExitStatus,
    pub(crate) timed_out: bool,
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
}

/// Runs a short-lived probe command, capturing stdout and stderr up to
/// `capture_limit` bytes each. The child is killed once `timeout` elapses.
pub(crate) fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    capture_limit: usize,
) -> Result<CapturedOutput, std::io::Error> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_handle = std::thread::spawn(move || capture_stream(stdout, capture_limit));
    let stderr_handle = std::thread::spawn(move || capture_stream(stderr, capture_limit));

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() >= timeout {
            timed_out = true;
            drop(child.kill());
            break child.wait()?;
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    Ok(CapturedOutput {
        status,
        timed_out,
        stdout: stdout_handle.join().unwrap_or_default(),
        stderr: stderr_handle.join().unwrap_or_default(),
    })
}

fn capture_stream<R: Read>(stream: Option<R>, capture_limit: usize) -> Vec<u8> {
    let Some(mut stream) = stream else {
        return Vec::new();
    };

    let mut captured: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if captured.len() < capture_limit {
            let remaining = capture_limit - captured.len();
            let to_copy = remaining.min(n);
            captured.extend_from_slice(&buf[..to_copy]);
        }
    }
    captured
}
