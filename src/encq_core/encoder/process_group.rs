//! Platform process-group termination: kill the encoder and every helper it
//! spawned in one operation.
//!
//! Windows uses a per-run Job Object with kill-on-handle-close so children
//! die even if this process is force-killed. POSIX starts the child in its
//! own process group and signals the whole group.

use std::process::{Child, Command};

pub(crate) trait ProcessGroup: Send {
    /// Best-effort termination of the child and all of its descendants.
    fn terminate(&self) -> bool;
}

pub(crate) struct NoopProcessGroup;

impl ProcessGroup for NoopProcessGroup {
    fn terminate(&self) -> bool {
        false
    }
}

/// Pre-spawn setup. On POSIX the child must enter its own process group
/// before exec; on Windows nothing is needed here.
pub(crate) fn prepare_command(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Post-spawn attach. Returns the group handle and whether the platform
/// attach actually succeeded; callers record the flag and fall back to
/// `kill_fallback` when termination through the handle fails.
pub(crate) fn attach(child: &Child) -> (Box<dyn ProcessGroup>, bool) {
    platform_attach(child)
}

/// Last-resort kill when the group handle is unavailable or failed:
/// `taskkill /F /T` on Windows, SIGKILL to the process group on POSIX.
pub(crate) fn kill_fallback(pid: u32) {
    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .status();
    }
    #[cfg(unix)]
    {
        unsafe {
            // The child was started as its own group leader, so the negative
            // pid addresses the whole group.
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = pid;
    }
}

#[cfg(unix)]
fn platform_attach(child: &Child) -> (Box<dyn ProcessGroup>, bool) {
    (
        Box::new(PosixProcessGroup {
            pgid: child.id() as libc::pid_t,
        }),
        true,
    )
}

#[cfg(unix)]
struct PosixProcessGroup {
    pgid: libc::pid_t,
}

#[cfg(unix)]
impl ProcessGroup for PosixProcessGroup {
    fn terminate(&self) -> bool {
        unsafe { libc::kill(-self.pgid, libc::SIGKILL) == 0 }
    }
}

#[cfg(windows)]
fn platform_attach(child: &Child) -> (Box<dyn ProcessGroup>, bool) {
    match WindowsJobObject::assign(child.id()) {
        Some(job) => (Box::new(job), true),
        None => (Box::new(NoopProcessGroup), false),
    }
}

#[cfg(not(any(unix, windows)))]
fn platform_attach(_child: &Child) -> (Box<dyn ProcessGroup>, bool) {
    (Box::new(NoopProcessGroup), false)
}

#[cfg(windows)]
struct WindowsJobObject {
    handle: isize,
}

// The raw handle value is valid from any thread until CloseHandle.
#[cfg(windows)]
unsafe impl Send for WindowsJobObject {}

#[cfg(windows)]
impl WindowsJobObject {
    fn assign(pid: u32) -> Option<Self> {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::JobObjects::{
            AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
            JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
            SetInformationJobObject,
        };
        use windows::Win32::System::Threading::{OpenProcess, PROCESS_ALL_ACCESS};

        unsafe {
            let job_handle = match CreateJobObjectW(None, None) {
                Ok(h) if !h.is_invalid() => h,
                _ => return None,
            };

            let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
            info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
            if SetInformationJobObject(
                job_handle,
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const std::ffi::c_void,
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
            .is_err()
            {
                let _ = CloseHandle(job_handle);
                return None;
            }

            let process_handle = match OpenProcess(PROCESS_ALL_ACCESS, false, pid) {
                Ok(h) if !h.is_invalid() => h,
                _ => {
                    let _ = CloseHandle(job_handle);
                    return None;
                }
            };

            let assigned = AssignProcessToJobObject(job_handle, process_handle).is_ok();
            let _ = CloseHandle(process_handle);
            if !assigned {
                let _ = CloseHandle(job_handle);
                return None;
            }

            Some(WindowsJobObject {
                handle: job_handle.0 as isize,
            })
        }
    }
}

#[cfg(windows)]
impl ProcessGroup for WindowsJobObject {
    fn terminate(&self) -> bool {
        use windows::Win32::Foundation::HANDLE;
        use windows::Win32::System::JobObjects::TerminateJobObject;
        unsafe {
            TerminateJobObject(HANDLE(self.handle as *mut std::ffi::c_void), 1).is_ok()
        }
    }
}

#[cfg(windows)]
impl Drop for WindowsJobObject {
    fn drop(&mut self) {
        use windows::Win32::Foundation::{CloseHandle, HANDLE};
        unsafe {
            let _ = CloseHandle(HANDLE(self.handle as *mut std::ffi::c_void));
        }
    }
}
