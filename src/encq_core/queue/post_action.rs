//! Post-complete action dispatch. Runs after `session_finished`, never for
//! aborted sessions; failures are reported as warnings upstream.

use std::process::Command;

use crate::encq_core::domain::PostAction;

pub(crate) fn execute_post_action(action: PostAction, custom_command: &str) -> Result<(), String> {
    match action {
        PostAction::None => Ok(()),
        PostAction::Shutdown => platform_shutdown(),
        PostAction::Sleep => platform_sleep(),
        PostAction::Custom => {
            let command = custom_command.trim();
            if command.is_empty() {
                return Err("custom post-complete command is empty".to_string());
            }
            spawn_shell(command)
        }
    }
}

#[cfg(windows)]
fn platform_shutdown() -> Result<(), String> {
    spawn_detached(Command::new("shutdown").args(["/s", "/t", "60"]))
}

#[cfg(windows)]
fn platform_sleep() -> Result<(), String> {
    spawn_detached(Command::new("rundll32").args(["powrprof.dll,SetSuspendState", "0,1,0"]))
}

#[cfg(windows)]
fn spawn_shell(command: &str) -> Result<(), String> {
    spawn_detached(Command::new("cmd").args(["/C", command]))
}

#[cfg(not(windows))]
fn platform_shutdown() -> Result<(), String> {
    spawn_detached(Command::new("systemctl").arg("poweroff"))
}

#[cfg(not(windows))]
fn platform_sleep() -> Result<(), String> {
    spawn_detached(Command::new("systemctl").arg("suspend"))
}

#[cfg(not(windows))]
fn spawn_shell(command: &str) -> Result<(), String> {
    spawn_detached(Command::new("sh").args(["-c", command]))
}

fn spawn_detached(cmd: &mut Command) -> Result<(), String> {
    cmd.spawn().map(|_| ()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_a_noop() {
        assert!(execute_post_action(PostAction::None, "").is_ok());
    }

    #[test]
    fn custom_requires_a_command() {
        let err = execute_post_action(PostAction::Custom, "  ").expect_err("must fail");
        assert!(err.contains("empty"));
    }

    #[cfg(unix)]
    #[test]
    fn custom_command_spawns() {
        execute_post_action(PostAction::Custom, "true").expect("spawn true");
    }
}
