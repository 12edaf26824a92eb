//! External command execution.
//!
//! Subprocesses spawn through [`run_logged`] so each one produces a `$ ...`
//! debug line and an entry in the command audit trail - there is exactly one
//! place that knows how a finished command gets reported. Gate commands need
//! a shell to interpret them; [`shell_command`] builds one for the platform.

use std::process::{Command, Output};
use std::time::Instant;

/// Build a `Command` that hands `command_line` to the platform shell.
///
/// Unix uses `sh -c`. Windows falls back to PowerShell; gate commands that
/// rely on POSIX syntax there need Git Bash first on PATH as `sh`.
pub fn shell_command(command_line: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command_line);
        cmd
    }

    #[cfg(windows)]
    {
        let mut cmd = Command::new("powershell.exe");
        cmd.arg("-Command").arg(command_line);
        cmd
    }
}

/// Render a command for logs: program plus arguments, space-joined.
pub fn display_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `cmd` to completion, logging under `scope` (`git:<checkout>`,
/// `resolve`, ...). The outcome goes to both the debug log and the audit
/// trail; spawn failures are debug-logged and returned to the caller.
pub fn run_logged(scope: &str, cmd: &mut Command) -> std::io::Result<Output> {
    let shown = display_command(cmd);
    log::debug!("$ {shown} [{scope}]");

    let started = Instant::now();
    let result = cmd.output();
    let elapsed = started.elapsed();

    match &result {
        Ok(output) => {
            log::debug!("  = {} in {}ms [{scope}]", output.status, elapsed.as_millis());
            crate::command_log::record(scope, None, &shown, output.status.code(), Some(elapsed));
        }
        Err(e) => {
            log::debug!("  ! {e} [{scope}]");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_interprets_the_command_line() {
        let out = shell_command("echo one && echo two").output().unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "one\ntwo\n");
    }

    #[test]
    fn display_joins_program_and_args() {
        let mut cmd = Command::new("git");
        cmd.args(["status", "--porcelain", "-b"]);
        assert_eq!(display_command(&cmd), "git status --porcelain -b");
    }

    #[test]
    fn run_logged_returns_the_output() {
        let out = run_logged("test", &mut shell_command("echo lumen")).unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "lumen");
    }

    #[test]
    fn run_logged_propagates_spawn_failures() {
        let mut cmd = Command::new("definitely-not-a-real-binary-lf");
        assert!(run_logged("test", &mut cmd).is_err());
    }
}
