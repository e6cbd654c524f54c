//! The command executor: an external collaborator per spec §1/§4.5. The
//! core only requires something that can run a command string against a
//! persistent working directory and report exit code/stdout/stderr; this
//! module defines that trait and ships the obvious `std::process::Command`
//! based implementation so the crate is runnable without a caller-supplied
//! executor.
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::errors::Result;

pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub working_directory: String,
}

/// Stateful: a single executor instance tracks one session's current
/// working directory across calls, so `cd` persists (spec §4.5).
pub trait CommandExecutor: Send {
    fn run(&mut self, command: &str) -> Result<CommandOutcome>;
    fn cwd(&self) -> &str;
    /// Changes the tracked working directory directly, the same way a
    /// `cd` command would. Used to honor a SHELL_COMMAND's
    /// `workingDirectory` field before running its command (spec §4.5,
    /// §3's SHELL_COMMAND payload).
    fn set_cwd(&mut self, dir: &str) -> Result<()>;
}

/// Runs commands via `sh -c`, emulating `cd` in-process since each
/// `Command` invocation is a fresh child process that can't mutate our
/// cwd itself.
pub struct ShellExecutor {
    cwd: PathBuf,
}

impl ShellExecutor {
    pub fn new(initial_cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: initial_cwd.into(),
        }
    }

    fn handle_cd(&mut self, argument: &str) -> CommandOutcome {
        let target = if argument.is_empty() || argument == "~" {
            dirs_home()
        } else if Path::new(argument).is_absolute() {
            PathBuf::from(argument)
        } else {
            self.cwd.join(argument)
        };
        match std::fs::canonicalize(&target) {
            Ok(canonical) if canonical.is_dir() => {
                self.cwd = canonical;
                CommandOutcome {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                    working_directory: self.cwd.display().to_string(),
                }
            }
            _ => CommandOutcome {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("cd: no such directory: {}", argument),
                working_directory: self.cwd.display().to_string(),
            },
        }
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

impl CommandExecutor for ShellExecutor {
    fn run(&mut self, command: &str) -> Result<CommandOutcome> {
        let trimmed = command.trim();
        if let Some(argument) = trimmed.strip_prefix("cd ") {
            return Ok(self.handle_cd(argument.trim()));
        }
        if trimmed == "cd" {
            return Ok(self.handle_cd(""));
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .output()?;
        Ok(CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            working_directory: self.cwd.display().to_string(),
        })
    }

    fn cwd(&self) -> &str {
        self.cwd.to_str().unwrap_or("/")
    }

    fn set_cwd(&mut self, dir: &str) -> Result<()> {
        let outcome = self.handle_cd(dir);
        if outcome.exit_code != 0 {
            return Err(crate::errors::Error::Executor(outcome.stderr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_returns_expected_stdout() {
        let mut executor = ShellExecutor::new("/tmp");
        let outcome = executor.run("echo hello").unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "hello\n");
        assert_eq!(outcome.stderr, "");
        assert_eq!(outcome.working_directory, "/tmp");
    }

    #[test]
    fn cd_changes_subsequent_working_directory() {
        let mut executor = ShellExecutor::new("/tmp");
        let outcome = executor.run("cd /").unwrap();
        assert_eq!(outcome.working_directory, "/");
        let outcome = executor.run("pwd").unwrap();
        assert_eq!(outcome.stdout.trim(), "/");
    }

    #[test]
    fn nonzero_exit_code_is_reported() {
        let mut executor = ShellExecutor::new("/tmp");
        let outcome = executor.run("exit 7").unwrap();
        assert_eq!(outcome.exit_code, 7);
    }

    #[test]
    fn set_cwd_changes_directory_directly() {
        let mut executor = ShellExecutor::new("/tmp");
        executor.set_cwd("/").unwrap();
        assert_eq!(executor.cwd(), "/");
        let outcome = executor.run("pwd").unwrap();
        assert_eq!(outcome.stdout.trim(), "/");
    }

    #[test]
    fn set_cwd_into_missing_directory_errors() {
        let mut executor = ShellExecutor::new("/tmp");
        assert!(executor.set_cwd("/no/such/path").is_err());
        assert_eq!(executor.cwd(), "/tmp");
    }

    #[test]
    fn cd_into_missing_directory_reports_error_without_panicking() {
        let mut executor = ShellExecutor::new("/tmp");
        let outcome = executor.run("cd /no/such/path").unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.working_directory, "/tmp");
    }
}
