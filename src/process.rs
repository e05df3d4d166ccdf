//! Centralized command execution with consistent error handling.
//!
//! Every external tool the builder drives (multistrap, chroot, mount,
//! mksquashfs, the package manager scripts) is described by a [`Cmd`] and
//! executed through a [`Runner`]. The orchestrator only ever sees the
//! [`CommandResult`], so tests substitute a fake runner and never touch the
//! host.

use anyhow::{bail, Context, Result};
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout (empty for interactive runs).
    pub stdout: String,
    /// Captured stderr (empty for interactive runs).
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Executes a described command.
///
/// Implementations must not interpret the exit status; [`Cmd::run_on`]
/// applies the failure policy.
pub trait Runner {
    fn execute(&self, cmd: &Cmd) -> io::Result<CommandResult>;
}

/// Runs commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl Runner for HostRunner {
    fn execute(&self, cmd: &Cmd) -> io::Result<CommandResult> {
        let mut command = Command::new(cmd.program());
        command.args(cmd.arguments());

        if cmd.is_interactive() {
            command.stdin(Stdio::inherit());
            command.stdout(Stdio::inherit());
            command.stderr(Stdio::inherit());
            let status = command.status()?;
            return Ok(CommandResult {
                status,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let output = command.output()?;
        Ok(CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Builder for configuring command execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
    /// Inherit stdio instead of capturing.
    interactive: bool,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            allow_fail: false,
            error_prefix: None,
            interactive: false,
        }
    }

    /// `chroot <root> <program>`.
    pub fn chroot(root: &Path, program: impl AsRef<str>) -> Self {
        Self::new("chroot").arg_path(root).arg(program)
    }

    /// `sh -c <command>`.
    pub fn shell(command: impl AsRef<str>) -> Self {
        Self::new("sh").arg("-c").arg(command)
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Stream output to the terminal instead of capturing it.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Space-joined command line, for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run the command on the host.
    pub fn run(self) -> Result<CommandResult> {
        self.run_on(&HostRunner)
    }

    /// Run the command through `runner`, failing on non-zero exit unless
    /// [`Cmd::allow_fail`] was set.
    pub fn run_on(self, runner: &dyn Runner) -> Result<CommandResult> {
        log::debug!("exec: {}", self.command_line());

        let result = runner.execute(&self).with_context(|| {
            format!("Failed to execute '{}'. Is it installed?", self.program)
        })?;

        if !self.allow_fail && !result.success() {
            let prefix = match &self.error_prefix {
                Some(prefix) => prefix.clone(),
                None => format!("'{}' failed", self.command_line()),
            };

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }
}

// =============================================================================
// Tests
// =============================================================================
