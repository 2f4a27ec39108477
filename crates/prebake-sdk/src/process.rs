//! External tool invocation.
//!
//! Every subprocess the pipeline starts (xcodebuild, lipo, hook commands) is
//! described by a [`ToolCommand`] and executed through a [`ProcessRunner`].
//! Keeping a single seam lets tests substitute a runner that records
//! invocations and fabricates build outputs on disk.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::types::PrebakeError;

/// A typed description of one external tool invocation.
///
/// # Example
///
/// ```
/// use prebake_sdk::process::ToolCommand;
///
/// let cmd = ToolCommand::new("lipo")
///     .arg("-create")
///     .arg("-output")
///     .arg_path("build/Alamofire".as_ref());
/// assert_eq!(cmd.program(), "lipo");
/// assert_eq!(cmd.to_string(), "lipo -create -output build/Alamofire");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Returns the value following `flag` in the argument list, if any.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Returns the value of a `KEY=VALUE` build setting argument, if any.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.args.iter().find_map(|a| {
            a.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes tool commands synchronously.
///
/// Implementations must return [`PrebakeError::ToolInvocation`] for non-zero
/// exits so the orchestrator can abort the run.
pub trait ProcessRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, PrebakeError>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, PrebakeError> {
        (**self).run(command)
    }
}

/// Runs commands as real subprocesses, capturing their output.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    verbose: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo captured stdout at debug level after each command.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, PrebakeError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.envs {
            cmd.env(key, value);
        }

        debug!(command = %command, "running tool");

        let output = cmd.output().map_err(|e| PrebakeError::ToolInvocation {
            tool: command.to_string(),
            status: None,
            output: format!(
                "Failed to start {}: {}\n\n\
                 Ensure the tool is installed and available on PATH \
                 (xcodebuild and lipo ship with the Xcode command line tools).",
                command.program, e
            ),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(PrebakeError::ToolInvocation {
                tool: command.to_string(),
                status: output.status.code(),
                output: format!("Stdout:\n{}\n\nStderr:\n{}", stdout, stderr),
            });
        }

        if self.verbose && !stdout.is_empty() {
            debug!(program = %command.program, stdout = %stdout, "tool output");
        }

        Ok(ToolOutput { stdout, stderr })
    }
}
