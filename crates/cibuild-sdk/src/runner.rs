//! External command execution
//!
//! Every step of a CI run shells out to some tool: the build tool, the
//! bootstrap script, `security`. All of them go through [`CommandRunner`] so
//! the sequencing logic can be exercised without Xcode installed.

use crate::types::CiError;
use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Stream the command's output to the console while it runs.
    pub echo: bool,
    /// Positions in `args` that must not appear in logs (passwords).
    pub redact: Vec<usize>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            echo: false,
            redact: Vec::new(),
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

    /// Appends an argument that is masked when the command is displayed.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.redact.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// `true` if the argument list contains `needle` as a whole argument.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.redact.contains(&i) {
                f.write_str(" ****")?;
            } else if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// A successful, silent result.
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Both streams, stdout first. Mirrors `2>&1` for output scanners.
    pub fn combined(&self) -> String {
        let mut all = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        all.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') && !self.stderr.is_empty() {
            all.push('\n');
        }
        all.push_str(&self.stderr);
        all
    }
}

/// Executes external commands.
///
/// An `Err` means the command could not be run at all; a command that ran
/// and failed is an `Ok` with a non-zero [`ToolOutput::code`].
pub trait CommandRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, CiError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, CiError> {
        (**self).run(cmd)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, CiError> {
        tracing::debug!(command = %cmd, "running");

        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.current_dir {
            command.current_dir(dir);
        }

        let spawn_err = |source| CiError::Spawn {
            program: cmd.program.clone(),
            source,
        };

        if !cmd.echo {
            let output = command.output().map_err(spawn_err)?;
            return Ok(ToolOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        // Drain stderr on its own thread so a chatty tool cannot block on a full pipe.
        let stderr_handle = child
            .stderr
            .take()
            .map(|stderr| std::thread::spawn(move || tee(stderr, std::io::stderr())));

        let stdout = child
            .stdout
            .take()
            .map(|out| tee(out, std::io::stdout()))
            .unwrap_or_default();

        let status = child.wait()?;
        let stderr = stderr_handle
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        Ok(ToolOutput {
            code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Copies `reader` to `sink` line by line and returns everything read.
///
/// Works on raw bytes: tool output is not guaranteed to be UTF-8. The pipe is
/// drained to EOF even if `sink` stops accepting writes.
fn tee<R: Read, W: Write>(reader: R, mut sink: W) -> Vec<u8> {
    let mut reader = BufReader::new(reader);
    let mut captured = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                let _ = sink.write_all(&line).and_then(|()| sink.flush());
                captured.extend_from_slice(&line);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "stopped reading tool output");
                break;
            }
        }
    }
    captured
}

/// Logs commands instead of running them; every command "succeeds" silently.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, CiError> {
        tracing::info!(command = %cmd, "dry run");
        Ok(ToolOutput::ok())
    }
}
