//! Non-blocking external command execution
//!
//! Commands are argument vectors, never shell strings. While the child runs,
//! its stdout and stderr are drained concurrently by one reader future per
//! pipe, so a chatty child can never block on a full pipe buffer while we
//! wait for it to exit. Readers run to EOF, which picks up any output the
//! child wrote just before exiting.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

/// Errors starting or talking to a child process
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// What to do with the child's stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Log each line at info level as it arrives
    Log,
    /// Collect lines and hand them back to the caller
    Capture,
}

/// A program, its arguments and the directory to run it in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Lines of each stream kept for error reports
pub const OUTPUT_TAIL_LINES: usize = 40;

/// Outcome of running a command
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    /// Exit status; `None` when dry-run skipped execution
    pub status: Option<ExitStatus>,
    /// Captured stdout lines, in order. Empty in [`OutputMode::Log`].
    pub lines: Vec<String>,
    /// Last lines of stdout followed by the last lines of stderr, at most
    /// [`OUTPUT_TAIL_LINES`] of each, kept in both modes
    pub output_tail: Vec<String>,
}

impl CommandResult {
    /// True when the command exited zero or was not executed
    pub fn success(&self) -> bool {
        self.status.map_or(true, |s| s.success())
    }

    pub fn executed(&self) -> bool {
        self.status.is_some()
    }
}

/// Runs external commands, or only logs them in dry-run mode
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    dry_run: bool,
}

impl ProcessRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run `command` to completion. A non-zero exit is reported in the
    /// result, not as an error.
    pub async fn run(
        &self,
        command: &CommandLine,
        mode: OutputMode,
    ) -> Result<CommandResult, ProcessError> {
        if self.dry_run {
            info!("would run cmd: {}", command);
            return Ok(CommandResult::default());
        }

        info!("running cmd: {}", command);
        let label = command.to_string();

        let mut child = command
            .to_command()
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: label.clone(),
                source,
            })?;

        let io_error = |source| ProcessError::Io {
            command: label.clone(),
            source,
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_error(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_error(std::io::Error::other("stderr not captured")))?;

        let mut captured = Vec::new();
        let mut stdout_tail = Tail::new(OUTPUT_TAIL_LINES);
        let mut stderr_tail = Tail::new(OUTPUT_TAIL_LINES);

        let stdout_reader = drain_lines(BufReader::new(stdout), |line| {
            stdout_tail.push(&line);
            match mode {
                OutputMode::Log => info!("{}", line),
                OutputMode::Capture => captured.push(line),
            }
        });
        let stderr_reader = drain_lines(BufReader::new(stderr), |line| {
            error!("{}", line);
            stderr_tail.push(&line);
        });

        let (status, out, err) = tokio::join!(child.wait(), stdout_reader, stderr_reader);
        out.map_err(io_error)?;
        err.map_err(io_error)?;
        let status = status.map_err(io_error)?;

        debug!("returncode={:?} cmd: {}", status.code(), label);

        let mut output_tail = stdout_tail.into_vec();
        output_tail.extend(stderr_tail.into_vec());

        Ok(CommandResult {
            status: Some(status),
            lines: captured,
            output_tail,
        })
    }
}

/// Ring of the most recent lines of one stream
struct Tail {
    lines: VecDeque<String>,
    limit: usize,
}

impl Tail {
    fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(limit),
            limit,
        }
    }

    fn push(&mut self, line: &str) {
        if self.lines.len() == self.limit {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn into_vec(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Read `reader` to EOF, passing each line without its terminator to `sink`.
/// Invalid UTF-8 is replaced rather than treated as an error.
async fn drain_lines<R, F>(mut reader: R, mut sink: F) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(String),
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        sink(String::from_utf8_lossy(&buf).into_owned());
    }
}
