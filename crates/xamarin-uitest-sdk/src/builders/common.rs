//! Common utilities shared by the builder, the restorer and the test runner.
//!
//! ## Features
//!
//! - **Blocking process execution with an optional timeout** - Every external
//!   invocation goes through [`run_process`], which captures stdout/stderr and
//!   kills the child once its deadline passes
//! - **Printable commands** - What gets logged is exactly what gets spawned
//! - **Deterministic artifact discovery** - [`find_first_artifact`] walks the
//!   output tree depth-first in lexicographic order
//! - **Path normalization** - Project files use `\` separators; the host may not

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::types::UiTestError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured result of one finished (or killed) child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Whether the child was killed because it exceeded its timeout.
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// One-line description of how the process ended.
    pub fn status_line(&self) -> String {
        if self.timed_out {
            return format!("timed out after {:.1}s", self.elapsed.as_secs_f64());
        }
        match self.exit_code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    /// Last `lines` lines of stdout and stderr, for error messages.
    pub fn tail(&self, lines: usize) -> String {
        let tail_of = |text: &str| {
            let all: Vec<&str> = text.lines().collect();
            all[all.len().saturating_sub(lines)..].join("\n")
        };
        format!(
            "Stdout (tail):\n{}\n\nStderr (tail):\n{}",
            tail_of(&self.stdout),
            tail_of(&self.stderr)
        )
    }
}

/// Renders a command the way it would be typed into a shell.
pub fn printable_command(cmd: &Command) -> String {
    let quote = |part: &OsStr| {
        let part = part.to_string_lossy();
        if part.is_empty() || part.contains(char::is_whitespace) {
            format!("\"{}\"", part)
        } else {
            part.into_owned()
        }
    };

    std::iter::once(quote(cmd.get_program()))
        .chain(cmd.get_args().map(quote))
        .collect::<Vec<_>>()
        .join(" ")
}

/// How a child's output lines are mirrored to the log while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputEcho {
    /// Every line at `debug`.
    #[default]
    Quiet,
    /// stdout at `info`, stderr at `warn`, as the lines arrive.
    Live,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs `cmd` to completion, capturing its output and echoing it line by line.
///
/// With a `timeout`, the child is polled and its whole process group killed
/// once the deadline passes; the returned [`ProcessOutput`] then has
/// `timed_out` set. Without one, the call blocks until the child exits.
///
/// Descendants that outlive the child and keep its pipes open (build server
/// nodes, backgrounded helpers) do not block the call: output is collected
/// until the pipes close or stay silent for [`DRAIN_IDLE`].
///
/// Only a failure to *start* the process is an `Err`; a non-zero exit is
/// reported through [`ProcessOutput::exit_code`].
pub fn run_process(
    mut cmd: Command,
    timeout: Option<Duration>,
    echo: OutputEcho,
) -> std::io::Result<ProcessOutput> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let started_at = Instant::now();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (sender, lines) = mpsc::channel();
    drain(child.stdout.take(), Stream::Stdout, echo, sender.clone());
    drain(child.stderr.take(), Stream::Stderr, echo, sender);

    let (status, timed_out) = wait_for_child(&mut child, timeout, started_at)?;

    let mut stdout = String::new();
    let mut stderr = String::new();
    while let Ok((stream, line)) = lines.recv_timeout(DRAIN_IDLE) {
        let buffer = match stream {
            Stream::Stdout => &mut stdout,
            Stream::Stderr => &mut stderr,
        };
        buffer.push_str(&line);
        buffer.push('\n');
    }

    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        timed_out,
        elapsed: started_at.elapsed(),
    })
}

/// How long output may stay silent after the child exited before collection stops.
pub const DRAIN_IDLE: Duration = Duration::from_secs(1);

fn drain<R: Read + Send + 'static>(
    pipe: Option<R>,
    stream: Stream,
    echo: OutputEcho,
    sender: mpsc::Sender<(Stream, String)>,
) {
    let Some(pipe) = pipe else {
        return;
    };
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            match (echo, stream) {
                (OutputEcho::Quiet, _) => tracing::debug!("{}", line),
                (OutputEcho::Live, Stream::Stdout) => tracing::info!("{}", line),
                (OutputEcho::Live, Stream::Stderr) => tracing::warn!("{}", line),
            }
            if sender.send((stream, line)).is_err() {
                break;
            }
        }
    });
}

fn wait_for_child(
    child: &mut Child,
    timeout: Option<Duration>,
    started_at: Instant,
) -> std::io::Result<(ExitStatus, bool)> {
    let Some(timeout) = timeout else {
        return Ok((child.wait()?, false));
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if started_at.elapsed() >= timeout {
            kill_process_group(child);
            let status = child.wait()?;
            return Ok((status, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kills the child and every process in its group.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Ok(pgid) = i32::try_from(child.id()) {
        // SAFETY: plain syscall; the group was created for this child by `process_group(0)`.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

/// Runs an external command and treats anything but exit status 0 as failure.
///
/// The error string is actionable: it names the command, how it ended and the
/// tail of its output. Callers wrap it in the error variant of their step.
pub fn run_command(
    cmd: Command,
    description: &str,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, String> {
    let printable = printable_command(&cmd);
    let output = run_process(cmd, timeout, OutputEcho::Live).map_err(|e| {
        format!(
            "Failed to start {}.\n\n\
             Command: {}\n\
             Error: {}\n\n\
             Ensure the tool is installed and the configured path is correct.",
            description, printable, e
        )
    })?;

    if !output.success() {
        return Err(format!(
            "{} failed ({}).\n\nCommand: {}\n\n{}",
            description,
            output.status_line(),
            printable,
            output.tail(20)
        ));
    }
    Ok(output)
}

/// Converts a path written with either separator convention to a host path.
///
/// ```
/// use std::path::PathBuf;
/// use xamarin_uitest_sdk::builders::common::host_path;
///
/// let expected: PathBuf = ["..", "Core", "Core.csproj"].iter().collect();
/// assert_eq!(host_path(r"..\Core\Core.csproj"), expected);
/// assert_eq!(host_path("../Core/Core.csproj"), expected);
/// ```
pub fn host_path(raw: &str) -> PathBuf {
    raw.trim()
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .fold(
            if raw.trim().starts_with('/') {
                PathBuf::from("/")
            } else {
                PathBuf::new()
            },
            |acc, part| acc.join(part),
        )
}

/// Lexically resolves `.` and `..` components without touching the file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Makes `path` absolute against the current directory, then normalizes it.
pub fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize_path(path));
    }
    Ok(normalize_path(&std::env::current_dir()?.join(path)))
}

/// Finds the first file with `extension` under `search_dir`.
///
/// The tree is walked depth-first with entries of each directory visited in
/// lexicographic file-name order, so the result does not depend on the host
/// file system's enumeration order. The match is returned canonicalized.
///
/// # Errors
///
/// [`UiTestError::ArtifactNotFound`] when the directory is missing or holds
/// no matching file.
pub fn find_first_artifact(search_dir: &Path, extension: &str) -> Result<PathBuf, UiTestError> {
    let not_found = || UiTestError::ArtifactNotFound {
        search_dir: search_dir.to_path_buf(),
        extension: extension.to_string(),
    };

    if !search_dir.is_dir() {
        return Err(not_found());
    }

    let found = WalkDir::new(search_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        })
        .ok_or_else(not_found)?;

    let canonical = found.path().canonicalize().map_err(|_| not_found())?;
    if !canonical.is_file() {
        return Err(not_found());
    }
    Ok(canonical)
}
