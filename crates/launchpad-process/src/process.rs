use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::types::{EventSink, ExitStatus, OutputMode, OutputStream, ProcessId, ProcessSpec, SupervisorEvent};
use crate::{Result, SupervisorError};

/// How long to keep draining pipes after the child itself has exited.
/// Grandchildren that inherited the pipes would otherwise hold the reader open.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

// ─── Executable lookup ────────────────────────────────────────────────────

/// Resolve `program` to an executable path.
///
/// Bare names are looked up on `PATH`; anything containing a path separator
/// is taken as given (relative to `cwd` when provided).
pub fn resolve_program(program: &str, cwd: Option<&Path>) -> Result<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let path = PathBuf::from(program);
        return Ok(match cwd {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        });
    }
    which::which(program).map_err(|source| SupervisorError::ExecutableNotFound {
        program: program.to_string(),
        source,
    })
}

// ─── Spawn ────────────────────────────────────────────────────────────────

/// Spawn the child described by `spec` and start its background tasks.
///
/// Returns the OS pid. One reader task per captured stream forwards lines
/// to `sink`; a waiter task reports [`SupervisorEvent::Exited`] once the
/// child has terminated and its pipes are drained.
pub(crate) fn spawn_child(id: ProcessId, spec: &ProcessSpec, sink: EventSink) -> Result<u32> {
    let exe = resolve_program(&spec.program, spec.cwd.as_deref())?;
    let mut cmd = build_command(&exe, spec);

    let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    // A child that exits instantly can be reaped before we ask; the pid is
    // only needed for signalling, which then becomes a no-op.
    let pid = child.id().unwrap_or(0);

    let stdout_task = child
        .stdout
        .take()
        .map(|s| tokio::spawn(forward_lines(s, id, OutputStream::Stdout, sink.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|s| tokio::spawn(forward_lines(s, id, OutputStream::Stderr, sink.clone())));

    tokio::spawn(async move {
        let (status, error) = match child.wait().await {
            Ok(status) => (ExitStatus::from(status), None),
            Err(e) => (
                ExitStatus {
                    code: None,
                    signal: None,
                },
                Some(format!("wait failed: {e}")),
            ),
        };

        for task in [stdout_task, stderr_task].into_iter().flatten() {
            let abort = task.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
                abort.abort();
            }
        }

        sink(SupervisorEvent::Exited { id, status, error });
    });

    Ok(pid)
}

async fn forward_lines<R>(reader: R, id: ProcessId, stream: OutputStream, sink: EventSink)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink(SupervisorEvent::Output { id, stream, line });
    }
}

fn build_command(exe: &Path, spec: &ProcessSpec) -> Command {
    let mut cmd = Command::new(exe);
    cmd.args(&spec.args);

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    if let Some(env) = &spec.env {
        cmd.env_clear();
        cmd.envs(env);
    }
    for key in &spec.env_remove {
        cmd.env_remove(key);
    }
    for (k, v) in &spec.additional_env {
        cmd.env(k, v);
    }

    cmd.stdin(Stdio::null());
    match spec.output {
        OutputMode::Discard => {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        _ => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }

    // Backstop for runs that end while a child is still alive.
    cmd.kill_on_drop(true);
    cmd
}

// ─── Signals ──────────────────────────────────────────────────────────────

/// Deliver `signal` to `pid`. Returns `Ok(false)` if the process no longer exists.
#[cfg(unix)]
pub(crate) fn send_signal(pid: u32, signal: i32) -> Result<bool> {
    if pid == 0 {
        return Ok(false);
    }
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(SupervisorError::Signal {
        pid,
        signal,
        source: err,
    })
}

#[cfg(not(unix))]
pub(crate) fn send_signal(_pid: u32, _signal: i32) -> Result<bool> {
    Err(SupervisorError::Unsupported)
}
