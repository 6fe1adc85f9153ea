use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

// ─── Identifiers ──────────────────────────────────────────────────────────

/// Supervisor-assigned identifier of a spawned process.
///
/// Unlike the OS pid it is never reused within one supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

// ─── Output handling ──────────────────────────────────────────────────────

/// Where a child's stdout/stderr lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Forward each line to `tracing` at info level, tagged with the process name.
    #[default]
    Log,
    /// Print lines to the parent's stdout/stderr unchanged.
    Screen,
    /// Keep lines in the handle's buffer; retrievable on release.
    Capture,
    /// Don't open pipes at all.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

// ─── ExitStatus ───────────────────────────────────────────────────────────

/// How a child terminated. On Unix exactly one of `code` / `signal` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => write!(f, "signal {sig}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

// ─── ProcessSpec ──────────────────────────────────────────────────────────

/// Fully-resolved description of a process to spawn. All substitutions
/// have already been evaluated by the caller.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Human-readable name used in logs and events.
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// When set, the child's environment is exactly this map.
    pub env: Option<HashMap<String, String>>,
    /// Variables added on top of the inherited (or replaced) environment.
    pub additional_env: Vec<(String, String)>,
    /// Variables removed from the inherited environment.
    pub env_remove: Vec<String>,
    pub output: OutputMode,
}

impl ProcessSpec {
    /// Build a spec from an argv vector; `argv[0]` is the program.
    pub fn from_argv(name: impl Into<String>, argv: Vec<String>) -> crate::Result<Self> {
        let mut iter = argv.into_iter();
        let program = iter.next().ok_or(crate::SupervisorError::EmptyCommand)?;
        Ok(Self {
            name: name.into(),
            program,
            args: iter.collect(),
            cwd: None,
            env: None,
            additional_env: Vec::new(),
            env_remove: Vec::new(),
            output: OutputMode::default(),
        })
    }

    /// Run `command_line` through `sh -c`.
    pub fn shell(name: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: "sh".into(),
            args: vec!["-c".into(), command_line.into()],
            cwd: None,
            env: None,
            additional_env: Vec::new(),
            env_remove: Vec::new(),
            output: OutputMode::default(),
        }
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// The argv as it will be executed.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

// ─── SupervisorEvent ──────────────────────────────────────────────────────

/// Notifications produced by background process tasks.
///
/// These are the only values that cross from the asynchronous completion
/// path back into the owner of the [`ProcessSupervisor`](crate::ProcessSupervisor).
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Output {
        id: ProcessId,
        stream: OutputStream,
        line: String,
    },
    /// Sent exactly once per spawned process, after its output has drained.
    Exited {
        id: ProcessId,
        status: ExitStatus,
        /// Set when waiting on the child itself failed.
        error: Option<String>,
    },
}

impl SupervisorEvent {
    pub fn process_id(&self) -> ProcessId {
        match self {
            SupervisorEvent::Output { id, .. } | SupervisorEvent::Exited { id, .. } => *id,
        }
    }
}

/// Thread-safe handoff used by background tasks to report back.
pub type EventSink = Arc<dyn Fn(SupervisorEvent) + Send + Sync>;
