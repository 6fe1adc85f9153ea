//! Events flowing through the launch event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use launchpad_process::{ExitStatus, OutputStream, ProcessId};

use crate::action::ActionId;

/// Identity of a process as seen by event handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: ProcessId,
    /// The execute-process action that spawned it.
    pub action: ActionId,
    pub name: String,
    pub pid: u32,
    pub cmd: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ProcessStarted {
        process: ProcessInfo,
    },
    ProcessExited {
        process: ProcessInfo,
        status: ExitStatus,
    },
    ProcessOutput {
        process: ProcessInfo,
        stream: OutputStream,
        text: String,
    },
    ShutdownRequested {
        reason: String,
        due_to_signal: bool,
    },
    TimerElapsed {
        timer: u64,
    },
    /// Collaborator-defined event, matched structurally by handlers.
    Custom {
        kind: String,
        payload: serde_json::Value,
    },
}

/// An immutable, timestamped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self { kind, at: Utc::now() }
    }

    pub fn custom(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(EventKind::Custom {
            kind: kind.into(),
            payload,
        })
    }

    pub fn shutdown(reason: impl Into<String>) -> Self {
        Self::new(EventKind::ShutdownRequested {
            reason: reason.into(),
            due_to_signal: false,
        })
    }

    /// Short tag for logging.
    pub fn name(&self) -> &str {
        match &self.kind {
            EventKind::ProcessStarted { .. } => "process_started",
            EventKind::ProcessExited { .. } => "process_exited",
            EventKind::ProcessOutput { .. } => "process_output",
            EventKind::ShutdownRequested { .. } => "shutdown_requested",
            EventKind::TimerElapsed { .. } => "timer_elapsed",
            EventKind::Custom { kind, .. } => kind,
        }
    }

    /// The process this event concerns, if any.
    pub fn process(&self) -> Option<&ProcessInfo> {
        match &self.kind {
            EventKind::ProcessStarted { process }
            | EventKind::ProcessExited { process, .. }
            | EventKind::ProcessOutput { process, .. } => Some(process),
            _ => None,
        }
    }
}
