//! Activation journal and the final launch report.

use chrono::{DateTime, Utc};
use launchpad_process::OutputStream;
use serde::Serialize;

use crate::action::{Action, ActionId};

/// Per-activation lifecycle.
///
/// `Pending → EvaluatingCondition → {Skipped | Activated} → Running →
/// {Completed | Failed}`. Actions without a condition go straight from
/// `Pending` to `Activated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    EvaluatingCondition,
    Skipped,
    Activated,
    Running,
    Completed,
    Failed { reason: String },
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Skipped | ActionState::Completed | ActionState::Failed { .. }
        )
    }
}

/// One activation of one action. An action activated twice (a respawned
/// process, a handler body firing again) gets two records.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub seq: usize,
    pub action: ActionId,
    pub kind: &'static str,
    pub label: String,
    pub state: ActionState,
    pub history: Vec<ActionState>,
    /// Free-form outcome detail, e.g. a process's exit status.
    pub note: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionRecord {
    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            ActionState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    records: Vec<ActionRecord>,
}

impl Journal {
    pub(crate) fn open(&mut self, action: &Action) -> usize {
        let seq = self.records.len();
        self.records.push(ActionRecord {
            seq,
            action: action.id,
            kind: action.kind.name(),
            label: action.label(),
            state: ActionState::Pending,
            history: vec![ActionState::Pending],
            note: None,
            started_at: Utc::now(),
            finished_at: None,
        });
        seq
    }

    /// Move record `seq` to `state`. Transitions out of a terminal state are
    /// ignored.
    pub(crate) fn transition(&mut self, seq: usize, state: ActionState) {
        let Some(record) = self.records.get_mut(seq) else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }
        if state.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
        record.history.push(state.clone());
        record.state = state;
    }

    pub(crate) fn note(&mut self, seq: usize, note: impl Into<String>) {
        if let Some(record) = self.records.get_mut(seq) {
            record.note = Some(note.into());
        }
    }

    /// Record `action` as skipped without evaluating it.
    pub(crate) fn skip(&mut self, action: &Action, note: &str) {
        let seq = self.open(action);
        self.transition(seq, ActionState::Skipped);
        self.note(seq, note);
    }

    pub(crate) fn into_records(self) -> Vec<ActionRecord> {
        self.records
    }
}

/// Something that happened during the run, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEntry {
    /// An event was dispatched to handlers.
    Event {
        name: String,
        process: Option<String>,
    },
    /// A log action emitted a line.
    Log { line: String },
}

/// A failure recorded during the run: failed activations, failing handler
/// bodies and supervision errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportedError {
    pub kind: &'static str,
    pub message: String,
}

/// Output kept for a process whose output mode was `capture`.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedOutput {
    pub process: String,
    pub pid: u32,
    pub lines: Vec<(OutputStream, String)>,
}

/// Outcome of a launch.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub records: Vec<ActionRecord>,
    pub timeline: Vec<TimelineEntry>,
    pub errors: Vec<ReportedError>,
    pub shutdown_reason: Option<String>,
    /// The first failure under fail-fast.
    pub fatal: Option<String>,
    /// Processes had to be killed (grace elapsed or second interrupt).
    pub forced: bool,
    pub unused_arguments: Vec<String>,
    pub signals_sent: u32,
    pub captured: Vec<CapturedOutput>,
}

impl LaunchReport {
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_some() || self.forced {
            1
        } else {
            0
        }
    }

    pub fn log_lines(&self) -> Vec<&str> {
        self.timeline
            .iter()
            .filter_map(|e| match e {
                TimelineEntry::Log { line } => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<&str> {
        self.timeline
            .iter()
            .filter_map(|e| match e {
                TimelineEntry::Event { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Position in the timeline of the first entry matching `pred`.
    pub fn position(&self, pred: impl Fn(&TimelineEntry) -> bool) -> Option<usize> {
        self.timeline.iter().position(pred)
    }

    pub fn records_of(&self, kind: &str) -> Vec<&ActionRecord> {
        self.records.iter().filter(|r| r.kind == kind).collect()
    }

    pub fn records_for(&self, action: ActionId) -> Vec<&ActionRecord> {
        self.records.iter().filter(|r| r.action == action).collect()
    }

    pub fn captured_lines(&self, process: &str) -> Vec<&str> {
        self.captured
            .iter()
            .filter(|c| c.process == process)
            .flat_map(|c| c.lines.iter().map(|(_, line)| line.as_str()))
            .collect()
    }

    pub fn failures(&self) -> Vec<&ActionRecord> {
        self.records.iter().filter(|r| r.failure().is_some()).collect()
    }
}
