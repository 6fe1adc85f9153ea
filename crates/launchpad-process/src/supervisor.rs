use std::collections::BTreeMap;

use crate::process::{send_signal, spawn_child};
use crate::types::{EventSink, ExitStatus, OutputMode, OutputStream, ProcessId, ProcessSpec, SupervisorEvent};
use crate::{Result, SupervisorError};

#[cfg(unix)]
pub const SIGTERM: i32 = libc::SIGTERM;
#[cfg(unix)]
pub const SIGKILL: i32 = libc::SIGKILL;
#[cfg(unix)]
pub const SIGINT: i32 = libc::SIGINT;
#[cfg(not(unix))]
pub const SIGTERM: i32 = 15;
#[cfg(not(unix))]
pub const SIGKILL: i32 = 9;
#[cfg(not(unix))]
pub const SIGINT: i32 = 2;

// ─── ProcessHandle ────────────────────────────────────────────────────────

/// Supervisor-side record of one spawned child.
#[derive(Debug)]
pub struct ProcessHandle {
    pub id: ProcessId,
    pub name: String,
    pub pid: u32,
    pub argv: Vec<String>,
    pub output: OutputMode,
    /// `None` while the child is alive.
    pub status: Option<ExitStatus>,
    /// Set once SIGTERM has been sent, so shutdown never signals twice.
    pub terminate_sent: bool,
    pub kill_sent: bool,
    /// Lines kept when `output` is [`OutputMode::Capture`].
    pub captured: Vec<(OutputStream, String)>,
}

impl ProcessHandle {
    pub fn is_alive(&self) -> bool {
        self.status.is_none()
    }
}

// ─── ProcessSupervisor ────────────────────────────────────────────────────

/// Registry of live child processes.
///
/// Background tasks never touch the registry: they report through the
/// [`EventSink`] and the owner feeds those events back via [`observe`],
/// so every mutation happens on the owner's task.
///
/// [`observe`]: ProcessSupervisor::observe
pub struct ProcessSupervisor {
    sink: EventSink,
    next_id: u64,
    handles: BTreeMap<ProcessId, ProcessHandle>,
    signals_sent: u32,
}

impl ProcessSupervisor {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            next_id: 1,
            handles: BTreeMap::new(),
            signals_sent: 0,
        }
    }

    /// Spawn a child and register its handle.
    pub fn spawn(&mut self, spec: &ProcessSpec) -> Result<&ProcessHandle> {
        let id = ProcessId(self.next_id);
        self.next_id += 1;

        let pid = spawn_child(id, spec, self.sink.clone())?;
        tracing::info!(process = %spec.name, pid, "process started");

        let handle = ProcessHandle {
            id,
            name: spec.name.clone(),
            pid,
            argv: spec.argv(),
            output: spec.output,
            status: None,
            terminate_sent: false,
            kill_sent: false,
            captured: Vec::new(),
        };
        Ok(self.handles.entry(id).or_insert(handle))
    }

    /// Apply a background notification to the registry.
    ///
    /// Output lines are routed according to the handle's [`OutputMode`].
    /// Returns `false` for events about processes already released.
    pub fn observe(&mut self, event: &SupervisorEvent) -> bool {
        let Some(handle) = self.handles.get_mut(&event.process_id()) else {
            return false;
        };
        match event {
            SupervisorEvent::Output { stream, line, .. } => match handle.output {
                OutputMode::Log => {
                    tracing::info!(process = %handle.name, stream = stream.as_str(), "{line}");
                }
                OutputMode::Screen => match stream {
                    OutputStream::Stdout => println!("[{}] {line}", handle.name),
                    OutputStream::Stderr => eprintln!("[{}] {line}", handle.name),
                },
                OutputMode::Capture => handle.captured.push((*stream, line.clone())),
                OutputMode::Discard => {}
            },
            SupervisorEvent::Exited { status, error, .. } => {
                if let Some(err) = error {
                    tracing::warn!(process = %handle.name, "{err}");
                }
                if status.success() {
                    tracing::info!(process = %handle.name, pid = handle.pid, "process exited cleanly");
                } else {
                    tracing::warn!(process = %handle.name, pid = handle.pid, "process exited with {status}");
                }
                handle.status = Some(*status);
            }
        }
        true
    }

    pub fn get(&self, id: ProcessId) -> Option<&ProcessHandle> {
        self.handles.get(&id)
    }

    /// Drop the handle of an exited process, returning it.
    pub fn release(&mut self, id: ProcessId) -> Option<ProcessHandle> {
        match self.handles.get(&id) {
            Some(h) if !h.is_alive() => self.handles.remove(&id),
            _ => None,
        }
    }

    pub fn live_ids(&self) -> Vec<ProcessId> {
        self.handles
            .values()
            .filter(|h| h.is_alive())
            .map(|h| h.id)
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.handles.values().filter(|h| h.is_alive()).count()
    }

    /// Ask a live process to terminate (SIGTERM). Idempotent per process:
    /// returns `Ok(false)` if it already exited or was already asked.
    pub fn terminate(&mut self, id: ProcessId) -> Result<bool> {
        let handle = self
            .handles
            .get_mut(&id)
            .ok_or(SupervisorError::UnknownProcess(id.0))?;
        if !handle.is_alive() || handle.terminate_sent {
            return Ok(false);
        }
        handle.terminate_sent = true;
        let delivered = send_signal(handle.pid, SIGTERM)?;
        if delivered {
            self.signals_sent += 1;
            tracing::debug!(process = %handle.name, pid = handle.pid, "sent SIGTERM");
        }
        Ok(delivered)
    }

    /// Forcefully kill a live process (SIGKILL). Idempotent per process.
    pub fn kill(&mut self, id: ProcessId) -> Result<bool> {
        let handle = self
            .handles
            .get_mut(&id)
            .ok_or(SupervisorError::UnknownProcess(id.0))?;
        if !handle.is_alive() || handle.kill_sent {
            return Ok(false);
        }
        handle.kill_sent = true;
        let delivered = send_signal(handle.pid, SIGKILL)?;
        if delivered {
            self.signals_sent += 1;
            tracing::warn!(process = %handle.name, pid = handle.pid, "sent SIGKILL");
        }
        Ok(delivered)
    }

    /// Total number of signals successfully delivered so far.
    pub fn signals_sent(&self) -> u32 {
        self.signals_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn supervisor() -> (ProcessSupervisor, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |ev| {
            let _ = tx.send(ev);
        });
        (ProcessSupervisor::new(sink), rx)
    }

    /// Feed events back into the supervisor until `id` has exited.
    async fn pump_until_exit(
        sup: &mut ProcessSupervisor,
        rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
        id: ProcessId,
    ) {
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            sup.observe(&ev);
            if matches!(ev, SupervisorEvent::Exited { id: eid, .. } if eid == id) {
                break;
            }
        }
    }

    #[tokio::test]
    async fn spawn_registers_live_handle() {
        let (mut sup, mut rx) = supervisor();
        let spec = ProcessSpec::from_argv("sleeper", vec!["sleep".into(), "0".into()]).unwrap();
        let id = sup.spawn(&spec).unwrap().id;
        assert_eq!(sup.live_count(), 1);
        assert_eq!(sup.get(id).unwrap().argv, vec!["sleep", "0"]);

        pump_until_exit(&mut sup, &mut rx, id).await;
        assert_eq!(sup.live_count(), 0);
        assert_eq!(sup.get(id).unwrap().status, Some(ExitStatus::from_code(0)));
    }

    #[tokio::test]
    async fn release_only_removes_exited_handles() {
        let (mut sup, mut rx) = supervisor();
        let spec = ProcessSpec::from_argv("sleeper", vec!["sleep".into(), "0".into()]).unwrap();
        let id = sup.spawn(&spec).unwrap().id;

        assert!(sup.release(id).is_none(), "live handle must not be released");
        pump_until_exit(&mut sup, &mut rx, id).await;
        assert!(sup.release(id).is_some());
        assert!(sup.get(id).is_none());
        assert!(!sup.observe(&SupervisorEvent::Exited {
            id,
            status: ExitStatus::from_code(0),
            error: None
        }));
    }

    #[tokio::test]
    async fn capture_mode_keeps_lines() {
        let (mut sup, mut rx) = supervisor();
        let spec = ProcessSpec::shell("talker", "echo hello; echo world")
            .with_output(OutputMode::Capture);
        let id = sup.spawn(&spec).unwrap().id;
        pump_until_exit(&mut sup, &mut rx, id).await;

        let handle = sup.release(id).unwrap();
        let lines: Vec<_> = handle.captured.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(lines, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn terminate_is_sent_once() {
        let (mut sup, mut rx) = supervisor();
        let spec = ProcessSpec::from_argv("sleeper", vec!["sleep".into(), "30".into()]).unwrap();
        let id = sup.spawn(&spec).unwrap().id;

        assert!(sup.terminate(id).unwrap());
        assert!(!sup.terminate(id).unwrap());
        pump_until_exit(&mut sup, &mut rx, id).await;
        assert!(!sup.terminate(id).unwrap(), "exited process is never signalled");
        assert_eq!(sup.signals_sent(), 1);
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let (mut sup, _rx) = supervisor();
        let spec =
            ProcessSpec::from_argv("ghost", vec!["__launchpad_missing_binary__".into()]).unwrap();
        let err = sup.spawn(&spec).unwrap_err();
        assert!(matches!(err, SupervisorError::ExecutableNotFound { .. }));
        assert_eq!(sup.live_count(), 0);
    }

    #[test]
    fn unknown_process_is_an_error() {
        let sink: EventSink = Arc::new(|_| {});
        let mut sup = ProcessSupervisor::new(sink);
        assert!(matches!(
            sup.terminate(ProcessId(42)),
            Err(SupervisorError::UnknownProcess(42))
        ));
    }
}
