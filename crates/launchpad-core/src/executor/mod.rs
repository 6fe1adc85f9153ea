//! The executor: visits a description tree and drives the run to completion.
//!
//! # Architecture
//!
//! ```text
//!  Description ──► activate() ──► LaunchContext (scopes, event queue)
//!                     │                 │
//!                     │                 ▼
//!                     │          dispatch() ──► HandlerRegistry ──► actions
//!                     ▼
//!           ProcessSupervisor / timers
//!                     │   (tokio tasks)
//!                     ▼
//!            mpsc handoff queue ──► run loop ──► events
//! ```
//!
//! One task owns everything mutable: the context, the handler registry, the
//! supervisor registry and the journal. Process readers, waiters, timers and
//! the Ctrl-C listener run as tokio tasks and only ever send a
//! [`LoopMessage`] back through the handoff queue.
//!
//! Events dispatch in enqueue order. For each event the matching handlers
//! are collected first, then their bodies are activated in registration
//! order, all before the next event is taken.

mod journal;
#[cfg(test)]
mod tests;

pub use journal::{
    ActionRecord, ActionState, CapturedOutput, LaunchReport, ReportedError, TimelineEntry,
};

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use launchpad_process::{EventSink, ProcessId, ProcessSpec, ProcessSupervisor, SupervisorEvent};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionKind, ExecuteProcess, LogLevel, VariableValue};
use crate::config::{FailurePolicy, LaunchConfig};
use crate::context::{ArgumentDecl, LaunchContext, Scope, Value};
use crate::description::Description;
use crate::error::{LaunchError, Result};
use crate::event::{Event, EventKind, ProcessInfo};
use crate::handler::{ExitOf, HandlerRegistry};
use crate::substitution::perform_all;
use journal::Journal;

/// Everything that crosses from background tasks into the run loop.
#[derive(Debug)]
pub(crate) enum LoopMessage {
    Process(SupervisorEvent),
    TimerFired(u64),
    Interrupt,
}

enum Step {
    Done,
    Running,
}

enum Outcome {
    Completed,
    Running,
    Skipped,
    Failed { escalate: bool, reason: String },
}

struct RunningProcess {
    record: usize,
    info: ProcessInfo,
    action: Action,
    scope: Scope,
}

struct TimerEntry {
    /// `None` for respawn delays, which are not timer actions.
    record: Option<usize>,
    actions: Vec<Action>,
    scope: Scope,
    cancel_on_shutdown: bool,
    abort: AbortHandle,
}

struct ShutdownState {
    reason: String,
    deadline: Instant,
}

pub struct Executor {
    config: LaunchConfig,
    ctx: LaunchContext,
    registry: HandlerRegistry,
    supervisor: ProcessSupervisor,
    journal: Journal,
    tx: mpsc::UnboundedSender<LoopMessage>,
    rx: mpsc::UnboundedReceiver<LoopMessage>,
    processes: HashMap<ProcessId, RunningProcess>,
    spawned: u64,
    timers: HashMap<u64, TimerEntry>,
    next_timer: u64,
    /// Timers started inside each group currently being activated.
    group_timers: Vec<Vec<u64>>,
    shutdown: Option<ShutdownState>,
    fatal: Option<String>,
    forced: bool,
    timeline: Vec<TimelineEntry>,
    errors: Vec<ReportedError>,
    captured: Vec<CapturedOutput>,
}

impl Executor {
    pub fn new(config: LaunchConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink_tx = tx.clone();
        let sink: EventSink = Arc::new(move |event| {
            let _ = sink_tx.send(LoopMessage::Process(event));
        });

        let mut ctx = LaunchContext::new();
        ctx.set_allow_redeclare(config.allow_redeclare);
        ctx.set_write_policy(config.write_policy);

        Self {
            config,
            ctx,
            registry: HandlerRegistry::new(),
            supervisor: ProcessSupervisor::new(sink),
            journal: Journal::default(),
            tx,
            rx,
            processes: HashMap::new(),
            spawned: 0,
            timers: HashMap::new(),
            next_timer: 1,
            group_timers: Vec::new(),
            shutdown: None,
            fatal: None,
            forced: false,
            timeline: Vec::new(),
            errors: Vec::new(),
            captured: Vec::new(),
        }
    }

    /// Bind launch-time arguments (`name → value`) in the root scope.
    pub fn with_launch_arguments<I, K, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let ctx = std::mem::take(&mut self.ctx);
        self.ctx = ctx.with_launch_arguments(args);
        self
    }

    pub fn context(&self) -> &LaunchContext {
        &self.ctx
    }

    /// Activate `description` and run until no work remains or shutdown
    /// completes.
    pub async fn run(mut self, description: Description) -> LaunchReport {
        info!(actions = description.len(), "launch started");
        let signals = self.listen_for_interrupts();

        for action in &description.actions {
            self.activate(action);
        }

        loop {
            self.drain_events();
            if self.is_idle() {
                break;
            }

            let deadline = self.shutdown.as_ref().map(|s| s.deadline);
            let message = tokio::select! {
                message = self.rx.recv() => message,
                _ = grace_elapsed(deadline) => {
                    self.kill_remaining("grace period elapsed");
                    break;
                }
            };

            match message {
                Some(LoopMessage::Process(event)) => self.on_supervisor_event(event),
                Some(LoopMessage::TimerFired(id)) => self.fire_timer(id),
                Some(LoopMessage::Interrupt) => {
                    if self.ctx.is_shutting_down() {
                        self.kill_remaining("interrupted again");
                        break;
                    }
                    warn!("interrupted; shutting down (interrupt again to kill)");
                    self.request_shutdown("interrupted".to_string(), true);
                }
                None => break,
            }
        }

        if let Some(task) = signals {
            task.abort();
        }
        self.finish()
    }

    fn listen_for_interrupts(&self) -> Option<JoinHandle<()>> {
        if !self.config.handle_signals {
            return None;
        }
        let tx = self.tx.clone();
        Some(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(LoopMessage::Interrupt).is_err() {
                    break;
                }
            }
        }))
    }

    /// True when nothing can produce further work: no queued events, no
    /// live processes, no timers that would still fire.
    fn is_idle(&self) -> bool {
        if self.ctx.pending_events() > 0 || self.supervisor.live_count() > 0 {
            return false;
        }
        match self.shutdown {
            Some(_) => self.timers.values().all(|t| t.cancel_on_shutdown),
            None => self.timers.is_empty(),
        }
    }

    fn finish(mut self) -> LaunchReport {
        let leftover: Vec<u64> = self.timers.keys().copied().collect();
        for id in leftover {
            self.cancel_timer(id, "launch finished");
        }

        let unused_arguments = self.ctx.unused_launch_arguments();
        for name in &unused_arguments {
            warn!(argument = %name, "launch argument was never declared");
        }

        let report = LaunchReport {
            records: self.journal.into_records(),
            timeline: self.timeline,
            errors: self.errors,
            shutdown_reason: self.shutdown.map(|s| s.reason),
            fatal: self.fatal,
            forced: self.forced,
            unused_arguments,
            signals_sent: self.supervisor.signals_sent(),
            captured: self.captured,
        };
        info!(exit_code = report.exit_code(), "launch finished");
        report
    }

    // ── Activation ───────────────────────────────────────────────────────

    fn activate(&mut self, action: &Action) -> Outcome {
        let seq = self.journal.open(action);

        if let Some(condition) = &action.condition {
            self.journal.transition(seq, ActionState::EvaluatingCondition);
            match condition.evaluate(&self.ctx) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(action = %action.label(), "condition is false, skipping");
                    self.journal.transition(seq, ActionState::Skipped);
                    return Outcome::Skipped;
                }
                Err(e) => return self.fail(seq, action, e),
            }
        }

        if self.ctx.is_shutting_down()
            && matches!(action.kind, ActionKind::ExecuteProcess(_) | ActionKind::Timer(_))
        {
            debug!(action = %action.label(), "shutting down, not starting");
            self.journal.transition(seq, ActionState::Skipped);
            self.journal.note(seq, "shutdown in progress");
            return Outcome::Skipped;
        }

        self.journal.transition(seq, ActionState::Activated);
        self.journal.transition(seq, ActionState::Running);
        match self.execute(seq, action) {
            Ok(Step::Done) => {
                self.journal.transition(seq, ActionState::Completed);
                Outcome::Completed
            }
            Ok(Step::Running) => Outcome::Running,
            Err(e) => self.fail(seq, action, e),
        }
    }

    fn execute(&mut self, seq: usize, action: &Action) -> Result<Step> {
        match &action.kind {
            ActionKind::Log { message, level } => {
                let line = message.perform(&self.ctx)?;
                match level {
                    LogLevel::Debug => debug!("{line}"),
                    LogLevel::Info => info!("{line}"),
                    LogLevel::Warn => warn!("{line}"),
                    LogLevel::Error => error!("{line}"),
                }
                self.timeline.push(TimelineEntry::Log { line });
                Ok(Step::Done)
            }
            ActionKind::ExecuteProcess(process) => self.spawn_process(seq, action, process),
            ActionKind::Group { bindings, actions } => {
                let mut scope = Scope::default();
                for (name, value) in bindings {
                    scope
                        .vars
                        .insert(name.clone(), Value::Text(value.perform(&self.ctx)?));
                }
                self.run_group(scope, actions)
            }
            ActionKind::Include(include) => {
                let source_name = include.source.name();
                let description = include.source.load(&self.ctx).map_err(|e| match e {
                    e @ LaunchError::IncludeFailed { .. } => e,
                    other => LaunchError::IncludeFailed {
                        source_name: source_name.clone(),
                        reason: other.to_string(),
                    },
                })?;
                let mut scope = Scope::default();
                for (name, value) in &include.arguments {
                    scope
                        .vars
                        .insert(name.clone(), Value::Text(value.perform(&self.ctx)?));
                }
                debug!(source = %source_name, actions = description.len(), "including");
                self.run_group(scope, &description.actions)
            }
            ActionKind::DeclareArgument(decl) => {
                let default = decl
                    .default
                    .as_ref()
                    .map(|t| t.perform(&self.ctx))
                    .transpose()?;
                self.ctx.declare(ArgumentDecl {
                    name: decl.name.clone(),
                    default,
                    description: decl.description.clone(),
                    choices: decl.choices.clone(),
                })?;
                Ok(Step::Done)
            }
            ActionKind::SetVariable {
                name,
                value,
                global,
            } => {
                let value = match value {
                    VariableValue::Text(t) => Value::Text(t.perform(&self.ctx)?),
                    VariableValue::Structured(v) => Value::Structured(v.clone()),
                };
                let written = if *global {
                    self.ctx.set_global(name.clone(), value)
                } else {
                    self.ctx.set(name.clone(), value)
                };
                if !written {
                    self.journal.note(seq, "dropped by write policy");
                }
                Ok(Step::Done)
            }
            ActionKind::UnsetVariable { name } => {
                if self.ctx.unset(name).is_none() {
                    debug!(name = %name, "unset of unbound variable");
                }
                Ok(Step::Done)
            }
            ActionKind::SetEnv { name, value } => {
                let value = value.perform(&self.ctx)?;
                self.ctx.set_env(name.clone(), value);
                Ok(Step::Done)
            }
            ActionKind::UnsetEnv { name } => {
                self.ctx.unset_env(name.clone());
                Ok(Step::Done)
            }
            ActionKind::RegisterEventHandler(factory) => {
                self.registry.register(factory.build());
                Ok(Step::Done)
            }
            ActionKind::UnregisterEventHandler { name } => {
                let removed = self.registry.unregister(name);
                if removed == 0 {
                    debug!(handler = %name, "no handler registered under this name");
                }
                Ok(Step::Done)
            }
            ActionKind::EmitEvent(kind) => {
                self.ctx.emit(Event::new(kind.clone()));
                Ok(Step::Done)
            }
            ActionKind::Timer(timer) => {
                let period = timer.period.perform(&self.ctx)?;
                let delay = parse_period(&period)?;
                let scope = self.ctx.snapshot();
                self.schedule(
                    delay,
                    timer.actions.clone(),
                    scope,
                    Some(seq),
                    timer.cancel_on_shutdown,
                );
                Ok(Step::Running)
            }
            ActionKind::Shutdown { reason } => {
                let reason = reason.perform(&self.ctx)?;
                if !self.request_shutdown(reason, false) {
                    self.journal.note(seq, "already shutting down");
                }
                Ok(Step::Done)
            }
            ActionKind::OpaqueFunction(function) => {
                let actions = (function.0)(&self.ctx)?;
                self.run_children(&actions)?;
                Ok(Step::Done)
            }
        }
    }

    /// Activate `actions` inside a fresh scope. Timers started inside are
    /// cancelled if the group fails.
    fn run_group(&mut self, scope: Scope, actions: &[Action]) -> Result<Step> {
        self.group_timers.push(Vec::new());
        let result = self.enter_scope(scope).run_children(actions);
        let timers = self.group_timers.pop().unwrap_or_default();
        match result {
            Ok(()) => {
                if let Some(parent) = self.group_timers.last_mut() {
                    parent.extend(timers);
                }
                Ok(Step::Done)
            }
            Err(e) => {
                for id in timers {
                    self.cancel_timer(id, "owning group failed");
                }
                Err(e)
            }
        }
    }

    /// Activate siblings in order. A failing required include stops the
    /// remaining siblings and fails the caller.
    fn run_children(&mut self, actions: &[Action]) -> Result<()> {
        for (i, child) in actions.iter().enumerate() {
            if let Outcome::Failed {
                escalate: true,
                reason,
            } = self.activate(child)
            {
                for rest in &actions[i + 1..] {
                    self.journal.skip(rest, "enclosing group failed");
                }
                return Err(LaunchError::ChildFailed {
                    child: child.label(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Activate a handler or deferred body, optionally under saved bindings.
    fn activate_body(&mut self, actions: &[Action], scope: Option<Scope>) {
        match scope {
            Some(scope) => {
                let mut scoped = self.enter_scope(scope);
                for action in actions {
                    scoped.activate(action);
                }
            }
            None => {
                for action in actions {
                    self.activate(action);
                }
            }
        }
    }

    fn enter_scope(&mut self, scope: Scope) -> ScopedExecutor<'_> {
        let depth = self.ctx.depth();
        self.ctx.push_existing(scope);
        ScopedExecutor { exec: self, depth }
    }

    fn fail(&mut self, seq: usize, action: &Action, error: LaunchError) -> Outcome {
        let escalate = matches!(&action.kind, ActionKind::Include(include) if include.required);
        warn!(action = %action.label(), kind = error.kind(), "{error}");
        let reason = error.to_string();
        self.errors.push(ReportedError {
            kind: error.kind(),
            message: reason.clone(),
        });
        self.journal.transition(
            seq,
            ActionState::Failed {
                reason: reason.clone(),
            },
        );
        self.on_failure(&reason);
        Outcome::Failed { escalate, reason }
    }

    /// Record a failure that has no activation record of its own.
    fn report(&mut self, error: LaunchError) {
        warn!(kind = error.kind(), "{error}");
        let message = error.to_string();
        self.errors.push(ReportedError {
            kind: error.kind(),
            message: message.clone(),
        });
        self.on_failure(&message);
    }

    fn on_failure(&mut self, reason: &str) {
        if self.config.failure_policy != FailurePolicy::FailFast || self.fatal.is_some() {
            return;
        }
        error!(reason, "fail-fast: shutting down");
        self.fatal = Some(reason.to_string());
        self.request_shutdown(format!("fail-fast: {reason}"), false);
    }

    // ── Processes ────────────────────────────────────────────────────────

    fn spawn_process(&mut self, seq: usize, action: &Action, process: &ExecuteProcess) -> Result<Step> {
        let argv = perform_all(&process.cmd, &self.ctx)?;
        self.spawned += 1;
        let name = match &process.name {
            Some(name) => name.perform(&self.ctx)?,
            None => default_process_name(argv.first().map(String::as_str), self.spawned),
        };
        let spawn_error = |reason: String| LaunchError::ProcessSpawn {
            name: name.clone(),
            reason,
        };

        let mut spec = if process.shell {
            ProcessSpec::shell(name.clone(), argv.join(" "))
        } else {
            ProcessSpec::from_argv(name.clone(), argv).map_err(|e| spawn_error(e.to_string()))?
        };
        if let Some(cwd) = &process.cwd {
            spec.cwd = Some(PathBuf::from(cwd.perform(&self.ctx)?));
        }
        match &process.env {
            Some(env) => {
                let mut replaced = HashMap::new();
                for (key, value) in env {
                    replaced.insert(key.perform(&self.ctx)?, value.perform(&self.ctx)?);
                }
                spec.env = Some(replaced);
            }
            None => {
                for (key, value) in self.ctx.env_overrides() {
                    match value {
                        Some(value) => spec.additional_env.push((key, value)),
                        None => spec.env_remove.push(key),
                    }
                }
            }
        }
        for (key, value) in &process.additional_env {
            spec.additional_env
                .push((key.perform(&self.ctx)?, value.perform(&self.ctx)?));
        }
        spec.output = process.output.unwrap_or(self.config.default_output);

        let handle = self
            .supervisor
            .spawn(&spec)
            .map_err(|e| spawn_error(e.to_string()))?;
        let info = ProcessInfo {
            id: handle.id,
            action: action.id,
            name: name.clone(),
            pid: handle.pid,
            cmd: handle.argv.clone(),
        };
        self.journal.note(seq, format!("pid {}", info.pid));
        self.ctx.emit(Event::new(EventKind::ProcessStarted {
            process: info.clone(),
        }));

        let scope = self.ctx.snapshot();
        if !process.on_exit.is_empty() {
            self.registry.register(Box::new(ExitOf::new(
                info.id,
                process.on_exit.clone(),
                scope.clone(),
            )));
        }
        self.processes.insert(
            info.id,
            RunningProcess {
                record: seq,
                info,
                action: action.clone(),
                scope,
            },
        );
        Ok(Step::Running)
    }

    fn on_supervisor_event(&mut self, event: SupervisorEvent) {
        if !self.supervisor.observe(&event) {
            return;
        }
        let Some((info, record)) = self
            .processes
            .get(&event.process_id())
            .map(|p| (p.info.clone(), p.record))
        else {
            return;
        };
        match event {
            SupervisorEvent::Output { stream, line, .. } => {
                self.ctx.emit(Event::new(EventKind::ProcessOutput {
                    process: info,
                    stream,
                    text: line,
                }));
            }
            SupervisorEvent::Exited { status, error, .. } => {
                if let Some(error) = error {
                    self.report(LaunchError::ProcessSupervision(format!(
                        "{}: {error}",
                        info.name
                    )));
                }
                self.journal.note(record, status.to_string());
                self.journal.transition(record, ActionState::Completed);
                self.ctx.emit(Event::new(EventKind::ProcessExited {
                    process: info,
                    status,
                }));
            }
        }
    }

    /// Runs after a process's exit event has been dispatched: release the
    /// handle and respawn if asked to.
    fn finish_process(&mut self, id: ProcessId) {
        let Some(running) = self.processes.remove(&id) else {
            return;
        };
        if let Some(handle) = self.supervisor.release(id) {
            if !handle.captured.is_empty() {
                self.captured.push(CapturedOutput {
                    process: handle.name,
                    pid: handle.pid,
                    lines: handle.captured,
                });
            }
        }

        let ActionKind::ExecuteProcess(process) = &running.action.kind else {
            return;
        };
        if !process.respawn || self.ctx.is_shutting_down() {
            return;
        }
        let delay = Duration::try_from_secs_f64(process.respawn_delay).unwrap_or(Duration::ZERO);
        info!(process = %running.info.name, delay_secs = delay.as_secs_f64(), "respawning");
        if delay.is_zero() {
            self.activate_body(std::slice::from_ref(&running.action), Some(running.scope));
        } else {
            self.schedule(delay, vec![running.action], running.scope, None, true);
        }
    }

    fn kill_remaining(&mut self, why: &str) {
        let live = self.supervisor.live_ids();
        if live.is_empty() {
            return;
        }
        warn!(count = live.len(), "{why}: killing remaining processes");
        self.forced = true;
        for id in live {
            if let Err(e) = self.supervisor.kill(id) {
                self.report(LaunchError::ProcessSupervision(e.to_string()));
            }
        }
    }

    // ── Timers ───────────────────────────────────────────────────────────

    fn schedule(
        &mut self,
        delay: Duration,
        actions: Vec<Action>,
        scope: Scope,
        record: Option<usize>,
        cancel_on_shutdown: bool,
    ) -> u64 {
        let id = self.next_timer;
        self.next_timer += 1;
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LoopMessage::TimerFired(id));
        });
        self.timers.insert(
            id,
            TimerEntry {
                record,
                actions,
                scope,
                cancel_on_shutdown,
                abort: task.abort_handle(),
            },
        );
        if let Some(frame) = self.group_timers.last_mut() {
            frame.push(id);
        }
        debug!(timer = id, delay_secs = delay.as_secs_f64(), "timer scheduled");
        id
    }

    fn cancel_timer(&mut self, id: u64, why: &str) {
        let Some(timer) = self.timers.remove(&id) else {
            return;
        };
        timer.abort.abort();
        if let Some(record) = timer.record {
            self.journal.note(record, why);
            self.journal.transition(record, ActionState::Completed);
        }
        debug!(timer = id, "timer cancelled: {why}");
    }

    fn fire_timer(&mut self, id: u64) {
        // Already cancelled timers may still deliver; they are gone from the map.
        let Some(timer) = self.timers.remove(&id) else {
            return;
        };
        if let Some(record) = timer.record {
            self.journal.transition(record, ActionState::Completed);
            self.ctx.emit(Event::new(EventKind::TimerElapsed { timer: id }));
        }
        self.activate_body(&timer.actions, Some(timer.scope));
    }

    // ── Events ───────────────────────────────────────────────────────────

    fn drain_events(&mut self) {
        while let Some(event) = self.ctx.next_event() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: Event) {
        if matches!(event.kind, EventKind::ShutdownRequested { .. }) && self.shutdown.is_some() {
            debug!("shutdown already in progress, ignoring repeated request");
            return;
        }
        debug!(event = event.name(), "dispatching");
        self.timeline.push(TimelineEntry::Event {
            name: event.name().to_string(),
            process: event.process().map(|p| p.name.clone()),
        });

        self.ctx.begin_turn();
        self.ctx.set_current_event(Some(event.clone()));
        let matched = self.registry.matching(&event);
        for (writer, id) in matched.into_iter().enumerate() {
            let Some(response) = self.registry.respond(id, &event, &self.ctx) else {
                continue;
            };
            self.ctx.set_writer(Some(writer));
            match response.actions {
                Ok(actions) => self.activate_body(&actions, response.scope),
                Err(e) => self.report(LaunchError::Handler {
                    handler: response.handler,
                    reason: e.to_string(),
                }),
            }
        }
        self.ctx.end_turn();
        self.ctx.set_current_event(None);

        match event.kind {
            EventKind::ShutdownRequested {
                reason,
                due_to_signal,
            } => self.begin_shutdown(reason, due_to_signal),
            EventKind::ProcessExited { process, .. } => self.finish_process(process.id),
            _ => {}
        }
    }

    /// Queue a shutdown request. Returns `false` if one is already underway.
    fn request_shutdown(&mut self, reason: String, due_to_signal: bool) -> bool {
        if self.ctx.is_shutting_down() {
            return false;
        }
        self.ctx.mark_shutting_down();
        self.ctx.emit(Event::new(EventKind::ShutdownRequested {
            reason,
            due_to_signal,
        }));
        true
    }

    fn begin_shutdown(&mut self, reason: String, due_to_signal: bool) {
        info!(reason = %reason, due_to_signal, "shutting down");
        self.ctx.mark_shutting_down();
        self.shutdown = Some(ShutdownState {
            reason,
            deadline: Instant::now() + self.config.grace_period(),
        });

        let cancelled: Vec<u64> = self
            .timers
            .iter()
            .filter(|(_, t)| t.cancel_on_shutdown)
            .map(|(id, _)| *id)
            .collect();
        for id in cancelled {
            self.cancel_timer(id, "cancelled by shutdown");
        }

        for id in self.supervisor.live_ids() {
            if let Err(e) = self.supervisor.terminate(id) {
                self.report(LaunchError::ProcessSupervision(e.to_string()));
            }
        }
    }
}

/// An executor with one extra scope pushed; the scope is popped on drop,
/// whatever path leaves the block.
struct ScopedExecutor<'a> {
    exec: &'a mut Executor,
    depth: usize,
}

impl Deref for ScopedExecutor<'_> {
    type Target = Executor;

    fn deref(&self) -> &Executor {
        self.exec
    }
}

impl DerefMut for ScopedExecutor<'_> {
    fn deref_mut(&mut self) -> &mut Executor {
        self.exec
    }
}

impl Drop for ScopedExecutor<'_> {
    fn drop(&mut self) {
        self.exec.ctx.restore_depth(self.depth);
    }
}

async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn parse_period(text: &str) -> Result<Duration> {
    let secs: f64 = text.trim().parse().map_err(|_| {
        LaunchError::SubstitutionResolution(format!("timer period '{text}' is not a number"))
    })?;
    Duration::try_from_secs_f64(secs).map_err(|_| {
        LaunchError::SubstitutionResolution(format!(
            "timer period '{text}' must be a non-negative number of seconds"
        ))
    })
}

fn default_process_name(program: Option<&str>, n: u64) -> String {
    let base = program
        .map(|p| {
            Path::new(p)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.to_string())
        })
        .unwrap_or_else(|| "process".to_string());
    format!("{base}-{n}")
}
