//! Event handlers and the registry that dispatches events to them.
//!
//! A handler pairs a match predicate with a body that produces actions. The
//! registry keeps registration order; the executor asks it for every handler
//! matching an event *before* running any body, so a handler registered
//! while an event is being dispatched does not see that event.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use launchpad_process::{ExitStatus, OutputStream, ProcessId};

use crate::action::{Action, ActionId};
use crate::context::{LaunchContext, Scope};
use crate::error::Result;
use crate::event::{Event, EventKind, ProcessInfo};

/// Reacts to events dispatched by the executor.
///
/// `matches` takes `&mut self` so stateful handlers can update their state
/// while observing events they do not fire on.
pub trait EventHandler: Send {
    fn matches(&mut self, event: &Event) -> bool;

    fn handle(&mut self, event: &Event, ctx: &LaunchContext) -> Result<Vec<Action>>;

    /// Name used by unregister actions and in failure reports.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Remove the handler after its first firing.
    fn handle_once(&self) -> bool {
        false
    }

    /// Bindings the body's actions are activated under.
    fn scope(&self) -> Option<Scope> {
        None
    }
}

// ---------------------------------------------------------------------------
// Body / Target
// ---------------------------------------------------------------------------

type BodyFn = dyn Fn(&Event, &LaunchContext) -> Result<Vec<Action>> + Send + Sync;

/// What a handler produces when it fires.
#[derive(Clone)]
pub enum Body {
    Actions(Vec<Action>),
    /// Computed at match time from the event and the current context.
    Function(Arc<BodyFn>),
}

impl Body {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Event, &LaunchContext) -> Result<Vec<Action>> + Send + Sync + 'static,
    {
        Body::Function(Arc::new(f))
    }

    fn produce(&self, event: &Event, ctx: &LaunchContext) -> Result<Vec<Action>> {
        match self {
            Body::Actions(actions) => Ok(actions.clone()),
            Body::Function(f) => f(event, ctx),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Actions(a) => f.debug_tuple("Actions").field(&a.len()).finish(),
            Body::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl From<Vec<Action>> for Body {
    fn from(actions: Vec<Action>) -> Self {
        Body::Actions(actions)
    }
}

/// Which processes a process-event handler cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Any,
    /// Processes spawned by this execute-process action (including respawns).
    Action(ActionId),
    Name(String),
}

impl Target {
    pub fn accepts(&self, process: &ProcessInfo) -> bool {
        match self {
            Target::Any => true,
            Target::Action(id) => process.action == *id,
            Target::Name(name) => process.name == *name,
        }
    }
}

impl From<&Action> for Target {
    fn from(action: &Action) -> Self {
        Target::Action(action.id)
    }
}

/// Shared registration options.
#[derive(Debug, Clone, Default)]
struct Options {
    name: Option<String>,
    once: bool,
}

macro_rules! handler_options {
    ($ty:ty) => {
        impl $ty {
            pub fn named(mut self, name: impl Into<String>) -> Self {
                self.options.name = Some(name.into());
                self
            }

            pub fn once(mut self) -> Self {
                self.options.once = true;
                self
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

/// Fires when a targeted process has started.
#[derive(Debug, Clone)]
pub struct OnProcessStart {
    target: Target,
    body: Body,
    options: Options,
}

impl OnProcessStart {
    pub fn new(target: impl Into<Target>, body: impl Into<Body>) -> Self {
        Self {
            target: target.into(),
            body: body.into(),
            options: Options::default(),
        }
    }
}

handler_options!(OnProcessStart);

impl EventHandler for OnProcessStart {
    fn matches(&mut self, event: &Event) -> bool {
        matches!(&event.kind, EventKind::ProcessStarted { process } if self.target.accepts(process))
    }

    fn handle(&mut self, event: &Event, ctx: &LaunchContext) -> Result<Vec<Action>> {
        self.body.produce(event, ctx)
    }

    fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    fn handle_once(&self) -> bool {
        self.options.once
    }
}

/// Fires when a targeted process has exited, optionally only for a given
/// outcome.
#[derive(Debug, Clone)]
pub struct OnProcessExit {
    target: Target,
    body: Body,
    /// `Some(true)` only on success, `Some(false)` only on failure.
    success: Option<bool>,
    options: Options,
}

impl OnProcessExit {
    pub fn new(target: impl Into<Target>, body: impl Into<Body>) -> Self {
        Self {
            target: target.into(),
            body: body.into(),
            success: None,
            options: Options::default(),
        }
    }

    pub fn on_success(mut self) -> Self {
        self.success = Some(true);
        self
    }

    pub fn on_failure(mut self) -> Self {
        self.success = Some(false);
        self
    }
}

handler_options!(OnProcessExit);

impl EventHandler for OnProcessExit {
    fn matches(&mut self, event: &Event) -> bool {
        match &event.kind {
            EventKind::ProcessExited { process, status } => {
                self.target.accepts(process)
                    && self.success.map_or(true, |want| status.success() == want)
            }
            _ => false,
        }
    }

    fn handle(&mut self, event: &Event, ctx: &LaunchContext) -> Result<Vec<Action>> {
        self.body.produce(event, ctx)
    }

    fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    fn handle_once(&self) -> bool {
        self.options.once
    }
}

/// Fires on output lines from a targeted process, optionally filtered by
/// stream and substring.
#[derive(Debug, Clone)]
pub struct OnProcessIo {
    target: Target,
    stream: Option<OutputStream>,
    contains: Option<String>,
    body: Body,
    options: Options,
}

impl OnProcessIo {
    pub fn new(target: impl Into<Target>, body: impl Into<Body>) -> Self {
        Self {
            target: target.into(),
            stream: None,
            contains: None,
            body: body.into(),
            options: Options::default(),
        }
    }

    pub fn stream(mut self, stream: OutputStream) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn containing(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }
}

handler_options!(OnProcessIo);

impl EventHandler for OnProcessIo {
    fn matches(&mut self, event: &Event) -> bool {
        match &event.kind {
            EventKind::ProcessOutput {
                process,
                stream,
                text,
            } => {
                self.target.accepts(process)
                    && self.stream.map_or(true, |s| s == *stream)
                    && self.contains.as_deref().map_or(true, |n| text.contains(n))
            }
            _ => false,
        }
    }

    fn handle(&mut self, event: &Event, ctx: &LaunchContext) -> Result<Vec<Action>> {
        self.body.produce(event, ctx)
    }

    fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    fn handle_once(&self) -> bool {
        self.options.once
    }
}

/// Fires when shutdown is requested.
#[derive(Debug, Clone)]
pub struct OnShutdown {
    body: Body,
    options: Options,
}

impl OnShutdown {
    pub fn new(body: impl Into<Body>) -> Self {
        Self {
            body: body.into(),
            options: Options::default(),
        }
    }
}

handler_options!(OnShutdown);

impl EventHandler for OnShutdown {
    fn matches(&mut self, event: &Event) -> bool {
        matches!(event.kind, EventKind::ShutdownRequested { .. })
    }

    fn handle(&mut self, event: &Event, ctx: &LaunchContext) -> Result<Vec<Action>> {
        self.body.produce(event, ctx)
    }

    fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    fn handle_once(&self) -> bool {
        self.options.once
    }
}

type Predicate = dyn Fn(&Event) -> bool + Send + Sync;

/// Generic handler: custom events by kind, or any event by predicate.
#[derive(Clone)]
pub struct OnEvent {
    predicate: Arc<Predicate>,
    body: Body,
    options: Options,
}

impl OnEvent {
    /// Matches `Custom` events whose `kind` equals `kind`.
    pub fn custom(kind: impl Into<String>, body: impl Into<Body>) -> Self {
        let kind = kind.into();
        Self::matching(
            move |e| matches!(&e.kind, EventKind::Custom { kind: k, .. } if *k == kind),
            body,
        )
    }

    pub fn matching<P>(predicate: P, body: impl Into<Body>) -> Self
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            body: body.into(),
            options: Options::default(),
        }
    }
}

handler_options!(OnEvent);

impl fmt::Debug for OnEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnEvent")
            .field("body", &self.body)
            .field("options", &self.options)
            .finish()
    }
}

impl EventHandler for OnEvent {
    fn matches(&mut self, event: &Event) -> bool {
        (self.predicate)(event)
    }

    fn handle(&mut self, event: &Event, ctx: &LaunchContext) -> Result<Vec<Action>> {
        self.body.produce(event, ctx)
    }

    fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    fn handle_once(&self) -> bool {
        self.options.once
    }
}

/// Last observed state of a managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagedState {
    NotStarted,
    Running(ProcessId),
    Exited(ExitStatus),
}

/// Tracks several execute-process actions and fires once every one of them
/// has started and exited at least once.
#[derive(Debug, Clone)]
pub struct OnAllExited {
    states: HashMap<ActionId, ManagedState>,
    body: Body,
    options: Options,
}

impl OnAllExited {
    pub fn new<I>(actions: I, body: impl Into<Body>) -> Self
    where
        I: IntoIterator<Item = ActionId>,
    {
        Self {
            states: actions
                .into_iter()
                .map(|id| (id, ManagedState::NotStarted))
                .collect(),
            body: body.into(),
            options: Options {
                name: None,
                once: true,
            },
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn state_of(&self, action: ActionId) -> Option<&ManagedState> {
        self.states.get(&action)
    }

    fn all_exited(&self) -> bool {
        !self.states.is_empty()
            && self
                .states
                .values()
                .all(|s| matches!(s, ManagedState::Exited(_)))
    }
}

impl EventHandler for OnAllExited {
    fn matches(&mut self, event: &Event) -> bool {
        let next = match &event.kind {
            EventKind::ProcessStarted { process } => ManagedState::Running(process.id),
            EventKind::ProcessExited { status, .. } => ManagedState::Exited(*status),
            _ => return false,
        };
        let Some(process) = event.process() else {
            return false;
        };
        match self.states.get_mut(&process.action) {
            Some(state) => {
                *state = next;
                matches!(event.kind, EventKind::ProcessExited { .. }) && self.all_exited()
            }
            None => false,
        }
    }

    fn handle(&mut self, event: &Event, ctx: &LaunchContext) -> Result<Vec<Action>> {
        self.body.produce(event, ctx)
    }

    fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    fn handle_once(&self) -> bool {
        self.options.once
    }
}

/// On-exit body of one specific process, registered by the executor when
/// the process is spawned.
#[derive(Debug)]
pub(crate) struct ExitOf {
    process: ProcessId,
    actions: Vec<Action>,
    scope: Scope,
}

impl ExitOf {
    pub(crate) fn new(process: ProcessId, actions: Vec<Action>, scope: Scope) -> Self {
        Self {
            process,
            actions,
            scope,
        }
    }
}

impl EventHandler for ExitOf {
    fn matches(&mut self, event: &Event) -> bool {
        matches!(&event.kind, EventKind::ProcessExited { process, .. } if process.id == self.process)
    }

    fn handle(&mut self, _event: &Event, _ctx: &LaunchContext) -> Result<Vec<Action>> {
        Ok(std::mem::take(&mut self.actions))
    }

    fn handle_once(&self) -> bool {
        true
    }

    fn scope(&self) -> Option<Scope> {
        Some(self.scope.clone())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Entry {
    id: HandlerId,
    handler: Box<dyn EventHandler>,
}

/// A handler's answer to one event.
pub struct Response {
    pub handler: String,
    pub actions: Result<Vec<Action>>,
    pub scope: Option<Scope>,
}

#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<Entry>,
    next_id: u64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        tracing::debug!(handler = handler.name().unwrap_or("<anonymous>"), "handler registered");
        self.entries.push(Entry { id, handler });
        id
    }

    /// Remove every handler registered under `name`. Returns how many were
    /// removed.
    pub fn unregister(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.handler.name() != Some(name));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handlers matching `event`, in registration order. Every predicate is
    /// consulted so stateful handlers observe the event even when an earlier
    /// handler also matched.
    pub fn matching(&mut self, event: &Event) -> Vec<HandlerId> {
        self.entries
            .iter_mut()
            .filter_map(|e| e.handler.matches(event).then_some(e.id))
            .collect()
    }

    /// Run the body of handler `id`. `None` when the handler was unregistered
    /// after matching. One-shot handlers are removed before returning.
    pub fn respond(&mut self, id: HandlerId, event: &Event, ctx: &LaunchContext) -> Option<Response> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        let entry = &mut self.entries[pos];
        let handler = entry
            .handler
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("handler-{}", id.0));
        let actions = entry.handler.handle(event, ctx);
        let scope = entry.handler.scope();
        if entry.handler.handle_once() {
            self.entries.remove(pos);
        }
        Some(Response {
            handler,
            actions,
            scope,
        })
    }
}
