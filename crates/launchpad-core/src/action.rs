//! Action data model.
//!
//! An [`Action`] is the atomic unit of orchestration: an optional
//! [`Condition`] gating activation, paired with an [`ActionKind`] describing
//! the side effect. Actions are immutable; activating one only mutates the
//! context, the event queue or OS state.

use std::fmt;
use std::sync::Arc;

use launchpad_process::OutputMode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::condition::Condition;
use crate::context::LaunchContext;
use crate::description::DescriptionSource;
use crate::error::Result;
use crate::event::EventKind;
use crate::handler::EventHandler;
use crate::substitution::Template;

// ---------------------------------------------------------------------------
// ActionId
// ---------------------------------------------------------------------------

/// Identity assigned at construction and preserved by clones, so handlers
/// targeting an action keep matching when it is re-activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

// ---------------------------------------------------------------------------
// Variant payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Text(Template),
    Structured(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclareArgument {
    pub name: String,
    pub default: Option<Template>,
    pub description: Option<String>,
    pub choices: Vec<String>,
}

/// Start an OS process and keep it supervised until it exits.
#[derive(Debug, Clone)]
pub struct ExecuteProcess {
    pub cmd: Vec<Template>,
    pub name: Option<Template>,
    pub cwd: Option<Template>,
    /// Replaces the inherited environment entirely.
    pub env: Option<Vec<(Template, Template)>>,
    pub additional_env: Vec<(Template, Template)>,
    /// Join `cmd` with spaces and run it through `sh -c`.
    pub shell: bool,
    /// Falls back to the executor's configured default.
    pub output: Option<OutputMode>,
    pub respawn: bool,
    /// Seconds to wait before a respawn.
    pub respawn_delay: f64,
    /// Activated once, after this process's exit event.
    pub on_exit: Vec<Action>,
}

impl ExecuteProcess {
    pub fn new<I, T>(cmd: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Template>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            name: None,
            cwd: None,
            env: None,
            additional_env: Vec::new(),
            shell: false,
            output: None,
            respawn: false,
            respawn_delay: 0.0,
            on_exit: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<Template>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<Template>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<Template>, value: impl Into<Template>) -> Self {
        self.env
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    pub fn additional_env(mut self, key: impl Into<Template>, value: impl Into<Template>) -> Self {
        self.additional_env.push((key.into(), value.into()));
        self
    }

    pub fn shell(mut self) -> Self {
        self.shell = true;
        self
    }

    pub fn output(mut self, mode: OutputMode) -> Self {
        self.output = Some(mode);
        self
    }

    pub fn respawn(mut self, delay_secs: f64) -> Self {
        self.respawn = true;
        self.respawn_delay = delay_secs;
        self
    }

    pub fn on_exit(mut self, actions: Vec<Action>) -> Self {
        self.on_exit = actions;
        self
    }
}

/// Splice in a subtree supplied by a [`DescriptionSource`].
#[derive(Clone)]
pub struct Include {
    pub source: Arc<dyn DescriptionSource>,
    /// Evaluated in the including scope, bound in the included one.
    pub arguments: Vec<(String, Template)>,
    /// A required include that fails to load fails its enclosing group.
    pub required: bool,
}

impl fmt::Debug for Include {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Include")
            .field("source", &self.source.name())
            .field("arguments", &self.arguments)
            .field("required", &self.required)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Timer {
    /// Seconds, as a (possibly substituted) decimal number.
    pub period: Template,
    pub actions: Vec<Action>,
    pub cancel_on_shutdown: bool,
}

/// Produces a fresh handler instance for each registration.
#[derive(Clone)]
pub struct HandlerFactory(Arc<dyn Fn() -> Box<dyn EventHandler> + Send + Sync>);

impl HandlerFactory {
    pub fn new<H>(handler: H) -> Self
    where
        H: EventHandler + Clone + Sync + 'static,
    {
        HandlerFactory(Arc::new(move || Box::new(handler.clone())))
    }

    pub fn build(&self) -> Box<dyn EventHandler> {
        (self.0)()
    }
}

impl fmt::Debug for HandlerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handler = self.build();
        f.debug_tuple("HandlerFactory")
            .field(&handler.name().unwrap_or("<anonymous>"))
            .finish()
    }
}

pub type DynamicFn = dyn Fn(&LaunchContext) -> Result<Vec<Action>> + Send + Sync;

/// Actions computed from the context at activation time.
#[derive(Clone)]
pub struct OpaqueFunction(pub Arc<DynamicFn>);

impl fmt::Debug for OpaqueFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpaqueFunction(..)")
    }
}

// ---------------------------------------------------------------------------
// ActionKind / Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ActionKind {
    Log {
        message: Template,
        level: LogLevel,
    },
    ExecuteProcess(Box<ExecuteProcess>),
    Group {
        /// Bound in the new scope before children run.
        bindings: Vec<(String, Template)>,
        actions: Vec<Action>,
    },
    Include(Include),
    DeclareArgument(DeclareArgument),
    SetVariable {
        name: String,
        value: VariableValue,
        global: bool,
    },
    UnsetVariable {
        name: String,
    },
    SetEnv {
        name: String,
        value: Template,
    },
    UnsetEnv {
        name: String,
    },
    RegisterEventHandler(HandlerFactory),
    UnregisterEventHandler {
        name: String,
    },
    EmitEvent(EventKind),
    Timer(Timer),
    Shutdown {
        reason: Template,
    },
    OpaqueFunction(OpaqueFunction),
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Log { .. } => "log",
            ActionKind::ExecuteProcess(_) => "execute_process",
            ActionKind::Group { .. } => "group",
            ActionKind::Include(_) => "include",
            ActionKind::DeclareArgument(_) => "declare_argument",
            ActionKind::SetVariable { .. } => "set_variable",
            ActionKind::UnsetVariable { .. } => "unset_variable",
            ActionKind::SetEnv { .. } => "set_env",
            ActionKind::UnsetEnv { .. } => "unset_env",
            ActionKind::RegisterEventHandler(_) => "register_event_handler",
            ActionKind::UnregisterEventHandler { .. } => "unregister_event_handler",
            ActionKind::EmitEvent(_) => "emit_event",
            ActionKind::Timer(_) => "timer",
            ActionKind::Shutdown { .. } => "shutdown",
            ActionKind::OpaqueFunction(_) => "opaque_function",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Action {
    pub id: ActionId,
    pub condition: Option<Condition>,
    pub kind: ActionKind,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: ActionId::new(),
            condition: None,
            kind,
        }
    }

    /// Gate this action on `condition`.
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Short human-readable label for logs and the journal.
    pub fn label(&self) -> String {
        match &self.kind {
            ActionKind::Log { message, .. } => format!("log '{message}'"),
            ActionKind::ExecuteProcess(ep) => match &ep.name {
                Some(name) => format!("execute_process {name}"),
                None => {
                    let cmd: Vec<String> = ep.cmd.iter().map(|t| t.to_string()).collect();
                    format!("execute_process [{}]", cmd.join(" "))
                }
            },
            ActionKind::Include(inc) => format!("include {}", inc.source.name()),
            ActionKind::DeclareArgument(d) => format!("declare_argument {}", d.name),
            ActionKind::SetVariable { name, .. } | ActionKind::UnsetVariable { name } => {
                format!("{} {name}", self.kind.name())
            }
            ActionKind::SetEnv { name, .. } | ActionKind::UnsetEnv { name } => {
                format!("{} {name}", self.kind.name())
            }
            ActionKind::Timer(t) => format!("timer {}s", t.period),
            other => other.name().to_string(),
        }
    }

    // ── Constructors ─────────────────────────────────────────────────────

    pub fn log(message: impl Into<Template>) -> Self {
        Self::log_at(LogLevel::Info, message)
    }

    pub fn log_at(level: LogLevel, message: impl Into<Template>) -> Self {
        Self::new(ActionKind::Log {
            message: message.into(),
            level,
        })
    }

    pub fn execute(process: ExecuteProcess) -> Self {
        Self::new(ActionKind::ExecuteProcess(Box::new(process)))
    }

    pub fn group(actions: Vec<Action>) -> Self {
        Self::group_with(Vec::<(String, Template)>::new(), actions)
    }

    pub fn group_with<I, K, V>(bindings: I, actions: Vec<Action>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Template>,
    {
        Self::new(ActionKind::Group {
            bindings: bindings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            actions,
        })
    }

    pub fn include(source: impl DescriptionSource + 'static) -> Self {
        Self::include_with(source, Vec::<(String, Template)>::new())
    }

    pub fn include_with<I, K, V>(source: impl DescriptionSource + 'static, arguments: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Template>,
    {
        Self::new(ActionKind::Include(Include {
            source: Arc::new(source),
            arguments: arguments
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            required: true,
        }))
    }

    /// Mark an include as optional: load failures stay local to it.
    pub fn optional(mut self) -> Self {
        if let ActionKind::Include(inc) = &mut self.kind {
            inc.required = false;
        }
        self
    }

    /// Let a timer fire even after shutdown has begun.
    pub fn keep_on_shutdown(mut self) -> Self {
        if let ActionKind::Timer(timer) = &mut self.kind {
            timer.cancel_on_shutdown = false;
        }
        self
    }

    pub fn declare(name: impl Into<String>) -> Self {
        Self::new(ActionKind::DeclareArgument(DeclareArgument {
            name: name.into(),
            default: None,
            description: None,
            choices: Vec::new(),
        }))
    }

    pub fn declare_with_default(name: impl Into<String>, default: impl Into<Template>) -> Self {
        Self::new(ActionKind::DeclareArgument(DeclareArgument {
            name: name.into(),
            default: Some(default.into()),
            description: None,
            choices: Vec::new(),
        }))
    }

    pub fn declare_argument(decl: DeclareArgument) -> Self {
        Self::new(ActionKind::DeclareArgument(decl))
    }

    pub fn set(name: impl Into<String>, value: impl Into<Template>) -> Self {
        Self::new(ActionKind::SetVariable {
            name: name.into(),
            value: VariableValue::Text(value.into()),
            global: false,
        })
    }

    pub fn set_global(name: impl Into<String>, value: impl Into<Template>) -> Self {
        Self::new(ActionKind::SetVariable {
            name: name.into(),
            value: VariableValue::Text(value.into()),
            global: true,
        })
    }

    pub fn set_structured(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(ActionKind::SetVariable {
            name: name.into(),
            value: VariableValue::Structured(value),
            global: false,
        })
    }

    pub fn unset(name: impl Into<String>) -> Self {
        Self::new(ActionKind::UnsetVariable { name: name.into() })
    }

    pub fn set_env(name: impl Into<String>, value: impl Into<Template>) -> Self {
        Self::new(ActionKind::SetEnv {
            name: name.into(),
            value: value.into(),
        })
    }

    pub fn unset_env(name: impl Into<String>) -> Self {
        Self::new(ActionKind::UnsetEnv { name: name.into() })
    }

    pub fn register_handler<H>(handler: H) -> Self
    where
        H: EventHandler + Clone + Sync + 'static,
    {
        Self::new(ActionKind::RegisterEventHandler(HandlerFactory::new(handler)))
    }

    pub fn unregister_handler(name: impl Into<String>) -> Self {
        Self::new(ActionKind::UnregisterEventHandler { name: name.into() })
    }

    pub fn emit(kind: EventKind) -> Self {
        Self::new(ActionKind::EmitEvent(kind))
    }

    pub fn timer(period: impl Into<Template>, actions: Vec<Action>) -> Self {
        Self::new(ActionKind::Timer(Timer {
            period: period.into(),
            actions,
            cancel_on_shutdown: true,
        }))
    }

    pub fn shutdown() -> Self {
        Self::shutdown_because("shutdown action")
    }

    pub fn shutdown_because(reason: impl Into<Template>) -> Self {
        Self::new(ActionKind::Shutdown {
            reason: reason.into(),
        })
    }

    pub fn opaque<F>(f: F) -> Self
    where
        F: Fn(&LaunchContext) -> Result<Vec<Action>> + Send + Sync + 'static,
    {
        Self::new(ActionKind::OpaqueFunction(OpaqueFunction(Arc::new(f))))
    }
}

impl From<ExecuteProcess> for Action {
    fn from(value: ExecuteProcess) -> Self {
        Action::execute(value)
    }
}
