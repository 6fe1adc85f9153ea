//! The launch context: scoped variables, environment overrides and the
//! event queue shared by every action activation.
//!
//! Scopes form an explicit stack. Group and include actions push a scope on
//! entry and pop it on exit through [`ScopeGuard`], which restores the
//! depth on every exit path. Lookup walks innermost → outermost; writes
//! target the innermost scope.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, Result};
use crate::event::Event;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A bound variable: plain text or structured configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Structured(serde_json::Value),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Structured(serde_json::Value::String(s)) => Some(s),
            Value::Structured(_) => None,
        }
    }

    /// Text form used when the value is interpolated. Structured values
    /// render as compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Structured(serde_json::Value::String(s)) => s.clone(),
            Value::Structured(v) => v.to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Structured(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// One level of the binding stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub vars: HashMap<String, Value>,
    /// `Some(v)` sets, `None` removes the variable for spawned processes.
    pub env: HashMap<String, Option<String>>,
}

impl Scope {
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Scope {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            env: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArgumentDecl {
    pub name: String,
    pub default: Option<String>,
    pub description: Option<String>,
    /// Allowed values; empty means unrestricted.
    pub choices: Vec<String>,
}

impl ArgumentDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// How conflicting writes to the same variable by different handlers within
/// one dispatch turn are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Registration order decides; the last handler's write stands.
    #[default]
    LastWins,
    /// The first handler to write a name in a turn keeps it.
    FirstWins,
}

/// Parse `name:=value` (or `name=value`) launch arguments. Later
/// occurrences of a name override earlier ones.
pub fn parse_launch_arguments<S: AsRef<str>>(args: &[S]) -> Result<Vec<(String, String)>> {
    let mut parsed: Vec<(String, String)> = Vec::new();
    for arg in args {
        let arg = arg.as_ref();
        let (name, value) = arg
            .split_once(":=")
            .or_else(|| arg.split_once('='))
            .ok_or_else(|| LaunchError::MalformedArgument(arg.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(LaunchError::MalformedArgument(arg.to_string()));
        }
        parsed.retain(|(n, _)| n != name);
        parsed.push((name.to_string(), value.to_string()));
    }
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// LaunchContext
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct LaunchContext {
    scopes: Vec<Scope>,
    arguments: BTreeMap<String, ArgumentDecl>,
    launch_arguments: BTreeMap<String, String>,
    allow_redeclare: bool,
    events: VecDeque<Event>,
    current_event: Option<Event>,
    shutting_down: bool,
    write_policy: WritePolicy,
    /// Per-turn record of which writer first touched each name.
    turn_writes: Option<HashMap<String, usize>>,
    writer: Option<usize>,
}

impl Default for LaunchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchContext {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
            arguments: BTreeMap::new(),
            launch_arguments: BTreeMap::new(),
            allow_redeclare: false,
            events: VecDeque::new(),
            current_event: None,
            shutting_down: false,
            write_policy: WritePolicy::default(),
            turn_writes: None,
            writer: None,
        }
    }

    /// Bind launch-time arguments in the root scope.
    pub fn with_launch_arguments<I, K, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in args {
            let (k, v) = (k.into(), v.into());
            self.scopes[0].vars.insert(k.clone(), Value::Text(v.clone()));
            self.launch_arguments.insert(k, v);
        }
        self
    }

    pub fn set_allow_redeclare(&mut self, allow: bool) {
        self.allow_redeclare = allow;
    }

    pub fn set_write_policy(&mut self, policy: WritePolicy) {
        self.write_policy = policy;
    }

    // ── Scopes ───────────────────────────────────────────────────────────

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn push_existing(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    /// Discard the innermost scope. The root scope is never popped.
    pub fn pop_scope(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// Push `scope` and return a guard that restores the current depth when
    /// dropped.
    pub fn scoped(&mut self, scope: Scope) -> ScopeGuard<'_> {
        let depth = self.scopes.len();
        self.scopes.push(scope);
        ScopeGuard { ctx: self, depth }
    }

    /// Drop every scope above `depth`. The root scope always survives.
    pub(crate) fn restore_depth(&mut self, depth: usize) {
        self.scopes.truncate(depth.max(1));
    }

    /// Flatten all visible bindings into one scope. Used to activate deferred
    /// bodies (on-exit, timers) with the bindings visible when they were
    /// scheduled.
    pub fn snapshot(&self) -> Scope {
        let mut flat = Scope::default();
        for scope in &self.scopes {
            flat.vars
                .extend(scope.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            flat.env
                .extend(scope.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        flat
    }

    // ── Variables ────────────────────────────────────────────────────────

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|s| s.vars.get(name))
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.lookup(name)
            .ok_or_else(|| LaunchError::UndeclaredVariable(name.to_string()))
    }

    pub fn get_text(&self, name: &str) -> Result<String> {
        self.get(name).map(Value::to_text)
    }

    /// Bind `name` in the innermost scope. Returns `false` when the write
    /// was dropped by the [`WritePolicy`].
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> bool {
        let name = name.into();
        if !self.admit_write(&name) {
            return false;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.insert(name, value.into());
        }
        true
    }

    /// Bind `name` in the root scope, visible after every group exits.
    pub fn set_global(&mut self, name: impl Into<String>, value: impl Into<Value>) -> bool {
        let name = name.into();
        if !self.admit_write(&name) {
            return false;
        }
        self.scopes[0].vars.insert(name, value.into());
        true
    }

    /// Remove `name` from the innermost scope that binds it.
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.scopes
            .iter_mut()
            .rev()
            .find(|s| s.vars.contains_key(name))
            .and_then(|s| s.vars.remove(name))
    }

    fn admit_write(&mut self, name: &str) -> bool {
        let (Some(writes), Some(writer)) = (self.turn_writes.as_mut(), self.writer) else {
            return true;
        };
        match writes.get(name) {
            Some(first) if *first != writer && self.write_policy == WritePolicy::FirstWins => {
                tracing::debug!(name, "write dropped: an earlier handler set it this turn");
                false
            }
            Some(_) => true,
            None => {
                writes.insert(name.to_string(), writer);
                true
            }
        }
    }

    // ── Arguments ────────────────────────────────────────────────────────

    /// Declare a launch argument.
    ///
    /// Identical redeclaration keeps the first declaration; a conflicting default fails with
    /// [`LaunchError::DuplicateArgument`] unless redeclaration is allowed.
    /// The default is bound in the innermost scope whenever nothing visible
    /// binds the name (launch-time overrides win), including on redeclaration
    /// after the scope of the first declaration has been popped.
    pub fn declare(&mut self, decl: ArgumentDecl) -> Result<()> {
        let identical = match self.arguments.get(&decl.name) {
            Some(existing) if existing.default != decl.default && !self.allow_redeclare => {
                return Err(LaunchError::DuplicateArgument {
                    name: decl.name,
                    existing: existing.default.clone(),
                    requested: decl.default,
                });
            }
            Some(existing) => existing.default == decl.default,
            None => false,
        };

        let effective = self
            .lookup(&decl.name)
            .map(Value::to_text)
            .or_else(|| decl.default.clone());
        if let (Some(value), false) = (&effective, identical) {
            if !decl.choices.is_empty() && !decl.choices.contains(value) {
                return Err(LaunchError::InvalidArgumentValue {
                    name: decl.name,
                    value: value.clone(),
                    choices: decl.choices,
                });
            }
        }

        if self.lookup(&decl.name).is_none() {
            if let Some(default) = &decl.default {
                if let Some(scope) = self.scopes.last_mut() {
                    scope.vars.insert(decl.name.clone(), Value::text(default.clone()));
                }
            }
        }
        if !identical {
            self.arguments.insert(decl.name.clone(), decl);
        }
        Ok(())
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentDecl> {
        self.arguments.get(name)
    }

    pub fn arguments(&self) -> impl Iterator<Item = &ArgumentDecl> {
        self.arguments.values()
    }

    /// Launch-time arguments that no declaration claimed.
    pub fn unused_launch_arguments(&self) -> Vec<String> {
        self.launch_arguments
            .keys()
            .filter(|k| !self.arguments.contains_key(*k))
            .cloned()
            .collect()
    }

    // ── Environment ──────────────────────────────────────────────────────

    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.env.insert(name.into(), Some(value.into()));
        }
    }

    pub fn unset_env(&mut self, name: impl Into<String>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.env.insert(name.into(), None);
        }
    }

    /// Environment variable as a spawned process would see it.
    pub fn env(&self, name: &str) -> Option<String> {
        match self.scopes.iter().rev().find_map(|s| s.env.get(name)) {
            Some(overridden) => overridden.clone(),
            None => std::env::var(name).ok(),
        }
    }

    /// Visible environment overrides, inner scopes winning.
    pub fn env_overrides(&self) -> BTreeMap<String, Option<String>> {
        let mut merged = BTreeMap::new();
        for scope in &self.scopes {
            merged.extend(scope.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    /// The full environment a process spawned now would inherit.
    pub fn process_env(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        for (name, value) in self.env_overrides() {
            match value {
                Some(v) => {
                    env.insert(name, v);
                }
                None => {
                    env.remove(&name);
                }
            }
        }
        env
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Queue an event; it is dispatched on a later scheduling pass.
    pub fn emit(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// The event whose handlers are currently being run, if any.
    pub fn current_event(&self) -> Option<&Event> {
        self.current_event.as_ref()
    }

    pub(crate) fn set_current_event(&mut self, event: Option<Event>) {
        self.current_event = event;
    }

    pub(crate) fn begin_turn(&mut self) {
        self.turn_writes = Some(HashMap::new());
    }

    pub(crate) fn set_writer(&mut self, writer: Option<usize>) {
        self.writer = writer;
    }

    pub(crate) fn end_turn(&mut self) {
        self.turn_writes = None;
        self.writer = None;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub(crate) fn mark_shutting_down(&mut self) {
        self.shutting_down = true;
    }
}

// ---------------------------------------------------------------------------
// ScopeGuard
// ---------------------------------------------------------------------------

/// Restores the scope depth recorded at creation when dropped.
pub struct ScopeGuard<'a> {
    ctx: &'a mut LaunchContext,
    depth: usize,
}

impl Deref for ScopeGuard<'_> {
    type Target = LaunchContext;

    fn deref(&self) -> &LaunchContext {
        self.ctx
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut LaunchContext {
        self.ctx
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.ctx.scopes.truncate(self.depth.max(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_launch_arguments_accepts_both_forms() {
        let args = parse_launch_arguments(&["who:=ana", "where=home", "url:=a=b", "who:=bob"]).unwrap();
        assert_eq!(
            args,
            vec![
                ("where".to_string(), "home".to_string()),
                ("url".to_string(), "a=b".to_string()),
                ("who".to_string(), "bob".to_string()),
            ]
        );
    }

    #[test]
    fn parse_launch_arguments_rejects_malformed() {
        assert!(matches!(
            parse_launch_arguments(&["novalue"]),
            Err(LaunchError::MalformedArgument(_))
        ));
        assert!(matches!(
            parse_launch_arguments(&[":=x"]),
            Err(LaunchError::MalformedArgument(_))
        ));
    }

    #[test]
    fn lookup_walks_innermost_first() {
        let mut ctx = LaunchContext::new();
        ctx.set("x", "outer");
        ctx.push_scope();
        ctx.set("x", "inner");
        assert_eq!(ctx.get_text("x").unwrap(), "inner");
        ctx.pop_scope();
        assert_eq!(ctx.get_text("x").unwrap(), "outer");
    }

    #[test]
    fn get_unknown_is_undeclared() {
        let ctx = LaunchContext::new();
        assert!(matches!(
            ctx.get("nope"),
            Err(LaunchError::UndeclaredVariable(n)) if n == "nope"
        ));
    }

    #[test]
    fn root_scope_is_never_popped() {
        let mut ctx = LaunchContext::new();
        assert!(ctx.pop_scope().is_none());
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn guard_restores_depth_even_after_extra_pushes() {
        let mut ctx = LaunchContext::new();
        {
            let mut guard = ctx.scoped(Scope::default());
            guard.push_scope();
            guard.push_scope();
            assert_eq!(guard.depth(), 4);
        }
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn guard_restores_depth_on_panic() {
        let mut ctx = LaunchContext::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ctx.scoped(Scope::default());
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn launch_argument_overrides_default() {
        let mut ctx = LaunchContext::new().with_launch_arguments([("who", "ana")]);
        ctx.declare(ArgumentDecl::new("who").with_default("bob")).unwrap();
        ctx.declare(ArgumentDecl::new("where").with_default("home"))
            .unwrap();
        assert_eq!(ctx.get_text("who").unwrap(), "ana");
        assert_eq!(ctx.get_text("where").unwrap(), "home");
    }

    #[test]
    fn declaration_without_default_or_override_fails_on_read() {
        let mut ctx = LaunchContext::new();
        ctx.declare(ArgumentDecl::new("needed")).unwrap();
        assert!(matches!(
            ctx.get("needed"),
            Err(LaunchError::UndeclaredVariable(_))
        ));
    }

    #[test]
    fn identical_redeclaration_is_idempotent() {
        let mut ctx = LaunchContext::new();
        ctx.declare(ArgumentDecl::new("a").with_default("1")).unwrap();
        ctx.declare(ArgumentDecl::new("a").with_default("1")).unwrap();
        assert_eq!(ctx.arguments().count(), 1);
    }

    #[test]
    fn conflicting_redeclaration_fails() {
        let mut ctx = LaunchContext::new();
        ctx.declare(ArgumentDecl::new("a").with_default("1")).unwrap();
        let err = ctx
            .declare(ArgumentDecl::new("a").with_default("2"))
            .unwrap_err();
        assert!(matches!(err, LaunchError::DuplicateArgument { .. }));
        assert_eq!(ctx.get_text("a").unwrap(), "1");
    }

    #[test]
    fn conflicting_redeclaration_allowed_when_configured() {
        let mut ctx = LaunchContext::new();
        ctx.set_allow_redeclare(true);
        ctx.declare(ArgumentDecl::new("a").with_default("1")).unwrap();
        ctx.declare(ArgumentDecl::new("a").with_default("2")).unwrap();
        assert_eq!(ctx.argument("a").unwrap().default.as_deref(), Some("2"));
        // the first binding is already visible, so it is kept
        assert_eq!(ctx.get_text("a").unwrap(), "1");
    }

    #[test]
    fn choices_are_enforced() {
        let mut ctx = LaunchContext::new().with_launch_arguments([("mode", "fast")]);
        let decl = ArgumentDecl {
            name: "mode".into(),
            default: Some("safe".into()),
            description: None,
            choices: vec!["safe".into(), "debug".into()],
        };
        let err = ctx.declare(decl).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArgumentValue { .. }));
        assert!(ctx.argument("mode").is_none());
    }

    #[test]
    fn unused_launch_arguments_are_reported() {
        let mut ctx = LaunchContext::new().with_launch_arguments([("used", "1"), ("stray", "2")]);
        ctx.declare(ArgumentDecl::new("used")).unwrap();
        assert_eq!(ctx.unused_launch_arguments(), vec!["stray".to_string()]);
    }

    #[test]
    fn env_overrides_are_scoped() {
        let mut ctx = LaunchContext::new();
        ctx.set_env("LAUNCHPAD_CTX_ENV", "root");
        {
            let mut guard = ctx.scoped(Scope::default());
            guard.unset_env("LAUNCHPAD_CTX_ENV");
            assert_eq!(guard.env("LAUNCHPAD_CTX_ENV"), None);
            assert_eq!(
                guard.env_overrides().get("LAUNCHPAD_CTX_ENV"),
                Some(&None)
            );
        }
        assert_eq!(ctx.env("LAUNCHPAD_CTX_ENV").as_deref(), Some("root"));
    }

    #[test]
    fn snapshot_flattens_visible_bindings() {
        let mut ctx = LaunchContext::new();
        ctx.set("a", "root");
        ctx.set("b", "root");
        ctx.push_scope();
        ctx.set("b", "inner");
        let snap = ctx.snapshot();
        assert_eq!(snap.vars.get("a"), Some(&Value::text("root")));
        assert_eq!(snap.vars.get("b"), Some(&Value::text("inner")));
    }

    #[test]
    fn structured_values_render_as_json() {
        let mut ctx = LaunchContext::new();
        ctx.set("cfg", serde_json::json!({"rate": 10}));
        assert_eq!(ctx.get_text("cfg").unwrap(), r#"{"rate":10}"#);
    }

    #[test]
    fn first_wins_policy_drops_later_handler_writes() {
        let mut ctx = LaunchContext::new();
        ctx.set_write_policy(WritePolicy::FirstWins);
        ctx.begin_turn();
        ctx.set_writer(Some(0));
        assert!(ctx.set("v", "first"));
        assert!(ctx.set("v", "first-again"));
        ctx.set_writer(Some(1));
        assert!(!ctx.set("v", "second"));
        ctx.end_turn();
        assert_eq!(ctx.get_text("v").unwrap(), "first-again");
        assert!(ctx.set("v", "after turn"));
    }

    #[test]
    fn last_wins_policy_keeps_latest_write() {
        let mut ctx = LaunchContext::new();
        ctx.begin_turn();
        ctx.set_writer(Some(0));
        ctx.set("v", "first");
        ctx.set_writer(Some(1));
        assert!(ctx.set("v", "second"));
        ctx.end_turn();
        assert_eq!(ctx.get_text("v").unwrap(), "second");
    }
}
