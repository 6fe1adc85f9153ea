//! Deferred text interpolation.
//!
//! A [`Template`] is an ordered list of [`Substitution`] fragments. Nothing
//! is resolved when the template is built; [`Template::perform`] walks the
//! fragments against the [`LaunchContext`] at the moment the owning action
//! activates, so a variable bound by an earlier sibling is visible.

use std::fmt;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::runtime::RuntimeFlavor;

use crate::context::LaunchContext;
use crate::error::{LaunchError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Substitution {
    /// Literal text.
    Text { text: String },
    /// Value of a context variable; undeclared is an error.
    Variable { name: String },
    /// Value of a context variable, or `default` when unbound.
    VariableOr { name: String, default: Template },
    /// Environment variable as seen by spawned processes (scope overrides
    /// first, then the host environment).
    Env {
        name: String,
        default: Option<Template>,
    },
    /// Output of a shell command, trailing whitespace trimmed.
    Command { command: Template },
    /// Nested concatenation.
    Concat { parts: Template },
}

impl Substitution {
    pub fn text(text: impl Into<String>) -> Self {
        Substitution::Text { text: text.into() }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Substitution::Variable { name: name.into() }
    }

    pub fn var_or(name: impl Into<String>, default: impl Into<Template>) -> Self {
        Substitution::VariableOr {
            name: name.into(),
            default: default.into(),
        }
    }

    pub fn env(name: impl Into<String>) -> Self {
        Substitution::Env {
            name: name.into(),
            default: None,
        }
    }

    pub fn env_or(name: impl Into<String>, default: impl Into<Template>) -> Self {
        Substitution::Env {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    pub fn command(command: impl Into<Template>) -> Self {
        Substitution::Command {
            command: command.into(),
        }
    }

    /// Resolve this fragment to text.
    pub fn perform(&self, ctx: &LaunchContext) -> Result<String> {
        match self {
            Substitution::Text { text } => Ok(text.clone()),
            Substitution::Variable { name } => match ctx.get(name) {
                Ok(value) => Ok(value.to_text()),
                Err(LaunchError::UndeclaredVariable(n)) => Err(LaunchError::SubstitutionResolution(
                    format!("variable '{n}' is not set"),
                )),
                Err(e) => Err(e),
            },
            Substitution::VariableOr { name, default } => match ctx.lookup(name) {
                Some(value) => Ok(value.to_text()),
                None => default.perform(ctx),
            },
            Substitution::Env { name, default } => match (ctx.env(name), default) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => default.perform(ctx),
                (None, None) => Err(LaunchError::SubstitutionResolution(format!(
                    "environment variable '{name}' is not set"
                ))),
            },
            Substitution::Command { command } => run_command(&command.perform(ctx)?),
            Substitution::Concat { parts } => parts.perform(ctx),
        }
    }
}

/// Runs `sh -c` to completion, blocking the calling action until it returns.
/// On a multi-threaded runtime the worker is handed off first so output
/// readers and the interrupt listener keep running; keep commands short.
fn run_command(command_line: &str) -> Result<String> {
    let run = || Command::new("sh").args(["-c", command_line]).output();
    let output = match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(run)
        }
        _ => run(),
    }
    .map_err(|e| {
        LaunchError::SubstitutionResolution(format!("command '{command_line}' failed to start: {e}"))
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LaunchError::SubstitutionResolution(format!(
            "command '{command_line}' exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A sequence of substitutions joined into one string on evaluation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(pub Vec<Substitution>);

static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();

fn reference_pattern() -> &'static Regex {
    REFERENCE_RE.get_or_init(|| {
        Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_.\-]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap()
    })
}

impl Template {
    /// A template holding `text` verbatim, no `$` references recognised.
    pub fn literal(text: impl Into<String>) -> Self {
        Template(vec![Substitution::text(text)])
    }

    /// Parse `$name` and `${name}` references into variable lookups.
    /// `$$` is a literal dollar sign.
    pub fn parse(input: &str) -> Self {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in reference_pattern().captures_iter(input) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            literal.push_str(&input[last..whole.start]);
            last = whole.end;

            match caps.get(1).or_else(|| caps.get(2)) {
                Some(name) => {
                    if !literal.is_empty() {
                        parts.push(Substitution::text(std::mem::take(&mut literal)));
                    }
                    parts.push(Substitution::var(name.as_str()));
                }
                None => literal.push('$'),
            }
        }
        literal.push_str(&input[last..]);
        if !literal.is_empty() || parts.is_empty() {
            parts.push(Substitution::text(literal));
        }
        Template(parts)
    }

    pub fn push(mut self, sub: Substitution) -> Self {
        self.0.push(sub);
        self
    }

    pub fn fragments(&self) -> &[Substitution] {
        &self.0
    }

    /// Resolve every fragment, in order, and join them.
    pub fn perform(&self, ctx: &LaunchContext) -> Result<String> {
        let resolved = self
            .0
            .iter()
            .map(|s| s.perform(ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(resolved.concat())
    }
}

impl From<&str> for Template {
    fn from(value: &str) -> Self {
        Template::parse(value)
    }
}

impl From<String> for Template {
    fn from(value: String) -> Self {
        Template::parse(&value)
    }
}

impl From<Substitution> for Template {
    fn from(value: Substitution) -> Self {
        Template(vec![value])
    }
}

impl From<Vec<Substitution>> for Template {
    fn from(value: Vec<Substitution>) -> Self {
        Template(value)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for sub in &self.0 {
            match sub {
                Substitution::Text { text } => write!(f, "{}", text.replace('$', "$$"))?,
                Substitution::Variable { name } => write!(f, "${{{name}}}")?,
                Substitution::VariableOr { name, default } => write!(f, "${{{name}:-{default}}}")?,
                Substitution::Env { name, .. } => write!(f, "$(env {name})")?,
                Substitution::Command { command } => write!(f, "$(command {command})")?,
                Substitution::Concat { parts } => write!(f, "{parts}")?,
            }
        }
        Ok(())
    }
}

/// Evaluate a list of templates into a list of strings (e.g. an argv).
pub fn perform_all(templates: &[Template], ctx: &LaunchContext) -> Result<Vec<String>> {
    templates.iter().map(|t| t.perform(ctx)).collect()
}
