use crate::context::LaunchContext;
use crate::error::{LaunchError, Result};
use crate::substitution::Template;

/// Boolean predicate gating an action's activation.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// True when the template evaluates to a truthy string.
    If(Template),
    /// True when the template evaluates to a falsy string.
    Unless(Template),
    Equals(Template, Template),
    NotEquals(Template, Template),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn if_true(t: impl Into<Template>) -> Self {
        Condition::If(t.into())
    }

    pub fn unless(t: impl Into<Template>) -> Self {
        Condition::Unless(t.into())
    }

    pub fn equals(a: impl Into<Template>, b: impl Into<Template>) -> Self {
        Condition::Equals(a.into(), b.into())
    }

    pub fn not_equals(a: impl Into<Template>, b: impl Into<Template>) -> Self {
        Condition::NotEquals(a.into(), b.into())
    }

    pub fn evaluate(&self, ctx: &LaunchContext) -> Result<bool> {
        match self {
            Condition::If(t) => truthy(&resolve(t, ctx)?),
            Condition::Unless(t) => truthy(&resolve(t, ctx)?).map(|b| !b),
            Condition::Equals(a, b) => Ok(resolve(a, ctx)? == resolve(b, ctx)?),
            Condition::NotEquals(a, b) => Ok(resolve(a, ctx)? != resolve(b, ctx)?),
            Condition::All(cs) => {
                for c in cs {
                    if !c.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any(cs) => {
                for c in cs {
                    if c.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(c) => c.evaluate(ctx).map(|b| !b),
        }
    }
}

/// Substitution failures inside a condition are condition failures.
fn resolve(t: &Template, ctx: &LaunchContext) -> Result<String> {
    t.perform(ctx)
        .map_err(|e| LaunchError::ConditionEvaluation(e.to_string()))
}

/// Interpret a string as a boolean.
pub fn truthy(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(LaunchError::ConditionEvaluation(format!(
            "'{other}' is not a boolean (expected true/false, 1/0, yes/no, on/off)"
        ))),
    }
}
