//! Description trees and the sources that supply them to include actions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::action::Action;
use crate::context::LaunchContext;
use crate::error::{LaunchError, Result};

/// A tree of actions to launch. Lives for one launch invocation.
#[derive(Debug, Clone, Default)]
pub struct Description {
    pub actions: Vec<Action>,
}

impl Description {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, action: impl Into<Action>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn push(&mut self, action: impl Into<Action>) {
        self.actions.push(action.into());
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl From<Vec<Action>> for Description {
    fn from(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}

impl FromIterator<Action> for Description {
    fn from_iter<T: IntoIterator<Item = Action>>(iter: T) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}

/// Supplies the subtree for an include action.
///
/// `load` runs at activation time with the including context (include
/// arguments are not yet bound), so a source may pick its subtree based on
/// the surrounding configuration.
pub trait DescriptionSource: Send + Sync {
    fn name(&self) -> String;
    fn load(&self, ctx: &LaunchContext) -> Result<Description>;
}

impl DescriptionSource for Description {
    fn name(&self) -> String {
        "inline".to_string()
    }

    fn load(&self, _ctx: &LaunchContext) -> Result<Description> {
        Ok(self.clone())
    }
}

type LoadFn = dyn Fn(&LaunchContext) -> Result<Description> + Send + Sync;

/// A named source backed by a closure. Front ends that parse authoring
/// syntaxes plug in through this.
#[derive(Clone)]
pub struct FnSource {
    name: String,
    load: Arc<LoadFn>,
}

impl FnSource {
    pub fn new<F>(name: impl Into<String>, load: F) -> Self
    where
        F: Fn(&LaunchContext) -> Result<Description> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            load: Arc::new(load),
        }
    }
}

impl fmt::Debug for FnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource").field("name", &self.name).finish()
    }
}

impl DescriptionSource for FnSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn load(&self, ctx: &LaunchContext) -> Result<Description> {
        (self.load)(ctx)
    }
}

/// A source that must exist on disk before a front end can parse it.
/// Missing files fail the include; parsing is delegated to `parse`.
#[derive(Clone)]
pub struct FileSource {
    path: PathBuf,
    parse: Arc<dyn Fn(&Path, &str) -> Result<Description> + Send + Sync>,
}

impl FileSource {
    pub fn new<F>(path: impl Into<PathBuf>, parse: F) -> Self
    where
        F: Fn(&Path, &str) -> Result<Description> + Send + Sync + 'static,
    {
        Self {
            path: path.into(),
            parse: Arc::new(parse),
        }
    }
}

impl DescriptionSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self, _ctx: &LaunchContext) -> Result<Description> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| LaunchError::IncludeFailed {
            source_name: self.name(),
            reason: e.to_string(),
        })?;
        (self.parse)(&self.path, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_description_loads_itself() {
        let desc = Description::new().with(Action::log("a")).with(Action::log("b"));
        let loaded = desc.load(&LaunchContext::new()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.actions[0].id, desc.actions[0].id);
    }

    #[test]
    fn fn_source_sees_the_including_context() {
        let source = FnSource::new("picker", |ctx| {
            let n: usize = ctx.get_text("count")?.parse().unwrap_or(0);
            Ok((0..n).map(|i| Action::log(format!("item {i}"))).collect())
        });
        let mut ctx = LaunchContext::new();
        ctx.set("count", "3");
        assert_eq!(source.load(&ctx).unwrap().len(), 3);
        assert_eq!(source.name(), "picker");
    }

    #[test]
    fn file_source_reports_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = FileSource::new(dir.path().join("absent.launch"), |_, _| {
            Ok(Description::new())
        });
        let err = source.load(&LaunchContext::new()).unwrap_err();
        assert!(matches!(err, LaunchError::IncludeFailed { .. }));
    }

    #[test]
    fn file_source_hands_contents_to_parser() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("two.launch");
        std::fs::write(&path, "first\nsecond\n").unwrap();
        let source = FileSource::new(&path, |_, text| {
            Ok(text.lines().map(Action::log).collect())
        });
        assert_eq!(source.load(&LaunchContext::new()).unwrap().len(), 2);
    }
}
