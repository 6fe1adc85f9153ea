//! `launchpad-core`: declarative launch orchestration.
//!
//! A [`Description`] is a tree of [`Action`]s. The [`Executor`] activates it
//! against a [`LaunchContext`], supervises the processes it starts, and
//! dispatches [`Event`]s to registered [`EventHandler`]s until no work is
//! left or shutdown completes.
//!
//! ```no_run
//! use launchpad_core::{Action, Description, ExecuteProcess, LaunchConfig};
//!
//! # async fn demo() {
//! let description = Description::new()
//!     .with(Action::declare_with_default("duration", "1"))
//!     .with(Action::execute(
//!         ExecuteProcess::new(["sleep", "$duration"])
//!             .on_exit(vec![Action::log("done"), Action::shutdown()]),
//!     ));
//! let report = launchpad_core::launch(description, LaunchConfig::default(), Vec::<(String, String)>::new()).await;
//! assert_eq!(report.exit_code(), 0);
//! # }
//! ```

pub mod action;
pub mod condition;
pub mod config;
pub mod context;
pub mod description;
pub mod error;
pub mod event;
pub mod executor;
pub mod handler;
pub mod io;
pub mod paths;
pub mod substitution;

pub use action::{Action, ActionId, ActionKind, DeclareArgument, ExecuteProcess, LogLevel};
pub use condition::Condition;
pub use config::{ConfigWarning, FailurePolicy, LaunchConfig, WarnLevel};
pub use context::{parse_launch_arguments, ArgumentDecl, LaunchContext, Scope, Value, WritePolicy};
pub use description::{Description, DescriptionSource, FileSource, FnSource};
pub use error::{LaunchError, Result};
pub use event::{Event, EventKind, ProcessInfo};
pub use executor::{ActionRecord, ActionState, Executor, LaunchReport, TimelineEntry};
pub use handler::{
    Body, EventHandler, HandlerRegistry, OnAllExited, OnEvent, OnProcessExit, OnProcessIo,
    OnProcessStart, OnShutdown, Target,
};
pub use launchpad_process::{ExitStatus, OutputMode, OutputStream, ProcessId};
pub use substitution::{Substitution, Template};

/// Run `description` to completion with the given configuration and
/// launch-time arguments.
pub async fn launch<I, K, V>(description: Description, config: LaunchConfig, args: I) -> LaunchReport
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    Executor::new(config)
        .with_launch_arguments(args)
        .run(description)
        .await
}
