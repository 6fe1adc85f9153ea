//! `launchpad-process`: OS child-process supervision.
//!
//! This is the only crate in the workspace that touches process creation
//! and signal delivery. It is deliberately ignorant of descriptions,
//! substitutions and events: callers hand it a fully-resolved
//! [`ProcessSpec`] and receive [`SupervisorEvent`]s back.
//!
//! # Architecture
//!
//! ```text
//! ProcessSpec
//!     │
//!     ▼
//! ProcessSupervisor::spawn   ← tokio::process::Command, pid registered
//!     │
//!     ├── reader task (stdout) ─┐
//!     ├── reader task (stderr) ─┼─► EventSink (thread-safe handoff)
//!     └── waiter task ──────────┘        │
//!                                        ▼
//!                        owner loop → ProcessSupervisor::observe
//! ```

pub mod error;
pub(crate) mod process;
pub mod supervisor;
pub mod types;

pub use error::SupervisorError;
pub use process::resolve_program;
pub use supervisor::{ProcessHandle, ProcessSupervisor, SIGINT, SIGKILL, SIGTERM};
pub use types::{
    EventSink, ExitStatus, OutputMode, OutputStream, ProcessId, ProcessSpec, SupervisorEvent,
};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, SupervisorError>;
