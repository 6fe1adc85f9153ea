use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("executable not found: {program}")]
    ExecutableNotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("empty command line")]
    EmptyCommand,

    #[error("unknown process: {0}")]
    UnknownProcess(u64),

    #[error("failed to deliver signal {signal} to pid {pid}: {source}")]
    Signal {
        pid: u32,
        signal: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("signal delivery is not supported on this platform")]
    Unsupported,
}
