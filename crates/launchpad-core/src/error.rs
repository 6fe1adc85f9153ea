use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("argument '{name}' already declared with default {existing:?}, redeclared with {requested:?}")]
    DuplicateArgument {
        name: String,
        existing: Option<String>,
        requested: Option<String>,
    },

    #[error("undeclared variable: {0}")]
    UndeclaredVariable(String),

    #[error("invalid value '{value}' for argument '{name}': expected one of {choices:?}")]
    InvalidArgumentValue {
        name: String,
        value: String,
        choices: Vec<String>,
    },

    #[error("substitution failed: {0}")]
    SubstitutionResolution(String),

    #[error("condition evaluation failed: {0}")]
    ConditionEvaluation(String),

    #[error("failed to spawn process '{name}': {reason}")]
    ProcessSpawn { name: String, reason: String },

    #[error("process supervision error: {0}")]
    ProcessSupervision(String),

    #[error("event handler '{handler}' failed: {reason}")]
    Handler { handler: String, reason: String },

    #[error("include '{source_name}' failed: {reason}")]
    IncludeFailed { source_name: String, reason: String },

    #[error("child '{child}' failed: {reason}")]
    ChildFailed { child: String, reason: String },

    #[error("malformed launch argument '{0}': expected name:=value")]
    MalformedArgument(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl LaunchError {
    /// Stable machine-readable kind, used in the activation journal.
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchError::DuplicateArgument { .. } => "duplicate_argument",
            LaunchError::UndeclaredVariable(_) => "undeclared_variable",
            LaunchError::InvalidArgumentValue { .. } => "invalid_argument_value",
            LaunchError::SubstitutionResolution(_) => "substitution_resolution",
            LaunchError::ConditionEvaluation(_) => "condition_evaluation",
            LaunchError::ProcessSpawn { .. } => "process_spawn",
            LaunchError::ProcessSupervision(_) => "process_supervision",
            LaunchError::Handler { .. } => "handler",
            LaunchError::IncludeFailed { .. } => "include_failed",
            LaunchError::ChildFailed { .. } => "child_failed",
            LaunchError::MalformedArgument(_) => "malformed_argument",
            LaunchError::Config(_) => "config",
            LaunchError::Io(_) => "io",
            LaunchError::Yaml(_) => "yaml",
        }
    }
}

pub type Result<T> = std::result::Result<T, LaunchError>;
