use crate::context::WritePolicy;
use crate::error::Result;
use crate::paths;
use launchpad_process::OutputMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// FailurePolicy
// ---------------------------------------------------------------------------

/// What an action failure does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure, keep activating siblings, exit 0.
    #[default]
    Continue,
    /// Treat the first failure as fatal: shut down and exit non-zero.
    FailFast,
}

// ---------------------------------------------------------------------------
// LaunchConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Seconds between SIGTERM and SIGKILL during shutdown.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: f64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub write_policy: WritePolicy,
    #[serde(default)]
    pub allow_redeclare: bool,
    /// Install a Ctrl-C handler for the duration of the run.
    #[serde(default = "default_handle_signals")]
    pub handle_signals: bool,
    /// Output mode for processes that don't pick one.
    #[serde(default)]
    pub default_output: OutputMode,
}

fn default_grace_period() -> f64 {
    5.0
}

fn default_handle_signals() -> bool {
    true
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
            failure_policy: FailurePolicy::default(),
            write_policy: WritePolicy::default(),
            allow_redeclare: false,
            handle_signals: default_handle_signals(),
            default_output: OutputMode::default(),
        }
    }
}

impl LaunchConfig {
    /// Load `<root>/.launchpad/config.yaml`, falling back to defaults when
    /// the file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: LaunchConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Grace period as a `Duration`. Negative or non-finite values clamp to
    /// zero; [`LaunchConfig::validate`] reports them.
    pub fn grace_period(&self) -> Duration {
        if self.grace_period_secs.is_finite() && self.grace_period_secs > 0.0 {
            Duration::from_secs_f64(self.grace_period_secs)
        } else {
            Duration::ZERO
        }
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !self.grace_period_secs.is_finite() || self.grace_period_secs < 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "grace_period_secs must be a non-negative number, got {}",
                    self.grace_period_secs
                ),
            });
        } else if self.grace_period_secs == 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "grace_period_secs is 0: processes are killed without a chance to exit"
                    .to_string(),
            });
        } else if self.grace_period_secs > 300.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "grace_period_secs={} (>300 is unusual)",
                    self.grace_period_secs
                ),
            });
        }

        if !self.handle_signals {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "handle_signals is off: Ctrl-C will not shut child processes down"
                    .to_string(),
            });
        }

        warnings
    }
}
