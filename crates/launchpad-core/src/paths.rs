use std::path::{Path, PathBuf};

pub const LAUNCHPAD_DIR: &str = ".launchpad";
pub const CONFIG_FILE: &str = ".launchpad/config.yaml";

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}
