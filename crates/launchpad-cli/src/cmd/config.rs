use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use launchpad_core::{paths, LaunchConfig, WarnLevel};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Write a default config to <root>/.launchpad/config.yaml
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    config_path: Option<&Path>,
    subcmd: ConfigSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, config_path, json),
        ConfigSubcommand::Validate => validate(root, config_path, json),
        ConfigSubcommand::Init { force } => init(root, force),
    }
}

fn load(root: &Path, config_path: Option<&Path>) -> anyhow::Result<LaunchConfig> {
    match config_path {
        Some(path) => LaunchConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => LaunchConfig::load(root).context("failed to load config"),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load(root, config_path)?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load(root, config_path)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(root: &Path, force: bool) -> anyhow::Result<()> {
    let path = paths::config_path(root);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    LaunchConfig::default()
        .save(root)
        .context("failed to save config")?;
    println!("Wrote {}", path.display());
    Ok(())
}
