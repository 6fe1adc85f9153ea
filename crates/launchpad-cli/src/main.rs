mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, exec::ExecArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "launchpad",
    about = "Declarative launch orchestration: start, watch and shut down process groups",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .launchpad/ or .git/)
    #[arg(long, global = true, env = "LAUNCHPAD_ROOT")]
    root: Option<PathBuf>,

    /// Config file to use instead of <root>/.launchpad/config.yaml
    #[arg(long, global = true, env = "LAUNCHPAD_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run commands under supervision until they exit or shutdown completes
    Exec(ExecArgs),

    /// Inspect, validate and initialize the launch configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Exec(_) => tracing::Level::INFO,
        Commands::Config { .. } => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Exec(args) => cmd::exec::run(&root, config_path, args, cli.json),
        Commands::Config { subcommand } => {
            cmd::config::run(&root, config_path, subcommand, cli.json).map(|()| 0)
        }
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
