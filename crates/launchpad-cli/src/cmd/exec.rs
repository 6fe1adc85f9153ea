use crate::output::{print_json, render_table};
use anyhow::Context;
use clap::{Args, ValueEnum};
use launchpad_core::{
    parse_launch_arguments, Action, ActionState, Description, ExecuteProcess, FailurePolicy,
    LaunchConfig, LaunchReport, OnProcessExit, OutputMode, Target, WarnLevel,
};
use std::path::Path;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputArg {
    /// Forward lines to the log, tagged with the process name
    Log,
    /// Pass lines through to this terminal unchanged
    Screen,
    /// Keep lines and print them after the run
    Capture,
    /// Drop output entirely
    Discard,
}

impl From<OutputArg> for OutputMode {
    fn from(value: OutputArg) -> Self {
        match value {
            OutputArg::Log => OutputMode::Log,
            OutputArg::Screen => OutputMode::Screen,
            OutputArg::Capture => OutputMode::Capture,
            OutputArg::Discard => OutputMode::Discard,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command to run; `$name` references resolve against --arg values
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,

    /// Extra command line run through `sh -c` (repeatable)
    #[arg(long = "sh", value_name = "LINE")]
    pub shell: Vec<String>,

    /// Launch argument as name:=value (repeatable)
    #[arg(long = "arg", short = 'a', value_name = "NAME:=VALUE")]
    pub args: Vec<String>,

    /// Seconds between SIGTERM and SIGKILL during shutdown
    #[arg(long, env = "LAUNCHPAD_GRACE", value_name = "SECS")]
    pub grace: Option<f64>,

    /// Shut down and exit non-zero on the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Where process output goes
    #[arg(long, value_enum)]
    pub output: Option<OutputArg>,

    /// Restart commands after they exit, waiting this many seconds
    #[arg(long, value_name = "SECS")]
    pub respawn: Option<f64>,

    /// Shut everything down as soon as any command exits
    #[arg(long)]
    pub stop_on_exit: bool,

    /// Shut down after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Returns the launch's exit code.
pub fn run(root: &Path, config_path: Option<&Path>, args: ExecArgs, json: bool) -> anyhow::Result<i32> {
    let config = effective_config(root, config_path, &args)?;
    let launch_args = parse_launch_arguments(&args.args).context("invalid --arg")?;
    let description = build_description(&args, &launch_args)?;

    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let report = rt.block_on(launchpad_core::launch(description, config, launch_args));

    if json {
        print_json(&report)?;
    } else {
        print_summary(&report);
    }
    Ok(report.exit_code())
}

fn effective_config(
    root: &Path,
    config_path: Option<&Path>,
    args: &ExecArgs,
) -> anyhow::Result<LaunchConfig> {
    let mut config = match config_path {
        Some(path) => LaunchConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LaunchConfig::load(root).context("failed to load config")?,
    };

    if let Some(grace) = args.grace {
        config.grace_period_secs = grace;
    }
    if args.fail_fast {
        config.failure_policy = FailurePolicy::FailFast;
    }
    if let Some(output) = args.output {
        config.default_output = output.into();
    }

    let errors: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .map(|w| w.message)
        .collect();
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration: {}", errors.join("; "));
    }
    Ok(config)
}

fn build_description(args: &ExecArgs, launch_args: &[(String, String)]) -> anyhow::Result<Description> {
    if args.command.is_empty() && args.shell.is_empty() {
        anyhow::bail!("nothing to run: pass a command after `--` or use --sh");
    }

    let mut description = Description::new();
    for (name, _) in launch_args {
        description.push(Action::declare(name.as_str()));
    }
    if args.stop_on_exit {
        description.push(Action::register_handler(OnProcessExit::new(
            Target::Any,
            vec![Action::shutdown_because("a supervised process exited")],
        )));
    }

    let mut processes = Vec::new();
    if !args.command.is_empty() {
        processes.push(ExecuteProcess::new(args.command.iter().map(String::as_str)));
    }
    for line in &args.shell {
        processes.push(ExecuteProcess::new([line.as_str()]).shell());
    }
    for mut process in processes {
        if let Some(delay) = args.respawn {
            if !delay.is_finite() || delay < 0.0 {
                anyhow::bail!("--respawn must be a non-negative number of seconds");
            }
            process = process.respawn(delay);
        }
        description.push(Action::execute(process));
    }

    if let Some(timeout) = args.timeout {
        description.push(Action::timer(
            timeout.to_string(),
            vec![Action::shutdown_because("timeout elapsed")],
        ));
    }
    Ok(description)
}

// ---------------------------------------------------------------------------
// Human-readable summary (stderr, so stdout stays process output)
// ---------------------------------------------------------------------------

fn print_summary(report: &LaunchReport) {
    for captured in &report.captured {
        for (_, line) in &captured.lines {
            println!("{line}");
        }
    }

    let rows: Vec<Vec<String>> = report
        .records_of("execute_process")
        .into_iter()
        .map(|r| {
            vec![
                r.label.clone(),
                state_name(&r.state).to_string(),
                r.note.clone().unwrap_or_default(),
            ]
        })
        .collect();
    if !rows.is_empty() {
        eprintln!("{}", render_table(&["PROCESS", "STATE", "RESULT"], &rows));
    }

    for error in &report.errors {
        eprintln!("[{}] {}", error.kind, error.message);
    }
    if let Some(reason) = &report.shutdown_reason {
        eprintln!("shutdown: {reason}");
    }
    if report.forced {
        eprintln!("grace period elapsed: processes were killed");
    }
}

fn state_name(state: &ActionState) -> &'static str {
    match state {
        ActionState::Pending => "pending",
        ActionState::EvaluatingCondition => "evaluating",
        ActionState::Skipped => "skipped",
        ActionState::Activated => "activated",
        ActionState::Running => "running",
        ActionState::Completed => "completed",
        ActionState::Failed { .. } => "failed",
    }
}
