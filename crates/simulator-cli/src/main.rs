// simulator-cli/src/main.rs
// ============================================================================
// Module: Simulator CLI Entry Point
// Description: Command dispatcher for local simulator runs.
// Purpose: Run suites, validate configs and check suite files.
// Dependencies: clap, serde_json, simulator-cli, simulator-config, tokio
// ============================================================================

//! ## Overview
//! `simulator run` starts an in-process fleet sized by the configuration,
//! runs the suite against the builtin target, writes `report.json` into the
//! report directory and echoes it on stdout. The exit code is non-zero when
//! any test failed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use simulator_cli::CliError;
use simulator_cli::commands::check_suite;
use simulator_cli::commands::load_suite;
use simulator_cli::commands::parse_overrides;
use simulator_cli::commands::report_json;
use simulator_cli::commands::run_suite;
use simulator_cli::commands::write_report;
use simulator_config::SimulatorConfig;

// ============================================================================
// SECTION: CLI Definitions
// ============================================================================

/// Top-level CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "simulator", version, disable_help_subcommand = true)]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a suite on a local fleet.
    Run(RunCommand),
    /// Configuration utilities.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Suite utilities.
    Suite {
        /// Suite subcommand.
        #[command(subcommand)]
        command: SuiteCommand,
    },
}

/// Shared config path argument.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Config file; defaults to `SIMULATOR_CONFIG`, then `simulator.toml`.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments of `simulator run`.
#[derive(Args, Debug)]
struct RunCommand {
    /// Suite file.
    #[arg(long, value_name = "PATH")]
    suite: PathBuf,
    /// Config selection.
    #[command(flatten)]
    config: ConfigArgs,
    /// Report directory overriding `report.output_dir`.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// Property applied to every test, as KEY=VALUE.
    #[arg(long = "property", value_name = "KEY=VALUE")]
    properties: Vec<String>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate a config file.
    Validate(ConfigArgs),
}

/// Suite subcommands.
#[derive(Subcommand, Debug)]
enum SuiteCommand {
    /// Parse a suite and validate every test against the builtin classes.
    Check(SuiteCheckCommand),
}

/// Arguments of `simulator suite check`.
#[derive(Args, Debug)]
struct SuiteCheckCommand {
    /// Suite file.
    #[arg(long, value_name = "PATH")]
    suite: PathBuf,
    /// Config selection.
    #[command(flatten)]
    config: ConfigArgs,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the command dispatcher.
fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(command) => command_run(&command),
        Commands::Config {
            command: ConfigCommand::Validate(command),
        } => command_config_validate(&command),
        Commands::Suite {
            command: SuiteCommand::Check(command),
        } => command_suite_check(&command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `simulator run`.
fn command_run(command: &RunCommand) -> Result<ExitCode, CliError> {
    let config = SimulatorConfig::load(command.config.config.as_deref())?;
    let overrides = parse_overrides(&command.properties)?;
    let suite = load_suite(&command.suite, &overrides)?;
    let log = config.logging.open_sink()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Output(format!("tokio runtime: {err}")))?;
    let report = runtime.block_on(run_suite(&suite, &config, log))?;
    let payload = report_json(&report)?;
    let directory = command.output.clone().unwrap_or_else(|| config.report_dir());
    write_report(&directory, &payload)?;
    write_stdout_bytes_with_newline(&payload)?;
    Ok(if report.all_completed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Executes `simulator config validate`.
fn command_config_validate(command: &ConfigArgs) -> Result<ExitCode, CliError> {
    SimulatorConfig::load(command.config.as_deref())?;
    write_stdout_bytes_with_newline(b"config ok")?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `simulator suite check`.
fn command_suite_check(command: &SuiteCheckCommand) -> Result<ExitCode, CliError> {
    let config = SimulatorConfig::load(command.config.config.as_deref())?;
    let suite = load_suite(&command.suite, &BTreeMap::new())?;
    let checked = check_suite(&suite, &config)?;
    let payload = serde_json::to_vec_pretty(&checked).map_err(|err| CliError::Output(err.to_string()))?;
    write_stdout_bytes_with_newline(&payload)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes raw bytes to stdout with a trailing newline.
fn write_stdout_bytes_with_newline(bytes: &[u8]) -> Result<(), CliError> {
    let mut buffer = bytes.to_vec();
    buffer.push(b'\n');
    std::io::stdout().write_all(&buffer).map_err(|err| CliError::Output(format!("stdout: {err}")))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = writeln!(std::io::stderr(), "{message}");
    ExitCode::FAILURE
}
