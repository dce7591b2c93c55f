//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use hotfolder_watcher::core::config::{
    Config, FolderOverrides, FolderSettings, effective_settings, folder_override_path,
};
use hotfolder_watcher::core::errors::HfwError;
use hotfolder_watcher::core::paths::resolve_absolute_path;
use hotfolder_watcher::daemon::dispatcher::{Dispatcher, OncePass};
use hotfolder_watcher::daemon::signals::SignalHandler;
use hotfolder_watcher::hotfolder::metadata::NullMetadataWriter;
use hotfolder_watcher::hotfolder::worker::CycleOutcome;
use hotfolder_watcher::logger::dual::{ActivityLoggerHandle, LoggerConfig, spawn_logger};
use hotfolder_watcher::logger::jsonl::format_epoch;
use hotfolder_watcher::store::StateStore;

/// Hotfolder Watcher: settle, then deliver each dropped job exactly once.
#[derive(Debug, Parser)]
#[command(
    name = "hfw",
    author,
    version,
    about = "Hotfolder Watcher - debounced, exactly-once job delivery",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Watch every configured root until SIGTERM/SIGINT.
    Run,
    /// Run one cycle over every hotfolder, then exit.
    Once,
    /// Show the recorded seen/processed state of one hotfolder.
    State(StateArgs),
    /// View and check configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct StateArgs {
    /// Hotfolder directory.
    #[arg(value_name = "FOLDER")]
    folder: PathBuf,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
    /// Print a per-folder override document with the effective values.
    Example(ExampleArgs),
}

#[derive(Debug, Clone, Args)]
struct ExampleArgs {
    /// Hotfolder whose current overrides should be reflected (defaults if omitted).
    #[arg(value_name = "FOLDER")]
    folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<HfwError> for CliError {
    fn from(err: HfwError) -> Self {
        if err.is_config() {
            Self::User(err.to_string())
        } else {
            Self::Runtime(err.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run => run_daemon(cli),
        Command::Once => run_once(cli),
        Command::State(args) => run_state(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run / once
// ---------------------------------------------------------------------------

fn start_logger(config: &Config) -> Result<(ActivityLoggerHandle, std::thread::JoinHandle<()>), CliError> {
    spawn_logger(LoggerConfig::from_config(config)).map_err(CliError::from)
}

fn stop_logger(logger: &ActivityLoggerHandle, join: std::thread::JoinHandle<()>) {
    logger.shutdown();
    let _ = join.join();
}

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    config.require_roots()?;
    let roots = config.hotfolders.roots.clone();
    let (logger, logger_join) = start_logger(&config)?;

    let dispatcher = match Dispatcher::new(config, logger.clone(), Arc::new(NullMetadataWriter)) {
        Ok(dispatcher) => dispatcher,
        Err(err) => {
            stop_logger(&logger, logger_join);
            return Err(err.into());
        }
    };
    let signals = SignalHandler::new();

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{} {} watching {} root(s); SIGHUP reloads, SIGUSR1 rediscovers",
                "hfw".bold(),
                env!("CARGO_PKG_VERSION"),
                roots.len()
            );
            for root in &roots {
                println!("  {}", root.display());
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "run",
                "event": "started",
                "roots": roots.iter().map(|r| r.to_string_lossy()).collect::<Vec<_>>(),
            }))?;
        }
    }

    let result = dispatcher.run(&signals);
    drop(dispatcher);
    let dropped = logger.dropped_events();
    stop_logger(&logger, logger_join);
    if dropped > 0 {
        eprintln!("hfw: {dropped} log event(s) dropped under back-pressure");
    }
    result.map_err(CliError::from)
}

fn run_once(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    config.require_roots()?;
    let (logger, logger_join) = start_logger(&config)?;
    let pass = Dispatcher::new(config, logger.clone(), Arc::new(NullMetadataWriter))
        .map(|dispatcher| dispatcher.cycle_all_once());
    stop_logger(&logger, logger_join);
    let pass = pass?;

    let failures = count_failures(&pass);
    match output_mode(cli) {
        OutputMode::Human => print_once_human(&pass),
        OutputMode::Json => write_json_line(&once_payload(&pass))?,
    }
    if failures > 0 {
        return Err(CliError::Partial(format!("{failures} folder(s) reported failures")));
    }
    Ok(())
}

fn count_failures(pass: &OncePass) -> usize {
    pass.outcomes
        .iter()
        .filter(|(_, outcome)| match outcome {
            Ok(CycleOutcome::Completed(report)) => {
                report.transfer_failures > 0 || !report.sweep.failures.is_empty()
            }
            Ok(CycleOutcome::FolderVanished) => false,
            Ok(CycleOutcome::ConfigRejected(_)) | Err(_) => true,
        })
        .count()
}

fn print_once_human(pass: &OncePass) {
    for root in &pass.missing_roots {
        println!("{} root missing: {}", "!".yellow(), root.display());
    }
    if pass.outcomes.is_empty() {
        println!("No hotfolders found.");
        return;
    }
    for (folder, outcome) in &pass.outcomes {
        let name = folder.display().to_string();
        match outcome {
            Ok(CycleOutcome::Completed(report)) => {
                let transferred = report.transferred.len();
                let line = format!(
                    "transferred {transferred}, waiting {}, new {}, reset {}, purged {}",
                    report.waiting,
                    report.arrivals,
                    report.resets,
                    report.sweep.purged.len()
                );
                if report.transfer_failures > 0 {
                    println!(
                        "{} {name}: {line}, {} failed",
                        "x".red(),
                        report.transfer_failures
                    );
                } else {
                    println!("{} {name}: {line}", "+".green());
                }
                for job in &report.transferred {
                    println!("    -> {job}");
                }
            }
            Ok(CycleOutcome::FolderVanished) => {
                println!("{} {name}: vanished during the pass", "!".yellow());
            }
            Ok(CycleOutcome::ConfigRejected(err)) => {
                println!("{} {name}: configuration rejected: {err}", "x".red());
            }
            Err(err) => println!("{} {name}: {err}", "x".red()),
        }
    }
}

fn once_payload(pass: &OncePass) -> Value {
    let folders: Vec<Value> = pass
        .outcomes
        .iter()
        .map(|(folder, outcome)| {
            let folder = folder.to_string_lossy();
            match outcome {
                Ok(CycleOutcome::Completed(report)) => json!({
                    "folder": folder,
                    "status": "completed",
                    "transferred": report.transferred,
                    "moved_items": report.moved_items,
                    "waiting": report.waiting,
                    "arrivals": report.arrivals,
                    "resets": report.resets,
                    "reconciled": report.reconciled,
                    "containers_pruned": report.containers_pruned,
                    "transfer_failures": report.transfer_failures,
                    "purged": report.sweep.purged,
                }),
                Ok(CycleOutcome::FolderVanished) => json!({
                    "folder": folder,
                    "status": "vanished",
                }),
                Ok(CycleOutcome::ConfigRejected(err)) => json!({
                    "folder": folder,
                    "status": "config_rejected",
                    "error_code": err.code(),
                    "error": err.to_string(),
                }),
                Err(err) => json!({
                    "folder": folder,
                    "status": "error",
                    "error_code": err.code(),
                    "error": err.to_string(),
                }),
            }
        })
        .collect();
    json!({
        "command": "once",
        "missing_roots": pass.missing_roots.iter().map(|r| r.to_string_lossy()).collect::<Vec<_>>(),
        "folders": folders,
    })
}

// ---------------------------------------------------------------------------
// state
// ---------------------------------------------------------------------------

fn run_state(cli: &Cli, args: &StateArgs) -> Result<(), CliError> {
    let folder = resolve_absolute_path(&args.folder);
    let db_path = StateStore::path_for(&folder);
    if !db_path.is_file() {
        return Err(CliError::User(format!(
            "no state database for {} (expected {})",
            folder.display(),
            db_path.display()
        )));
    }
    let store = StateStore::open(&db_path)?;
    let seen = store.all_seen()?;
    let processed = store.all_processed()?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", folder.display().to_string().bold());
            println!("  database: {}", db_path.display());
            println!("\n  {} ({})", "seen".bold(), seen.len());
            for rec in &seen {
                println!(
                    "    {:<40} seen {}  mtime {}",
                    rec.item_id,
                    format_epoch(rec.seen_time),
                    format_epoch(rec.mtime)
                );
            }
            println!("\n  {} ({})", "processed".bold(), processed.len());
            for rec in &processed {
                let status = if rec.ready_for_deletion {
                    "emptied".yellow()
                } else {
                    "delivered".green()
                };
                println!(
                    "    {:<40} {status} {}  mtime {}",
                    rec.item_id,
                    format_epoch(rec.processed_time),
                    format_epoch(rec.mtime)
                );
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "state",
                "folder": folder.to_string_lossy(),
                "database": db_path.to_string_lossy(),
                "seen": serde_json::to_value(&seen)?,
                "processed": serde_json::to_value(&processed)?,
            }))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults and HFW_* variables will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => println!("{}", to_toml(&config)?),
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                let roots_ok = config.require_roots().is_ok();

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                        if !roots_ok {
                            println!(
                                "  {} no hotfolder roots configured; `hfw run` will refuse to start",
                                "warning:".yellow()
                            );
                        }
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                            "has_roots": roots_ok,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("{} {e}", "Configuration is INVALID:".red()),
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error_code": e.code(),
                            "error": e.to_string(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
        Some(ConfigCommand::Example(example)) => {
            let config = Config::load(cli.config.as_deref())?;
            let (settings, source): (FolderSettings, Option<PathBuf>) = match &example.folder {
                Some(folder) => {
                    let folder = resolve_absolute_path(folder);
                    let settings = effective_settings(&folder, &config)?;
                    (settings, Some(folder_override_path(&folder)))
                }
                None => (config.defaults.clone(), None),
            };
            let overrides = FolderOverrides::from_settings(&settings);

            match output_mode(cli) {
                OutputMode::Human => {
                    if let Some(path) = &source {
                        println!("# {}", path.display());
                    }
                    print!("{}", to_toml(&overrides)?);
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config example",
                        "override_path": source.map(|p| p.to_string_lossy().into_owned()),
                        "overrides": serde_json::to_value(&overrides)?,
                    }))?;
                }
            }
            Ok(())
        }
    }
}

fn to_toml<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    toml::to_string_pretty(value).map_err(|e| CliError::Runtime(format!("serialize config: {e}")))
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("HFW_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
