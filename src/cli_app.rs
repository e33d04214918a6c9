//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use question_bank_janitor::audit::Auditor;
use question_bank_janitor::category::protected::ProtectedSetBuilder;
use question_bank_janitor::core::config::Config;
use question_bank_janitor::core::errors::QbjError;
use question_bank_janitor::core::model::{CONTEXT_LEVEL_SYSTEM, CategoryId, ContextScope};
use question_bank_janitor::dedup::deleter::DeletionConfig;
use question_bank_janitor::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use question_bank_janitor::logger::jsonl::JsonlConfig;
use question_bank_janitor::pipeline::{
    DedupRequest, PipelineOptions, detect_and_delete, resolve_scope, run_pipeline,
};
use question_bank_janitor::store::sqlite::SqliteQuestionBank;

/// Question Bank Janitor: duplicate question cleanup for LMS question banks.
#[derive(Debug, Parser)]
#[command(
    name = "qbj",
    author,
    version,
    about = "Question Bank Janitor - duplicate question cleanup",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override the question bank database path.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
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
    /// Rebuild the protected-category snapshot from random-set filters.
    BuildProtected(BuildProtectedArgs),
    /// Detect duplicate questions and delete unused copies.
    Dedup(DedupArgs),
    /// Run the consistency checks.
    Audit(AuditArgs),
    /// Build protected set, dedup, then audit, with a transcript file.
    Run(DedupArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

impl Command {
    const fn label(&self) -> &'static str {
        match self {
            Self::BuildProtected(_) => "build-protected",
            Self::Dedup(_) => "dedup",
            Self::Audit(_) => "audit",
            Self::Run(_) => "run",
            Self::Completions(_) => "completions",
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ScopeArgs {
    /// Context level: 10 (system) or 50 (course). Required for `dedup`.
    #[arg(long, value_name = "LEVEL", allow_negative_numbers = true)]
    context_level: Option<i64>,
    /// Course id, required with context level 50.
    #[arg(long, value_name = "ID", default_value_t = 0, allow_negative_numbers = true)]
    instance: i64,
}

impl ScopeArgs {
    /// Resolve the flags to a scope; `default_level` stands in for a missing `--context-level`.
    fn resolve(&self, default_level: Option<i64>) -> Result<ContextScope, QbjError> {
        let level = self
            .context_level
            .or(default_level)
            .ok_or_else(|| QbjError::InvalidScope {
                details: "--context-level is required (10 = system, 50 = course)".to_string(),
            })?;
        ContextScope::from_level(level, self.instance)
    }
}

#[derive(Debug, Clone, Args)]
struct BuildProtectedArgs {
    /// Snapshots to keep after this build (default from config).
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    retain: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct DedupArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Restrict to one question category.
    #[arg(long, value_name = "ID", value_parser = clap::value_parser!(i64).range(1..))]
    category: Option<CategoryId>,
    /// Stop after deleting this many questions.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    max_deletions: Option<u64>,
    /// Process at most this many duplicate fingerprints.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    max_fingerprints: Option<u64>,
    /// 1 = report only, 0 = delete.
    #[arg(long, value_name = "0|1", value_parser = clap::value_parser!(u8).range(0..=1))]
    dry_run: Option<u8>,
    /// Never delete questions in categories random slots draw from.
    #[arg(long)]
    respect_random_sets: bool,
}

#[derive(Debug, Clone, Args)]
struct AuditArgs {
    #[command(flatten)]
    scope: ScopeArgs,
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
    /// Store or environment failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
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
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::User(_) => "QBJ-CLI-USER",
            Self::Runtime(_) | Self::Io(_) => "QBJ-CLI-RUNTIME",
            Self::Internal(_) | Self::Json(_) => "QBJ-CLI-INTERNAL",
        }
    }
}

impl From<QbjError> for CliError {
    fn from(err: QbjError) -> Self {
        if err.is_user_error() {
            Self::User(err.to_string())
        } else if matches!(err, QbjError::Serialization { .. }) {
            Self::Internal(err.to_string())
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

    if let Command::Completions(args) = &cli.command {
        let mut command = Cli::command();
        let binary_name = command.get_name().to_string();
        generate(args.shell, &mut command, binary_name, &mut io::stdout());
        return Ok(());
    }

    let mode = output_mode(cli);
    let config = load_config(cli)?;
    let logger = build_logger(&config, mode);
    let label = cli.command.label();
    let started = Instant::now();

    logger.send(ActivityEvent::RunStarted {
        command: label.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: config.stable_hash()?,
    });

    let result = match &cli.command {
        Command::BuildProtected(args) => run_build_protected(mode, &config, &logger, args),
        Command::Dedup(args) => run_dedup(mode, &config, &logger, args),
        Command::Audit(args) => run_audit(mode, &config, &logger, args),
        Command::Run(args) => run_full_pipeline(mode, &config, &logger, args),
        Command::Completions(_) => Ok(()),
    };

    if let Err(err) = &result {
        logger.send(ActivityEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }
    logger.send(ActivityEvent::RunFinished {
        command: label.to_string(),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    });
    result
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database.path.clone_from(db);
    }
    Ok(config)
}

fn build_logger(config: &Config, mode: OutputMode) -> ActivityLoggerHandle {
    let logger = ActivityLoggerHandle::new(Some(JsonlConfig::at(&config.paths.jsonl_log)));
    match mode {
        OutputMode::Human => logger.with_stdout_echo(),
        OutputMode::Json => logger,
    }
}

fn open_bank(config: &Config) -> Result<SqliteQuestionBank, CliError> {
    Ok(SqliteQuestionBank::open(
        &config.database.path,
        config.database.busy_timeout_ms,
    )?)
}

fn to_count(value: Option<u64>, fallback: usize) -> usize {
    value.map_or(fallback, |v| usize::try_from(v).unwrap_or(usize::MAX))
}

/// Merge flags over the `[cleanup]` section. Rejects a bad or missing scope before any I/O.
fn dedup_request(
    config: &Config,
    args: &DedupArgs,
    default_level: Option<i64>,
) -> Result<DedupRequest, CliError> {
    let scope = args.scope.resolve(default_level)?;
    let cleanup = &config.cleanup;
    let mut deletion = DeletionConfig::from(cleanup);
    deletion.max_deletions = to_count(args.max_deletions, cleanup.max_deletions);
    if let Some(flag) = args.dry_run {
        deletion.dry_run = flag == 1;
    }
    Ok(DedupRequest {
        scope,
        category: args.category,
        max_fingerprints: to_count(args.max_fingerprints, cleanup.max_fingerprints),
        deletion,
        respect_random_sets: args.respect_random_sets || cleanup.respect_random_sets,
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn run_build_protected(
    mode: OutputMode,
    config: &Config,
    logger: &ActivityLoggerHandle,
    args: &BuildProtectedArgs,
) -> Result<(), CliError> {
    let retain = to_count(args.retain, config.snapshot.retain);
    let mut bank = open_bank(config)?;
    let report = ProtectedSetBuilder::new(logger.clone()).build(&mut bank, retain)?;

    match mode {
        OutputMode::Human => {
            println!(
                "{} {} categories in snapshot {} ({} older snapshots pruned)",
                "Protected set built:".green().bold(),
                report.snapshot.len(),
                report.snapshot.run_id,
                report.pruned_snapshots
            );
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "build-protected",
                "run_id": report.snapshot.run_id,
                "created_at": report.snapshot.created_at,
                "categories": report.snapshot.len(),
                "stats": report.stats,
                "pruned_snapshots": report.pruned_snapshots,
            }))?;
        }
    }
    Ok(())
}

fn run_dedup(
    mode: OutputMode,
    config: &Config,
    logger: &ActivityLoggerHandle,
    args: &DedupArgs,
) -> Result<(), CliError> {
    let request = dedup_request(config, args, None)?;
    let mut bank = open_bank(config)?;
    let outcome = detect_and_delete(&mut bank, &request, None, logger)?;

    match mode {
        OutputMode::Human => {
            let report = &outcome.report;
            if report.fingerprints_rolled_back > 0 {
                println!(
                    "{}",
                    format!(
                        "{} fingerprint(s) rolled back; see the activity log for details",
                        report.fingerprints_rolled_back
                    )
                    .yellow()
                );
            }
            if report.budget_exhausted {
                println!("{}", "Deletion budget reached; run again to continue.".yellow());
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "dedup",
                "scope": request.scope,
                "context_id": outcome.scope.context_id,
                "category": outcome.scope.category_id,
                "respect_random_sets": request.respect_random_sets,
                "duplicate_fingerprints": outcome.duplicate_fingerprints,
                "shield_run_id": outcome.shield_run_id,
                "report": outcome.report,
                "duration_ms": u64::try_from(outcome.report.duration.as_millis()).unwrap_or(u64::MAX),
            }))?;
        }
    }
    Ok(())
}

fn run_audit(
    mode: OutputMode,
    config: &Config,
    logger: &ActivityLoggerHandle,
    args: &AuditArgs,
) -> Result<(), CliError> {
    let scope = args.scope.resolve(Some(CONTEXT_LEVEL_SYSTEM))?;
    let bank = open_bank(config)?;
    let context = resolve_scope(&bank, scope, None)?;
    let report = Auditor::new(logger.clone()).run(&bank, context.context_id, None);

    match mode {
        OutputMode::Human => {
            let verdict = if report.is_consistent() {
                "consistent".green()
            } else {
                "inconsistent".red()
            };
            println!("Audit: {}", verdict.bold());
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "audit",
                "scope": scope,
                "context_id": context.context_id,
                "consistent": report.is_consistent(),
                "report": report,
            }))?;
        }
    }
    Ok(())
}

fn run_full_pipeline(
    mode: OutputMode,
    config: &Config,
    logger: &ActivityLoggerHandle,
    args: &DedupArgs,
) -> Result<(), CliError> {
    let options = PipelineOptions {
        dedup: dedup_request(config, args, Some(CONTEXT_LEVEL_SYSTEM))?,
        snapshot_retain: config.snapshot.retain,
        log_dir: config.paths.log_dir.clone(),
    };
    let mut bank = open_bank(config)?;
    let report = run_pipeline(&mut bank, &options, logger)?;

    match mode {
        OutputMode::Human => {
            if !report.audit.failures.is_empty() {
                println!(
                    "{}",
                    format!("{} audit check(s) failed", report.audit.failures.len()).yellow()
                );
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "run",
                "transcript": report.transcript,
                "protected": {
                    "run_id": report.protected.snapshot.run_id,
                    "categories": report.protected.snapshot.len(),
                    "stats": report.protected.stats,
                    "pruned_snapshots": report.protected.pruned_snapshots,
                },
                "dedup": report.dedup,
                "audit": report.audit,
                "consistent": report.audit.is_consistent(),
            }))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("QBJ_OUTPUT_FORMAT").ok();
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
