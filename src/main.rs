use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use patchguard::approval::{ApprovalPipeline, ChangeState, RiskTier};
use patchguard::backup::BackupManager;
use patchguard::config::Config;
use patchguard::emergency::EmergencyRollback;
use patchguard::sandbox::SandboxTester;
use patchguard::scanner::CommandScanner;
use patchguard::session::{SessionController, SessionStats, TracingSink};
use patchguard::store::ChangeStore;
use patchguard::strategy::StrategyRegistry;
use patchguard::testing::CommandTestRunner;
use patchguard::util::truncate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "patchguard",
    about = "Guarded, reversible auto-fixes for static-analysis findings",
    version
)]
struct Args {
    /// Path to the repository (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full fix session: scan, batch fixes, validate, re-scan
    Run {
        /// Print the session report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List proposed changes and their lifecycle states
    Changes,
    /// Draft a proposed change and run its safety checks
    Propose {
        /// Repo-relative file the change targets
        #[arg(long)]
        file: PathBuf,
        /// File holding the proposed replacement content
        #[arg(long)]
        content: PathBuf,
        /// Risk tier: low, medium, high, critical
        #[arg(long, default_value = "medium")]
        risk: String,
        /// Why this change is worth making
        #[arg(long, default_value = "")]
        rationale: String,
    },
    /// Explicitly approve a change awaiting approval
    Approve { id: Uuid },
    /// Explicitly reject a change awaiting approval
    Reject { id: Uuid },
    /// Advance an approved change: sandbox, apply, validate
    Promote { id: Uuid },
    /// Emergency: restore every applied change from its snapshot
    RollbackAll,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let repo_root = args.path.canonicalize().context("repository path")?;
    let config = Config::load(&repo_root);
    if let Err(err) = patchguard::config::ensure_state_dir_ignored(&repo_root) {
        tracing::warn!(%err, "could not add state dir to gitignore");
    }

    match args.command {
        Command::Run { json } => run_session(&repo_root, &config, json),
        Command::Changes => list_changes(&repo_root),
        Command::Propose {
            file,
            content,
            risk,
            rationale,
        } => propose(&repo_root, &config, &file, &content, &risk, rationale),
        Command::Approve { id } => {
            let change = pipeline_ctx(&repo_root, &config, |pipeline| pipeline.approve(id))?;
            println!("{} {}", change.id, change.state.label());
            Ok(())
        }
        Command::Reject { id } => {
            let change = pipeline_ctx(&repo_root, &config, |pipeline| pipeline.reject(id))?;
            println!("{} {}", change.id, change.state.label());
            Ok(())
        }
        Command::Promote { id } => promote(&repo_root, &config, id),
        Command::RollbackAll => rollback_all(&repo_root),
    }
}

fn run_session(repo_root: &Path, config: &Config, json: bool) -> Result<()> {
    let scanner = CommandScanner::new(
        repo_root,
        config.scanner.clone(),
        config.scanner_timeout(),
        config.severity_map(),
    );
    let test_runner =
        CommandTestRunner::new(repo_root, config.test_command.clone(), config.test_timeout());
    let registry = StrategyRegistry::with_builtins();
    let backups = BackupManager::new(repo_root);
    let sink = TracingSink;

    let controller = SessionController::new(
        repo_root, config, &registry, &backups, &scanner, &test_runner, &sink,
    );
    let stats = controller.run_session(&config.rule_priority)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_summary(&stats);
    }

    // A rollback is a successful safety outcome; only an indeterminate run
    // (tool failure) exits non-zero.
    if stats.indeterminate {
        std::process::exit(2);
    }
    Ok(())
}

fn print_summary(stats: &SessionStats) {
    if stats.indeterminate {
        println!("Result: could not determine (tool failure)");
        for note in &stats.notes {
            println!("  note: {}", note);
        }
        return;
    }

    if stats.errors_before == 0 {
        println!("Result: nothing to fix (clean scan)");
        return;
    }

    println!("Result: session completed");
    println!("  errors before : {}", stats.errors_before);
    println!("  errors after  : {}", stats.errors_after);
    println!("  fixed         : {}", stats.fixed);
    println!("  failed        : {}", stats.failed);
    println!("  files touched : {}", stats.files_touched);
    println!(
        "  rollbacks     : {}{}",
        stats.rollbacks,
        if stats.rollback_occurred() {
            " (batch reverted, tree unchanged)"
        } else {
            ""
        }
    );
    for note in &stats.notes {
        println!("  note: {}", note);
    }
}

fn list_changes(repo_root: &Path) -> Result<()> {
    let store = ChangeStore::new(repo_root);
    let changes = store.list()?;
    if changes.is_empty() {
        println!("No proposed changes.");
        return Ok(());
    }
    for change in changes {
        println!(
            "{}  {:18}  {:8}  {}  {}",
            change.id,
            change.state.label(),
            change.risk.label(),
            change.file.display(),
            truncate(&change.rationale, 60)
        );
    }
    Ok(())
}

fn parse_risk(risk: &str) -> Result<RiskTier> {
    match risk {
        "low" => Ok(RiskTier::Low),
        "medium" => Ok(RiskTier::Medium),
        "high" => Ok(RiskTier::High),
        "critical" => Ok(RiskTier::Critical),
        other => anyhow::bail!("unknown risk tier '{}'", other),
    }
}

fn propose(
    repo_root: &Path,
    config: &Config,
    file: &Path,
    content_path: &Path,
    risk: &str,
    rationale: String,
) -> Result<()> {
    let risk = parse_risk(risk)?;
    let proposed = fs::read_to_string(content_path)
        .with_context(|| format!("reading {}", content_path.display()))?;

    let change = pipeline_ctx(repo_root, config, |pipeline| {
        let change = pipeline.draft(file, proposed, risk, rationale)?;
        pipeline.run_safety_checks(change.id)
    })?;

    println!("{} {}", change.id, change.state.label());
    if change.state == ChangeState::Rejected {
        for result in change.safety_results.iter().filter(|r| !r.passed) {
            println!("  failed check: {}", result.name);
        }
    }
    Ok(())
}

fn promote(repo_root: &Path, config: &Config, id: Uuid) -> Result<()> {
    let change = pipeline_ctx(repo_root, config, |pipeline| {
        let change = pipeline.run_sandbox(id)?;
        if change.state != ChangeState::SandboxPassed {
            return Ok(change);
        }
        pipeline.apply(id)?;
        pipeline.validate_change(id)
    })?;
    println!("{} {}", change.id, change.state.label());
    Ok(())
}

fn rollback_all(repo_root: &Path) -> Result<()> {
    let store = ChangeStore::new(repo_root);
    let backups = BackupManager::new(repo_root);
    let outcome = EmergencyRollback::new(&store, &backups).rollback_all()?;
    println!("Rolled back {} change(s)", outcome.rolled_back);
    for (id, reason) in &outcome.failed {
        println!("  failed: {} ({})", id, reason);
    }
    Ok(())
}

/// Build the approval pipeline with its real collaborators and run one
/// operation against it.
fn pipeline_ctx<T>(
    repo_root: &Path,
    config: &Config,
    op: impl FnOnce(&ApprovalPipeline) -> patchguard::error::Result<T>,
) -> Result<T> {
    let store = ChangeStore::new(repo_root);
    let backups = BackupManager::new(repo_root);
    let sandbox = SandboxTester::new(repo_root, config.sandbox_timeout());
    let scanner = CommandScanner::new(
        repo_root,
        config.scanner.clone(),
        config.scanner_timeout(),
        config.severity_map(),
    );
    let test_runner =
        CommandTestRunner::new(repo_root, config.test_command.clone(), config.test_timeout());

    let pipeline = ApprovalPipeline::new(
        repo_root,
        &store,
        &backups,
        &sandbox,
        &scanner,
        &test_runner,
        config.auto_approve_low_risk,
    );
    Ok(op(&pipeline)?)
}
