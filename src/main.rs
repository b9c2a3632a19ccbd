//! Autoheal CLI entry point.
//!
//! Provides `run`, `teach`, and `list` subcommands for healing a failed run
//! from its log, recording a new mapping, or inspecting the mapping table.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn, Instrument};

use autoheal::config::{load_config, HealerConfig};
use autoheal::escalation::{EscalationTarget, Escalator, GitHubEscalator};
use autoheal::heal::{self, RunReport};
use autoheal::logging;
use autoheal::publisher::{GitPublisher, Publisher};
use autoheal::store::{MappingStore, RemediationAction};
use autoheal::teach::{self, TeachReport, TeachRequest};

/// Autoheal: apply known fixes for CI failures and escalate unknown ones.
#[derive(Parser)]
#[command(name = "autoheal", version, about)]
struct Cli {
    /// Path to the optional TOML configuration file.
    #[arg(long, global = true, default_value = "autoheal.toml")]
    config: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Match a failure log, apply the recorded fix, and commit it.
    Run {
        /// Failure log to analyse.
        #[arg(long)]
        log: PathBuf,
        /// Mapping store database.
        #[arg(long)]
        db: PathBuf,
        /// GitHub `owner/repo` for issues when nothing matches.
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repo: Option<String>,
        /// GitHub token for issues when nothing matches.
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Working tree to patch and commit in.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Commit without pushing.
        #[arg(long)]
        no_push: bool,
    },
    /// Record a new mapping and commit the store.
    Teach {
        /// Regex or literal that identifies the failure.
        #[arg(long)]
        signature: String,
        /// File to patch when the signature matches.
        #[arg(long)]
        file: PathBuf,
        /// Text to search for.
        #[arg(long, allow_hyphen_values = true)]
        search: String,
        /// Replacement text.
        #[arg(long, allow_hyphen_values = true)]
        replace: String,
        /// Mapping store database.
        #[arg(long, default_value = "healer/db.sqlite")]
        db: PathBuf,
        /// Repository the store is committed in.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Push the commit after recording it.
        #[arg(long, conflicts_with = "no_publish")]
        push: bool,
        /// Only insert the mapping; do not commit the store.
        #[arg(long)]
        no_publish: bool,
    },
    /// List recorded mappings and their hit counts.
    List {
        /// Mapping store database.
        #[arg(long, default_value = "healer/db.sqlite")]
        db: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let _logging_guard = logging::init(&config.logging)?;

    match cli.command {
        Command::Run {
            log,
            db,
            repo,
            token,
            workdir,
            no_push,
        } => {
            let target = EscalationTarget {
                repository: repo,
                token,
            };
            let span = logging::command_span("run", &db, Some(&log));
            handle_run(&config, &log, &db, &workdir, target, no_push)
                .instrument(span)
                .await
        }
        Command::Teach {
            signature,
            file,
            search,
            replace,
            db,
            workdir,
            push,
            no_publish,
        } => {
            let request = TeachRequest {
                signature,
                file,
                search,
                replace,
            };
            let span = logging::command_span("teach", &db, None);
            handle_teach(&config, &request, &db, &workdir, push, no_publish)
                .instrument(span)
                .await
        }
        Command::List { db } => {
            let span = logging::command_span("list", &db, None);
            handle_list(&config, &db).instrument(span).await
        }
    }
}

/// Heal one failed run from its log.
async fn handle_run(
    config: &HealerConfig,
    log: &Path,
    db: &Path,
    workdir: &Path,
    target: EscalationTarget,
    no_push: bool,
) -> anyhow::Result<ExitCode> {
    // Missing inputs mean there is nothing to do, not a failure.
    if !log.exists() {
        info!(log = %log.display(), "log file not found, nothing to do");
        return Ok(ExitCode::SUCCESS);
    }
    let raw = tokio::fs::read(log)
        .await
        .with_context(|| format!("failed to read log {}", log.display()))?;
    let log_text = String::from_utf8_lossy(&raw);

    if !db.exists() {
        info!(db = %db.display(), "mapping store not found, nothing to do");
        return Ok(ExitCode::SUCCESS);
    }
    let store = MappingStore::open(db, config.store.busy_timeout())
        .await
        .with_context(|| format!("failed to open mapping store {}", db.display()))?;

    let publisher =
        GitPublisher::new(workdir, &config.publish).with_push(config.publish.push && !no_push);
    let escalator = GitHubEscalator::from_target(&config.escalation, &target)
        .context("failed to set up issue escalation")?;

    let report = heal::run(
        &log_text,
        &store,
        workdir,
        &publisher as &dyn Publisher,
        escalator.as_ref().map(|e| e as &dyn Escalator),
        config,
    )
    .await
    .context("mapping store failed during remediation")?;
    store.close().await;

    match &report {
        RunReport::Published {
            entry_id,
            signature,
            outcome,
        } => info!(
            entry_id,
            signature = %signature,
            outcome = ?outcome,
            "committed fix; the push will trigger a new run"
        ),
        RunReport::AppliedNotPublished {
            entry_id,
            signature,
            reason,
        } => error!(
            entry_id,
            signature = %signature,
            reason = %reason,
            "applied patch but could not publish"
        ),
        RunReport::NotApplicable {
            entry_id,
            signature,
            reason,
        } => warn!(
            entry_id,
            signature = %signature,
            reason = %reason,
            "mapping found but patch not applied"
        ),
        RunReport::Escalated { url } => info!(
            url = url.as_deref().unwrap_or("unknown"),
            "no mapping matched; issue opened"
        ),
        RunReport::NotEscalated { reason } => {
            warn!(reason = %reason, "no mapping matched; no issue opened")
        }
    }

    Ok(ExitCode::from(report.exit_code()))
}

/// Insert a new mapping and optionally commit the store.
async fn handle_teach(
    config: &HealerConfig,
    request: &TeachRequest,
    db: &Path,
    workdir: &Path,
    push: bool,
    no_publish: bool,
) -> anyhow::Result<ExitCode> {
    let store = MappingStore::open(db, config.store.busy_timeout())
        .await
        .with_context(|| format!("failed to open mapping store {}", db.display()))?;
    let store_path = tokio::fs::canonicalize(db)
        .await
        .with_context(|| format!("failed to resolve {}", db.display()))?;

    let publisher = GitPublisher::new(workdir, &config.publish).with_push(push);
    let publisher = (!no_publish).then_some(&publisher as &dyn Publisher);

    let report = teach::teach(&store, &store_path, request, publisher)
        .await
        .context("failed to record mapping")?;
    store.close().await;

    let entry = report.entry();
    match &report {
        TeachReport::Published { outcome, .. } => {
            info!(entry_id = entry.id, outcome = ?outcome, "inserted mapping and committed store")
        }
        TeachReport::Recorded { .. } => info!(entry_id = entry.id, "inserted mapping"),
        TeachReport::PublishFailed { reason, .. } => error!(
            entry_id = entry.id,
            reason = %reason,
            "inserted mapping but could not commit the store"
        ),
    }
    println!("Inserted mapping id {}", entry.id);

    Ok(ExitCode::from(report.exit_code()))
}

/// Print all mappings in id order.
async fn handle_list(config: &HealerConfig, db: &Path) -> anyhow::Result<ExitCode> {
    if !db.exists() {
        info!(db = %db.display(), "mapping store not found");
        return Ok(ExitCode::SUCCESS);
    }
    let store = MappingStore::open(db, config.store.busy_timeout())
        .await
        .with_context(|| format!("failed to open mapping store {}", db.display()))?;
    let entries = store.list_entries().await.context("failed to list mappings")?;
    store.close().await;

    for entry in &entries {
        let action = match &entry.action {
            RemediationAction::PatchReplace {
                file,
                search,
                replace,
            } => format!("patch_replace {} {search:?} -> {replace:?}", file.display()),
            RemediationAction::Unsupported { kind, reason } => {
                format!("unsupported '{kind}' ({reason})")
            }
        };
        println!(
            "{id}\t{hits}\t{created}\t{signature}\t{action}",
            id = entry.id,
            hits = entry.hit_count,
            created = entry.created_at,
            signature = entry.signature,
        );
    }

    Ok(ExitCode::SUCCESS)
}
