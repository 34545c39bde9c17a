//! propledger - property registry maintenance from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Apply extracted instructions, keeping a backup and the failure list
//! propledger apply registry.json batch.json --failed-out failed.json --pending-out pending.json
//!
//! # Apply enrichment suggestions a human approved
//! propledger approve registry.json pending.json
//!
//! # Repair back-references and print the ownership tree
//! propledger normalize registry.json --output hierarchy.json
//!
//! # Inspect, list backups, roll back
//! propledger check registry.json
//! propledger backups registry.json
//! propledger restore registry.json registry.backup-20260101T120000.000Z.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use propledger_core::collab::{write_json_report, JsonInstructionReader};
use propledger_core::db::open_db;
use propledger_core::{
    init_from_config, normalize, reconcile, BackupId, BatchOutcome, CollisionPolicy, Config,
    EnrichmentMode, EntityKind, Interpreter, JsonFileSnapshotRepository,
    SnapshotRepository, SqliteSnapshotRepository, StorageBackend,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "propledger")]
#[command(about = "Property registry maintenance", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot storage backend (json or sqlite)
    #[arg(long, global = true)]
    backend: Option<StorageBackend>,

    /// Absolute log directory; overrides the config file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply an instruction batch to a snapshot
    Apply {
        /// Snapshot file (JSON file or SQLite database)
        snapshot: PathBuf,

        /// Instruction list (JSON array)
        instructions: PathBuf,

        /// recommend or apply
        #[arg(long)]
        enrichment_mode: Option<EnrichmentMode>,

        /// Minimum confidence for applying enrichment
        #[arg(long)]
        min_confidence: Option<f64>,

        /// merge or disambiguate
        #[arg(long)]
        collision_policy: Option<CollisionPolicy>,

        /// Where to write failed instructions
        #[arg(long)]
        failed_out: Option<PathBuf>,

        /// Where to write enrichment held for approval
        #[arg(long)]
        pending_out: Option<PathBuf>,

        /// Skip the pre-apply backup
        #[arg(long)]
        no_backup: bool,
    },

    /// Apply approved enrichment instructions
    Approve {
        /// Snapshot file
        snapshot: PathBuf,

        /// Approved instructions (usually an edited pending list)
        approved: PathBuf,

        /// Where to write failed instructions
        #[arg(long)]
        failed_out: Option<PathBuf>,
    },

    /// Reconcile back-references and emit the ownership hierarchy
    Normalize {
        /// Snapshot file
        snapshot: PathBuf,

        /// Hierarchy output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show per-collection counts and reference problems
    Check {
        /// Snapshot file
        snapshot: PathBuf,
    },

    /// List backups of a snapshot
    Backups {
        /// Snapshot file
        snapshot: PathBuf,
    },

    /// Restore a snapshot from a backup
    Restore {
        /// Snapshot file
        snapshot: PathBuf,

        /// Backup id as printed by `apply` or `backups`
        backup: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }
    if let Some(dir) = &cli.log_dir {
        config.logging.dir = Some(dir.clone());
    }

    match cli.command {
        Commands::Apply {
            snapshot,
            instructions,
            enrichment_mode,
            min_confidence,
            collision_policy,
            failed_out,
            pending_out,
            no_backup,
        } => {
            if let Some(mode) = enrichment_mode {
                config.interpreter.enrichment_mode = mode;
            }
            if let Some(threshold) = min_confidence {
                config.interpreter.min_enrichment_confidence = threshold;
            }
            if let Some(policy) = collision_policy {
                config.interpreter.collision_policy = policy;
            }
            if no_backup {
                config.storage.backup_before_apply = false;
            }
            start(&config)?;
            run_apply(&config, &snapshot, &instructions, failed_out, pending_out)
        }
        Commands::Approve {
            snapshot,
            approved,
            failed_out,
        } => {
            start(&config)?;
            run_approve(&config, &snapshot, &approved, failed_out)
        }
        Commands::Normalize { snapshot, output } => {
            start(&config)?;
            run_normalize(&config, &snapshot, output)
        }
        Commands::Check { snapshot } => {
            start(&config)?;
            run_check(&config, &snapshot)
        }
        Commands::Backups { snapshot } => {
            start(&config)?;
            with_repository(config.storage.backend, &snapshot, |repo| {
                for backup in repo.list_backups()? {
                    println!("{backup}");
                }
                Ok(())
            })
        }
        Commands::Restore { snapshot, backup } => {
            start(&config)?;
            with_repository(config.storage.backend, &snapshot, |repo| {
                repo.restore(&BackupId(backup.clone()))
                    .with_context(|| format!("failed to restore backup {backup}"))?;
                println!("Restored {} from {backup}", snapshot.display());
                Ok(())
            })
        }
    }
}

fn start(config: &Config) -> Result<()> {
    config.validate()?;
    init_from_config(&config.logging).context("failed to initialize logging")?;
    Ok(())
}

/// Runs `run` against the configured snapshot repository.
fn with_repository<T>(
    backend: StorageBackend,
    path: &Path,
    run: impl FnOnce(&dyn SnapshotRepository) -> Result<T>,
) -> Result<T> {
    match backend {
        StorageBackend::Json => run(&JsonFileSnapshotRepository::new(path)),
        StorageBackend::Sqlite => {
            let conn = open_db(path)
                .with_context(|| format!("failed to open database {}", path.display()))?;
            run(&SqliteSnapshotRepository::new(&conn))
        }
    }
}

fn run_apply(
    config: &Config,
    snapshot: &Path,
    instructions: &Path,
    failed_out: Option<PathBuf>,
    pending_out: Option<PathBuf>,
) -> Result<()> {
    let values = JsonInstructionReader
        .read_file(instructions)
        .with_context(|| format!("failed to read instructions {}", instructions.display()))?;

    with_repository(config.storage.backend, snapshot, |repo| {
        let mut store = repo.load_store().context("failed to load snapshot")?;
        if config.storage.backup_before_apply {
            if let Some(backup) = repo.backup().context("failed to back up snapshot")? {
                println!("Backup: {backup}");
            }
        }

        let interpreter = Interpreter::new(config.interpreter);
        let outcome = interpreter.apply_json(&mut store, &values);
        let report = reconcile(&mut store);
        repo.save_store(&store).context("failed to write snapshot")?;

        print_outcome(&outcome);
        if !report.is_clean() {
            println!("Repaired references: {}", report.issues.len());
        }
        write_failures(&outcome, failed_out.as_deref())?;
        if let Some(path) = pending_out.as_deref() {
            write_json_report(path, &outcome.pending)?;
            println!("Pending list written to {}", path.display());
        }
        Ok(())
    })
}

fn run_approve(
    config: &Config,
    snapshot: &Path,
    approved: &Path,
    failed_out: Option<PathBuf>,
) -> Result<()> {
    let values = JsonInstructionReader
        .read_file(approved)
        .with_context(|| format!("failed to read approved list {}", approved.display()))?;

    with_repository(config.storage.backend, snapshot, |repo| {
        let mut store = repo.load_store().context("failed to load snapshot")?;
        if config.storage.backup_before_apply {
            if let Some(backup) = repo.backup().context("failed to back up snapshot")? {
                println!("Backup: {backup}");
            }
        }
        let outcome =
            Interpreter::new(config.interpreter).apply_approved_json(&mut store, &values);
        reconcile(&mut store);
        repo.save_store(&store).context("failed to write snapshot")?;

        print_outcome(&outcome);
        write_failures(&outcome, failed_out.as_deref())
    })
}

fn run_normalize(config: &Config, snapshot: &Path, output: Option<PathBuf>) -> Result<()> {
    with_repository(config.storage.backend, snapshot, |repo| {
        let mut store = repo.load_store().context("failed to load snapshot")?;
        let normalized = normalize(&mut store);
        repo.save_store(&store).context("failed to write snapshot")?;

        let body = serde_json::to_string_pretty(&normalized.hierarchy)?;
        match output {
            Some(path) => {
                std::fs::write(&path, body)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                eprintln!(
                    "Hierarchy written to {} ({} repaired references)",
                    path.display(),
                    normalized.report.issues.len()
                );
            }
            None => println!("{body}"),
        }
        Ok(())
    })
}

fn run_check(config: &Config, snapshot: &Path) -> Result<()> {
    with_repository(config.storage.backend, snapshot, |repo| {
        let store = repo.load_store().context("failed to load snapshot")?;
        for kind in EntityKind::ALL {
            println!("{:<12} {}", kind.collection_key(), store.len(kind));
        }

        let mut dry_run = store.clone();
        let report = reconcile(&mut dry_run);
        if report.is_clean() {
            println!("References: consistent");
        } else {
            println!("References: {} problems", report.issues.len());
            for issue in &report.issues {
                println!(
                    "  {} {} -> {} ({:?})",
                    issue.entity, issue.field, issue.target, issue.action
                );
            }
        }
        Ok(())
    })
}

fn print_outcome(outcome: &BatchOutcome) {
    println!(
        "Applied: {}  Failed: {}  Pending: {}",
        outcome.applied_count(),
        outcome.failed_count(),
        outcome.pending.len()
    );
}

fn write_failures(outcome: &BatchOutcome, failed_out: Option<&Path>) -> Result<()> {
    match failed_out {
        Some(path) => {
            write_json_report(path, &outcome.failed)?;
            println!("Failed list written to {}", path.display());
        }
        None => {
            for failed in &outcome.failed {
                eprintln!("  #{} {}: {}", failed.index, failed.kind, failed.reason);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{run_approve, Cli};
    use clap::CommandFactory;
    use propledger_core::{Config, EntityKind, GraphStore};
    use serde_json::json;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn approve_reports_malformed_entries_and_applies_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("registry.json");
        let approved = dir.path().join("approved.json");
        let failed = dir.path().join("failed.json");
        let list = json!([
            {"targetType": "tenant", "targetKey": "Jane Doe", "source": "enrichment", "fields": {"phone": "555-987-6543"}},
            {"targetType": "garage"}
        ]);
        std::fs::write(&approved, list.to_string()).unwrap();

        run_approve(&Config::default(), &snapshot, &approved, Some(failed.clone())).unwrap();

        let written = std::fs::read_to_string(&snapshot).unwrap();
        let store = GraphStore::from_json_str(&written).unwrap();
        assert_eq!(store.len(EntityKind::Tenant), 1);
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&failed).unwrap()).unwrap();
        assert_eq!(report[0]["originalInstruction"], json!({"targetType": "garage"}));
    }
}
