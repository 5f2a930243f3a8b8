// mualaf-sync CLI
//
//   mualaf-sync import     <table> <csv>      CSV → SQLite (cleaned)
//   mualaf-sync pull       <table> <sheet>    SQLite → sheet, snapshot saved
//   mualaf-sync push       <table> <sheet>    changed sheet rows → SQLite
//   mualaf-sync dedup      <table>            duplicate candidates
//   mualaf-sync attendance <csv>              class-day validation
//
// The sheet is a CSV file served through the host bridge, so pull/push run
// exactly as they do against a remote spreadsheet host.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use mualaf_sync::{
    load_csv, parse_class_days, spawn_host, AttendanceValidator, BridgeClient, CsvSheet,
    DeduplicationEngine, PullRequest, PushOutcome, RemoteSheet, SnapshotStore, SqliteStore,
    SyncConfig, SyncEngine, SyncProgress,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "mualaf-sync")]
#[command(about = "Spreadsheet sync for mualaf case records")]
struct Args {
    /// SQLite database file
    #[arg(long, default_value = "mualaf.db", global = true)]
    db: PathBuf,

    /// JSON config file (MUALAF_* environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Where pull keeps snapshots for the next push
    #[arg(long, default_value = ".mualaf-session", global = true)]
    session_dir: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean a CSV export and insert its rows into a table
    Import {
        table: String,
        csv: PathBuf,
        /// Recorded as createdBy (defaults to the configured actor)
        #[arg(long)]
        actor: Option<String>,
    },

    /// Export a table to a sheet file and save the snapshot
    Pull {
        table: String,
        sheet: PathBuf,
        /// Case-insensitive category pattern
        #[arg(long)]
        category: Option<String>,
        /// Status filter (defaults to the configured status)
        #[arg(long)]
        status: Option<String>,
    },

    /// Write edited sheet rows back to the table
    Push {
        table: String,
        sheet: PathBuf,
        /// Recorded as updatedBy (defaults to the configured actor)
        #[arg(long)]
        actor: Option<String>,
    },

    /// List likely duplicate records in a table
    Dedup {
        table: String,
        /// Comma-separated key fields
        #[arg(long, default_value = "name,phone")]
        keys: String,
    },

    /// Validate attendance entries in a CSV file
    Attendance {
        csv: PathBuf,
        /// Comma-separated class weekdays, e.g. "tue,sat"
        #[arg(long)]
        class_days: String,
        /// Reference date for the future-date rule (defaults to today)
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let config = SyncConfig::load(args.config.as_deref()).context("Failed to load config")?;

    match &args.command {
        Command::Import { table, csv, actor } => {
            let actor = actor.as_deref().unwrap_or(&config.actor);
            run_import(&args.db, table, csv, actor)
        }
        Command::Pull {
            table,
            sheet,
            category,
            status,
        } => {
            let mut request = PullRequest::new(table.as_str());
            request.category = category.clone();
            request.status = status.clone();
            run_pull(&args, config, &request, sheet).await
        }
        Command::Push { table, sheet, actor } => {
            let actor = actor.clone().unwrap_or_else(|| config.actor.clone());
            run_push(&args, config, table, sheet, &actor).await
        }
        Command::Dedup { table, keys } => run_dedup(&args.db, table, keys),
        Command::Attendance {
            csv,
            class_days,
            today,
        } => run_attendance(csv, class_days, *today),
    }
}

fn run_import(db: &Path, table: &str, csv: &Path, actor: &str) -> Result<()> {
    println!("📥 Import: {} → {} ({})", csv.display(), db.display(), table);

    let batch = load_csv(csv, actor).with_context(|| format!("Failed to read {}", csv.display()))?;
    println!("✓ Loaded {} records ({} blank rows dropped, {} ids assigned)",
        batch.records.len(), batch.blank_rows, batch.assigned_ids);

    let store = SqliteStore::open(db).context("Failed to open database")?;
    let stats = store
        .insert_records(table, &batch.records)
        .context("Failed to insert records")?;

    println!("✓ Inserted {} records, {} duplicates skipped", stats.inserted, stats.duplicates);
    println!("✓ Table now holds {} records", store.count_records(table)?);
    Ok(())
}

/// Engine whose sheet is `sheet_path`, reached through the host bridge.
fn build_engine(args: &Args, config: SyncConfig, sheet_path: &Path) -> Result<(SyncEngine, BridgeClient)> {
    let store = SqliteStore::open(&args.db).context("Failed to open database")?;

    let (client, endpoint) = BridgeClient::connect(config.host_timeout());
    spawn_host(endpoint, Arc::new(CsvSheet::new(sheet_path)));
    let sheet = RemoteSheet::new(client.clone());

    let engine = SyncEngine::new(Arc::new(store), Arc::new(sheet), config);
    Ok((engine, client))
}

fn log_progress(progress: &SyncProgress) {
    debug!(stage = progress.stage, percent = progress.percent, "{}", progress.message);
}

async fn run_pull(args: &Args, config: SyncConfig, request: &PullRequest, sheet: &Path) -> Result<()> {
    println!("⬇️  Pull: {} → {}", request.table, sheet.display());

    let (engine, client) = build_engine(args, config, sheet)?;
    let result = engine.pull(request, &log_progress).await;
    client.cancel();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            // Whatever the sheet holds now, it is not the last export
            SnapshotStore::unstamp_sheet(&args.session_dir, sheet)?;
            return Err(e).with_context(|| format!("Failed to pull {}", request.table));
        }
    };

    engine
        .snapshots()
        .save_table(&args.session_dir, &request.table)
        .context("Failed to save snapshot")?;
    SnapshotStore::stamp_sheet(&args.session_dir, sheet, &outcome.session)
        .context("Failed to record the sheet's snapshot")?;

    println!("✓ Exported {} records", outcome.total);
    println!("✓ Snapshot {} saved to {}", &outcome.session.version()[..12], args.session_dir.display());
    Ok(())
}

async fn run_push(args: &Args, config: SyncConfig, table: &str, sheet: &Path, actor: &str) -> Result<()> {
    println!("⬆️  Push: {} → {}", sheet.display(), table);

    // Rejects a sheet exported before the latest pull of the same table
    let snapshots = SnapshotStore::new();
    let session = snapshots
        .load_sheet_session(&args.session_dir, table, sheet)
        .with_context(|| format!("Cannot push {}: run `mualaf-sync pull {} {}` first", sheet.display(), table, sheet.display()))?;

    let (engine, client) = build_engine(args, config, sheet)?;
    let engine = engine.with_snapshots(snapshots);

    let outcome = engine
        .push(&session, actor, &log_progress)
        .await
        .with_context(|| format!("Failed to push {}", table))?;
    client.cancel();

    match outcome {
        PushOutcome::NoChanges => println!("✓ No changes to sync"),
        PushOutcome::Applied(report) => {
            println!("✓ {}", report.summary());
            for failure in &report.failures {
                println!("  ✗ {}: {}", failure.id, failure.error);
            }
            if report.skipped_without_id > 0 {
                println!("  ({} rows without id skipped)", report.skipped_without_id);
            }
        }
    }

    info!(table, "push finished");
    Ok(())
}

fn run_dedup(db: &Path, table: &str, keys: &str) -> Result<()> {
    let store = SqliteStore::open(db).context("Failed to open database")?;
    let records = store.all_records(table)?;

    let engine = DeduplicationEngine::new()
        .with_key_fields(keys.split(',').map(str::trim).filter(|k| !k.is_empty()));
    let matches = engine.find_duplicates(&records);

    println!("🔍 {} records, {} duplicate candidates", records.len(), matches.len());
    for m in &matches {
        println!(
            "  {:.0}%  {} ↔ {}  {}",
            m.confidence * 100.0,
            m.first_id.as_deref().unwrap_or("?"),
            m.second_id.as_deref().unwrap_or("?"),
            m.reason
        );
    }
    Ok(())
}

fn run_attendance(csv: &Path, class_days: &str, today: Option<NaiveDate>) -> Result<()> {
    let class_days = parse_class_days(class_days)?;
    let today = today.unwrap_or_else(|| Local::now().date_naive());

    let batch = load_csv(csv, "attendance").with_context(|| format!("Failed to read {}", csv.display()))?;
    let report = AttendanceValidator::new(class_days, today).validate(&batch.records);

    println!("📅 {}", report.summary());
    for issue in &report.issues {
        println!(
            "  [{:?}] row {} ({}): {}",
            issue.severity,
            issue.record_index + 1,
            issue.record_id.as_deref().unwrap_or("-"),
            issue.issue
        );
    }
    Ok(())
}
