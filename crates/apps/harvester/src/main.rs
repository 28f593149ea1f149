//! Harvester - Resumable bulk exporter for Airtable enterprise accounts
//!
//! Crawls every workspace and base of the configured accounts, exports
//! all records into a local SQLite database and optionally deletes rows
//! that were not seen again.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use harvest::{
    HarvestConfig, LastRun, ScanContext, ScanCoordinator, ScanId, ScanOptions, ScanReport,
    SqliteExportStore,
};
use log::{error, info, warn};

/// Export Airtable enterprise data into a local database
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Resume a named run; bases already tagged with this id are skipped
    #[arg(long, env = "HARVEST_SCAN_ID")]
    scan_id: Option<String>,

    /// Resume the last run if it was interrupted or skipped bases
    #[arg(long, conflicts_with = "scan_id")]
    resume: bool,

    /// Delete bases and records not seen by this run
    #[arg(long)]
    delete: bool,

    /// Scan from the stored inventory without crawling workspaces first
    #[arg(long)]
    skip_crawl: bool,

    /// Config file (defaults to ~/.config/harvest/harvest.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Download attachments into this directory
    #[arg(long, value_name = "DIR")]
    attachments: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    match run(args).await {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Export failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ScanReport> {
    let mut settings = match HarvestConfig::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            if let Some(path) = HarvestConfig::default_config_path() {
                warn!(
                    "To configure the exporter, either:\n\
                     1. Place a config file at: {}\n\
                     2. Or set environment variables: HARVEST_API_TOKEN, HARVEST_ACCOUNT_IDS and HARVEST_ADMIN_USER_ID",
                    path.display()
                );
            }
            return Err(e);
        }
    };
    if let Some(dir) = args.attachments {
        settings.attachments_dir = Some(dir);
    }

    let last_run_path = settings.last_run_path();
    let requested = match args.scan_id {
        Some(id) => Some(id),
        None if args.resume => match LastRun::resume_id(&last_run_path)? {
            Some(id) => {
                info!("Resuming run {}", id);
                Some(id.to_string())
            }
            None => {
                info!("No unfinished run recorded, starting a new one");
                None
            }
        },
        None => None,
    };
    let scan_id = ScanId::resolve(requested.as_deref());

    let db_path = settings.database_path();
    info!("Using database {}", db_path.display());
    let store = SqliteExportStore::new(&db_path)?;
    let client = settings.client()?;

    let ctx = ScanContext::new(
        Arc::new(client),
        Arc::new(store),
        settings.scan_settings()?,
    );
    let mut coordinator = ScanCoordinator::new(ctx, settings.account_ids.clone());

    let mut last_run = LastRun::started(scan_id.clone(), Utc::now());
    record_run(&last_run, &last_run_path);

    let report = coordinator
        .run(ScanOptions {
            scan_id: Some(scan_id.to_string()),
            crawl: !args.skip_crawl,
            delete_stale: args.delete,
        })
        .await?;

    last_run.finish(&report, Utc::now());
    record_run(&last_run, &last_run_path);
    Ok(report)
}

/// Failing to record the run does not fail the export
fn record_run(last_run: &LastRun, path: &Path) {
    if let Err(e) = last_run.save(path) {
        warn!("Failed to record run state in {}: {:#}", path.display(), e);
    }
}

fn print_report(report: &ScanReport) {
    info!("Scan id: {}", report.scan_id);
    if let Some(crawl) = &report.crawl {
        info!(
            "Crawl: {} accounts, {} workspaces, {} bases",
            crawl.accounts, crawl.workspaces, crawl.bases
        );
    }
    info!(
        "Bases: {} selected, {} scanned, {} gone, {} unscannable, {} skipped",
        report.bases_selected,
        report.bases_scanned,
        report.bases_gone,
        report.bases_unscannable,
        report.skipped.len()
    );
    info!(
        "Wrote {} records from {} tables, downloaded {} attachments in {}ms",
        report.records_written,
        report.tables_scanned,
        report.attachments_downloaded,
        report.duration_ms
    );
    if let Some(reconcile) = &report.reconcile {
        info!(
            "Deleted {} bases and {} records; kept {} bases that failed this run",
            reconcile.bases_deleted, reconcile.records_deleted, reconcile.bases_protected
        );
    }

    for (base_id, reason) in &report.skipped {
        warn!("Skipped base {}: {}", base_id, reason);
    }
    if !report.skipped.is_empty() {
        warn!(
            "{} bases will be retried by the next run with --resume (or --scan-id {})",
            report.skipped.len(),
            report.scan_id
        );
    }
}
