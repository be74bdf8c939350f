use anyhow::{Context, Result};
use clap::Parser;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use affiliations_import::{
    load_rows, setup_database, Dispatcher, PhaseReport, RunConfig, RunReport, SqliteStore,
};

/// Apply identity and affiliation corrections to the identity store.
#[derive(Parser, Debug)]
#[command(name = "affiliations-import", version, long_about = None)]
struct Cli {
    /// CSV of identity corrections (Phase 1).
    identities: PathBuf,

    /// CSV of affiliation corrections (Phase 2).
    affiliations: PathBuf,

    /// SQLite database file.
    #[arg(long, env = "SH_DB")]
    db: PathBuf,

    /// Create missing tables before importing.
    #[arg(long)]
    init_schema: bool,

    /// Concurrent rows per phase (capped at the number of CPUs).
    #[arg(long)]
    workers: Option<usize>,

    /// Process one row at a time.
    #[arg(long)]
    serial: bool,

    /// Log what would change without writing.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    debug: bool,

    /// Log every generated statement.
    #[arg(long)]
    debug_sql: bool,

    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    init_tracing(config.debug);

    let started = Instant::now();

    // 1. Load both inputs before touching the store
    let identities = load_rows(&cli.identities)?;
    let affiliations = load_rows(&cli.affiliations)?;
    info!(
        "Loaded {} identity rows, {} affiliation rows",
        identities.len(),
        affiliations.len()
    );

    // 2. Open the store
    let conn = Connection::open(&cli.db)
        .with_context(|| format!("Failed to open database {}", cli.db.display()))?;
    if cli.init_schema {
        setup_database(&conn)?;
    }
    let store = SqliteStore::new(conn).with_statement_trace(config.debug_sql);

    // 3. Reconcile
    if config.dry_run {
        info!("Dry run: no changes will be written");
    }
    let dispatcher = Dispatcher::new(&store, config);
    let report = match dispatcher.run(&identities, &affiliations) {
        Ok(report) => report,
        Err(err) => {
            for phase in dispatcher.reports() {
                print_tally(&phase);
            }
            return Err(err.into());
        }
    };

    print_summary(&report);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    info!("Finished in {:.2?}", started.elapsed());

    Ok(())
}

/// Environment first, then command-line flags on top.
fn resolve_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = RunConfig::from_env()?;
    if cli.serial {
        config = config.with_workers(1);
    } else if let Some(workers) = cli.workers {
        config = config.with_workers(affiliations_import::resolve_workers(
            false,
            Some(workers),
            affiliations_import::host_parallelism(),
        ));
    }
    if cli.dry_run {
        config = config.with_dry_run(true);
    }
    config.debug |= cli.debug;
    config.debug_sql |= cli.debug_sql;
    Ok(config)
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).try_init();
}

fn print_tally(phase: &PhaseReport) {
    let t = &phase.tally;
    println!(
        "{:?}: {} rows, {} applied, {} unchanged, {} dry run, {} collisions, {} warnings, {} errors",
        phase.phase, t.rows, t.applied, t.no_change, t.dry_run, t.collisions, t.warnings, t.errors
    );
}

fn print_summary(report: &RunReport) {
    for phase in [&report.identities, &report.enrollments] {
        print_tally(phase);
    }
    let u = &report.updated;
    println!(
        "Updated {} identities, {} enrollments, {} uidentities, {} profiles",
        u.identities, u.enrollments, u.uidentities, u.profiles
    );
    if !report.missing_organizations.is_empty() {
        println!("Missing organizations: {}", report.missing_organizations.join(", "));
    }
    if !report.missing_slugs.is_empty() {
        println!("Missing project slugs: {}", report.missing_slugs.join(", "));
    }
}
