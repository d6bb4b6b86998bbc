use clap::Parser;
use escrow_policy::domain::ids::Timestamp;
use escrow_policy::domain::ports::{FreezeStoreBox, LedgerStoreBox};
use escrow_policy::infrastructure::clock::ManualClock;
use escrow_policy::infrastructure::in_memory::{InMemoryFreezeStore, InMemoryLedgerStore};
use escrow_policy::interfaces::config::ScenarioConfig;
use escrow_policy::interfaces::csv::command_reader::CommandReader;
use escrow_policy::interfaces::csv::state_writer::StateWriter;
use escrow_policy::interfaces::runner::ScenarioRunner;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario configuration (JSON)
    config: PathBuf,

    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Write the audit log as JSON lines to this file.
    #[arg(long)]
    audit: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Ledger and freeze stores; both live in the same database when persisted.
fn stores(db_path: Option<PathBuf>) -> Result<(LedgerStoreBox, FreezeStoreBox)> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = db_path {
        let store = escrow_policy::infrastructure::rocksdb::RocksDbLedgerStore::open(db_path)
            .into_diagnostic()?;
        let freezes = store.freeze_store();
        return Ok((Box::new(store), Box::new(freezes)));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }

    Ok((
        Box::new(InMemoryLedgerStore::new()),
        Box::new(InMemoryFreezeStore::new()),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config_file = File::open(&cli.config).into_diagnostic()?;
    let config = ScenarioConfig::from_reader(config_file).into_diagnostic()?;
    let clock = Arc::new(ManualClock::new(Timestamp::ZERO));
    let (ledger, freezes) = stores(cli.db_path)?;
    let scenario = config
        .build(ledger, freezes, clock.clone())
        .await
        .into_diagnostic()?;
    let runner = ScenarioRunner::new(scenario, clock);

    // Process commands
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command_result in reader.commands() {
        match command_result {
            Ok(command) => {
                if let Err(e) = runner.apply(command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    // Output final state
    let rows = runner.rows().await.into_diagnostic()?;
    let stdout = io::stdout();
    StateWriter::new(stdout.lock())
        .write_rows(rows)
        .into_diagnostic()?;

    if let Some(path) = cli.audit {
        let file = File::create(path).into_diagnostic()?;
        runner
            .scenario()
            .coordinator
            .audit()
            .write_json_lines(io::BufWriter::new(file))
            .into_diagnostic()?;
    }

    Ok(())
}
