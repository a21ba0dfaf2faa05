use boxoffice::application::SagaPorts;
use boxoffice::application::dispatch::TicketDispatcher;
use boxoffice::application::locks::SaleLocks;
use boxoffice::application::reconciliation::ReconciliationSweeper;
use boxoffice::application::saga::SaleSaga;
use boxoffice::application::scheduler::spawn_sweepers;
use boxoffice::config::Settings;
use boxoffice::domain::ports::SaleStoreRef;
use boxoffice::domain::sale::BookingId;
use boxoffice::infrastructure::booking_http::HttpBookingClient;
use boxoffice::infrastructure::in_memory::{InMemoryPerformanceCatalog, InMemorySaleStore};
use boxoffice::infrastructure::notifier::notifier_from_settings;
use boxoffice::infrastructure::payment_http::HttpPaymentClient;
#[cfg(feature = "storage-rocksdb")]
use boxoffice::infrastructure::rocksdb::RocksDBStore;
use boxoffice::interfaces::csv::sale_writer::SaleWriter;
use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Cinema ticket sale reconciliation engine", long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true, env = "BOXOFFICE_DB_PATH")]
    db_path: Option<PathBuf>,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation and ticket dispatch sweepers until Ctrl-C
    Run,
    /// Run one reconciliation pass and one dispatch pass, then exit
    Sweep,
    /// Return a sale: cancel the booking and refund the payment
    Return {
        /// Booking System id of the sale
        #[arg(long)]
        booking_id: u64,
    },
    /// Write recent sales as CSV to stdout
    Report {
        /// How far back to look; defaults to the reconciliation window
        #[arg(long)]
        since_minutes: Option<i64>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

fn open_store(db_path: Option<PathBuf>) -> Result<SaleStoreRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDBStore::open(&path).into_diagnostic()?;
            info!(path = %path.display(), "using RocksDB storage");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            tracing::warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
            Ok(Arc::new(InMemorySaleStore::new()))
        }
        None => Ok(Arc::new(InMemorySaleStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let settings = cli.settings;
    let policy = settings.policy.clone();
    let store = open_store(cli.db_path)?;
    let ports = SagaPorts {
        store: Arc::clone(&store),
        booking: Arc::new(HttpBookingClient::new(&settings.booking).into_diagnostic()?),
        payment: Arc::new(HttpPaymentClient::new(&settings.payment).into_diagnostic()?),
    };
    let notifier = notifier_from_settings(&settings.mail).into_diagnostic()?;
    let locks = SaleLocks::new();

    let reconciler = Arc::new(ReconciliationSweeper::new(
        ports.clone(),
        locks.clone(),
        policy.reconciliation_window(),
    ));
    let dispatcher = Arc::new(TicketDispatcher::new(
        Arc::clone(&store),
        notifier,
        locks.clone(),
        policy.reconciliation_window(),
    ));

    match cli.command {
        Command::Run => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handles = spawn_sweepers(reconciler, dispatcher, policy.sweep_interval(), shutdown_rx);
            info!(interval_secs = policy.sweep_interval().as_secs(), "sweepers started");

            tokio::signal::ctrl_c().await.into_diagnostic()?;
            info!("shutting down");
            // Receivers may already be gone if a task panicked.
            let _ = shutdown_tx.send(true);
            for handle in handles {
                handle.await.into_diagnostic()?;
            }
        }
        Command::Sweep => {
            let reconciled = reconciler.sweep().await.into_diagnostic()?;
            let dispatched = dispatcher.sweep().await.into_diagnostic()?;
            println!("reconciliation: {reconciled}");
            println!("dispatch: {dispatched}");
        }
        Command::Return { booking_id } => {
            let catalog = Arc::new(InMemoryPerformanceCatalog::new());
            let saga = SaleSaga::new(ports, catalog, locks, policy);
            let sale = saga
                .operator_return(BookingId(booking_id))
                .await
                .into_diagnostic()?;
            println!("sale {} returned, {} refunded", sale.secret(), sale.amount());
        }
        Command::Report { since_minutes } => {
            let window = since_minutes
                .map(chrono::Duration::minutes)
                .unwrap_or_else(|| policy.reconciliation_window());
            let sales = store.load_recent(Utc::now() - window).await.into_diagnostic()?;

            let stdout = io::stdout();
            let mut writer = SaleWriter::new(stdout.lock());
            writer.write_sales(&sales).into_diagnostic()?;
        }
    }

    Ok(())
}
