use beacon_listener::app::{self, AssociateOptions, RealScanner, RunError, ScanOptions};
use beacon_listener::store::AssociationStore;
use clap::{Parser, Subcommand};
use std::io;
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Cli {
    /// Association store file
    #[arg(long, global = true, default_value = "associations.json")]
    store: PathBuf,

    /// Verbose output, print dropped advertisements and debug logs
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan for beacons and print presence lines until the session ends
    Scan(ScanOptions),
    /// Create or update the association for a beacon
    Associate(AssociateOptions),
    /// Delete every association for a hardware address
    Remove {
        #[arg(value_parser = app::parse_address)]
        address: String,
    },
    /// Print all associations, one JSON object per line
    List,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let mut store = AssociationStore::load(cli.store);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Command::Scan(mut options) => {
            options.verbose = cli.verbose;
            let mut stderr = io::stderr();
            app::run_with_io(options, &RealScanner, &store, &mut stdout, &mut stderr).await?;
        }
        Command::Associate(options) => {
            let outcome = app::associate(&mut store, options)?;
            tracing::info!(?outcome, "association saved");
        }
        Command::Remove { address } => {
            let removed = app::remove(&mut store, &address)?;
            tracing::info!(%address, removed, "associations removed");
        }
        Command::List => app::list(&store, &mut stdout)?,
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
