mod display;
mod setup;
mod watch;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use taskwatch_store::{PersistedState, StateStore};
use taskwatch_sync::{SessionManager, build_client};
use tokio::sync::watch as signal_watch;
use tracing_subscriber::EnvFilter;

use crate::setup::{SetupArgs, run_setup};
use crate::watch::{CycleOutcome, Endpoints, Watcher};

/// Watch a task marketplace for new and progressing work orders and push a
/// summary through a notification relay.
#[derive(Debug, Parser)]
#[command(name = "taskwatch", version, about)]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Args)]
struct GlobalOpts {
    /// State file holding credentials and recorded orders.
    #[arg(long, env = "TASKWATCH_CONFIG", default_value = "config.json", global = true)]
    config: PathBuf,
    /// Root of the task listing API.
    #[arg(
        long,
        env = "TASKWATCH_API_BASE",
        default_value = "https://api.suanleme.cn/api/v1",
        global = true
    )]
    api_base: String,
    /// Push relay endpoint.
    #[arg(
        long,
        env = "TASKWATCH_RELAY_URL",
        default_value = "http://www.pushplus.plus/send",
        global = true
    )]
    relay_url: String,
    /// Seconds between polls.
    #[arg(long, default_value_t = 30, global = true)]
    interval: u64,
    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30, global = true)]
    request_timeout: u64,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl GlobalOpts {
    fn endpoints(&self) -> Endpoints {
        Endpoints {
            api_base: self.api_base.clone(),
            relay_url: self.relay_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll forever (the default).
    Run,
    /// Log in and write a fresh state file.
    Setup(SetupArgs),
    /// Run a single poll cycle and exit.
    Once,
    /// Show the recorded state without touching the network.
    Status {
        /// How many of the most recent orders to list.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.opts.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("taskwatch v{}", env!("CARGO_PKG_VERSION"));

    let mut store = StateStore::new(&cli.opts.config);
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&cli.opts, store).await,
        Command::Setup(args) => {
            let sessions = session_manager(&cli.opts)?;
            run_setup(args, &mut store, &sessions).await?;
            println!("Setup saved to {}", store.path().display());
            Ok(())
        }
        Command::Once => once(&cli.opts, store).await,
        Command::Status { limit } => {
            let state = load_or_hint(&store)?;
            display::print_status(&state, limit);
            Ok(())
        }
    }
}

fn session_manager(opts: &GlobalOpts) -> anyhow::Result<SessionManager> {
    let client = build_client(Duration::from_secs(opts.request_timeout))?;
    Ok(SessionManager::new(client, &opts.api_base))
}

fn load_or_hint(store: &StateStore) -> anyhow::Result<PersistedState> {
    match store.load() {
        Ok(state) => Ok(state),
        Err(e) if e.needs_setup() => bail!("{e}. Run `taskwatch setup` first"),
        Err(e) => Err(e).context("loading state"),
    }
}

async fn run(opts: &GlobalOpts, mut store: StateStore) -> anyhow::Result<()> {
    let state = match store.load() {
        Ok(state) => state,
        Err(e) if e.needs_setup() => {
            tracing::warn!(error = %e, "no usable state, starting setup");
            let sessions = session_manager(opts)?;
            run_setup(SetupArgs::from_env()?, &mut store, &sessions).await?
        }
        Err(e) => return Err(e).context("loading state"),
    };

    let mut watcher = Watcher::new(state, store, &opts.endpoints(), Duration::from_secs(opts.interval))?;

    let (stop_tx, stop_rx) = signal_watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(true);
        }
        // Hold the sender until the process exits.
        std::future::pending::<()>().await;
    });

    watcher.run(stop_rx).await.context("watcher stopped")?;
    println!("Stopped");
    Ok(())
}

async fn once(opts: &GlobalOpts, store: StateStore) -> anyhow::Result<()> {
    let state = load_or_hint(&store)?;
    let mut watcher = Watcher::new(state, store, &opts.endpoints(), Duration::from_secs(opts.interval))?;
    match watcher.run_cycle().await? {
        CycleOutcome::Empty => println!("No orders listed"),
        CycleOutcome::Unchanged { latest_id } => println!("No changes, latest id {latest_id}"),
        CycleOutcome::Changed(diff) => println!(
            "{} new, {} updated, latest id {}",
            diff.new_orders.len(),
            diff.updated_orders.len(),
            diff.max_id
        ),
    }
    Ok(())
}
