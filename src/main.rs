use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use pagewatch_lib::{
    monitor::WatchEvent,
    watch::{Watch, WatchConfig, DEFAULT_INTERVAL_SECS},
    AppState,
};

#[derive(Parser)]
#[command(name = "pagewatch", version, about = "Watch web page fragments for changes")]
struct Cli {
    /// Directory holding watches.json and settings.json
    #[arg(long, env = "PAGEWATCH_DATA_DIR", default_value = ".", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a watch, or update the one with the same URL
    Add(AddArgs),
    /// Remove a watch
    Delete { url: String },
    /// Print all watches
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Monitor until interrupted with Ctrl-C
    Run {
        /// Print every status change as a JSON line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct AddArgs {
    url: String,

    /// Seconds between checks (minimum 10)
    #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS)]
    interval: u64,

    /// Element tag, e.g. `div`
    #[arg(long, default_value = "")]
    tag: String,

    /// `id` or `class`
    #[arg(long = "attr", default_value = "")]
    attribute: String,

    #[arg(long, default_value = "")]
    value: String,

    /// Add the watch without scheduling it
    #[arg(long)]
    disabled: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    pagewatch_lib::init_logging();

    let cli = Cli::parse();
    let app = AppState::open(&cli.data_dir)?;

    let outcome = match cli.command {
        Commands::Add(args) => add(&app, args).await,
        Commands::Delete { url } => delete(&app, &url).await,
        Commands::List { json } => list(&app, json).await,
        Commands::Run { json } => run(&app, json).await,
    };

    app.monitor.shutdown().await?;
    outcome
}

async fn add(app: &AppState, args: AddArgs) -> Result<()> {
    let config = WatchConfig::new(args.url)
        .interval(args.interval)
        .selector(args.tag, args.attribute, args.value)
        .enabled(!args.disabled);

    let watch = app.monitor.add_or_update_watch(config).await?;
    println!(
        "Watching {} every {}s ({})",
        watch.url,
        watch.interval_secs,
        watch.element_description()
    );
    Ok(())
}

async fn delete(app: &AppState, url: &str) -> Result<()> {
    let removed = app.monitor.delete_watch(url).await?;
    println!("Deleted {}", removed.url);
    Ok(())
}

async fn list(app: &AppState, json: bool) -> Result<()> {
    let watches = app.monitor.list_watches().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&watches)?);
        return Ok(());
    }
    if watches.is_empty() {
        println!("No watches in {}", app.data_dir().display());
        return Ok(());
    }

    println!(
        "{:<40} {:>8} {:<7} {:<24} {:<19} {:<19} STATUS",
        "URL", "INTERVAL", "ENABLED", "ELEMENT", "LAST CHECKED", "LAST CHANGED"
    );
    for watch in &watches {
        print_row(watch);
    }
    Ok(())
}

fn print_row(watch: &Watch) {
    println!(
        "{:<40} {:>8} {:<7} {:<24} {:<19} {:<19} {}",
        watch.url,
        watch.interval_secs,
        if watch.enabled { "yes" } else { "no" },
        watch.element_description(),
        watch.last_checked_label(),
        watch.last_changed_label(),
        watch.status_label()
    );
}

async fn run(app: &AppState, json: bool) -> Result<()> {
    let mut events = app.monitor.subscribe();
    app.monitor.start_monitoring().await?;
    info!("Monitoring; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) if json => println!("{}", serde_json::to_string(&event)?),
                Ok(WatchEvent::Updated { watch }) => print_row(&watch),
                Ok(WatchEvent::Removed { url }) => println!("Removed {url}"),
                Ok(WatchEvent::Monitoring { running }) => {
                    info!("Monitoring {}", if running { "started" } else { "stopped" });
                }
                Err(RecvError::Lagged(missed)) => warn!("Skipped {missed} status updates"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}
