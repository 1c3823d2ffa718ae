//! stb-client: fetch channels from, and tune, a GCDH set-top box.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};

use stb_client::discovery::parse_subnet;
use stb_client::logging::init_logging;
use stb_client::session::CONTROL_PORT;
use stb_client::{Config, JsonFileStore, StbClient, StdoutLauncher};

/// stb-client - channel catalog and tuning client for GCDH set-top boxes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Settings file holding the device id, last address, channel cache and trace
    #[arg(long, default_value = "stb-client-state.json")]
    state: PathBuf,

    /// Print the diagnostic trace to stderr after the command
    #[arg(long)]
    show_trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the channel catalog and print it as JSON
    Channels {
        /// STB address
        #[arg(long)]
        ip: Option<String>,

        /// Print the cached list instead of contacting the STB
        #[arg(long)]
        cached: bool,
    },
    /// Tune a channel and print the stream URL
    Tune {
        /// Channel (service) id
        id: String,

        /// Position in the channel list
        #[arg(long)]
        index: Option<u32>,

        /// STB address
        #[arg(long)]
        ip: Option<String>,
    },
    /// Sweep a /24 for hosts answering on the control port
    Discover {
        /// Network to sweep, e.g. 192.168.1.0
        #[arg(long)]
        subnet: String,

        /// Ports to try
        #[arg(long = "port", default_values_t = vec![CONTROL_PORT])]
        ports: Vec<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let log_dir = args.log_dir.clone().unwrap_or_else(|| config.logging.log_dir.clone());
    let _log_guard = init_logging(
        &log_dir,
        config.logging.retention_days,
        args.verbose,
        config.logging.level.as_deref(),
    )?;

    info!("stb-client {}", env!("CARGO_PKG_VERSION"));
    let store = Arc::new(JsonFileStore::open(&args.state)?);
    let client = StbClient::new(config, store, Arc::new(StdoutLauncher));

    let result = run(&client, args.command).await;

    if args.show_trace {
        if let Some(trace) = client.last_trace() {
            eprintln!("{}", trace);
        }
    }
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

async fn run(client: &StbClient, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Channels { ip, cached } => {
            let catalog = if cached {
                client
                    .cached_channels(ip.as_deref())
                    .ok_or("no cached channel list")?
            } else {
                let outcome = client.fetch_channels(ip.as_deref()).await?;
                match &outcome.committed {
                    Some(candidate) => info!("Catalog via {}", candidate),
                    None => info!("No candidate produced channels"),
                }
                outcome.catalog
            };
            println!("{}", serde_json::to_string_pretty(&catalog.views())?);
        }
        Commands::Tune { id, index, ip } => {
            // StdoutLauncher prints the URL.
            let outcome = client.tune(&id, index, ip.as_deref()).await?;
            info!(
                "Tune {} -> {} ({}, remote keys sent: {})",
                id, outcome.url, outcome.source, outcome.remote_keys_sent
            );
        }
        Commands::Discover { subnet, ports } => {
            let base = parse_subnet(&subnet)?;
            for hit in client.discover(base, &ports).await {
                println!("{}:{}", hit.ip, hit.port);
            }
        }
    }
    Ok(())
}
