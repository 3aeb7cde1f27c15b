use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tracing_subscriber::filter::LevelFilter;

use dio_glow::api::Detection;
use dio_glow::config::Config;
use dio_glow::glow::Glow;
use dio_glow::io::{DioProtocol, HttpDio};
use dio_glow::storage::{SqliteStorage, Storage};

#[derive(Parser)]
#[command(
    name = "dio-glow",
    about = "Mirror a remote digital input onto a remote LED and record every glow",
    version,
    propagate_version = true
)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "DIO_GLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the remote DIO API
    #[arg(long, global = true, env = "DIO_GLOW_BASE_URL")]
    base_url: Option<String>,

    /// Password exchanged for the API token
    #[arg(long, global = true, env = "DIO_GLOW_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// SQLite database receiving the glow records
    #[arg(long, global = true, env = "DIO_GLOW_DATABASE")]
    database: Option<PathBuf>,

    /// Delay between two polls of the input (default: as fast as possible)
    #[arg(long, global = true, env = "DIO_GLOW_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Address the detection API listens on while running (e.g. 0.0.0.0:6001)
    #[arg(long, global = true, env = "DIO_GLOW_API_ADDRESS")]
    api_address: Option<String>,

    /// Increase verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the input onto the output until Ctrl-C (default)
    Run,

    /// Print the recorded glows
    History {
        /// Print the records as the detection API serves them
        #[arg(long)]
        json: bool,
    },

    /// Drive the output once
    Set {
        #[arg(value_enum)]
        state: Switch,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Cli {
    /// Builds the configuration: file (or defaults) first, then command line overrides.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(base_url) = &self.base_url {
            config.remote_base_url = base_url.clone();
        }
        if let Some(password) = &self.password {
            config.credential = password.clone();
        }
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if self.poll_interval_ms.is_some() {
            config.poll_interval_ms = self.poll_interval_ms;
        }
        if self.api_address.is_some() {
            config.api_address = self.api_address.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let config = cli.resolve_config()?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config).await,
        Commands::History { json } => history(&config, json).await,
        Commands::Set { state } => set(&config, state).await,
    }
}

async fn run(config: &Config) -> Result<()> {
    let glow = Glow::from_config(config)?;
    if let Some(address) = &config.api_address {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("cannot listen on {}", address))?;
        glow.serve_api(listener);
    }
    glow.start();

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for Ctrl-C")?;
    log::info!("Ctrl-C received: shutting down (Ctrl-C again to abort)");
    tokio::select! {
        result = glow.shutdown() => result?,
        _ = tokio::signal::ctrl_c() => glow.abort(),
    }
    Ok(())
}

async fn history(config: &Config, json: bool) -> Result<()> {
    let storage = SqliteStorage::new(&config.database);
    let records = storage.records().await?;
    if json {
        let detections: Vec<Detection> = records.iter().map(Detection::from).collect();
        println!("{}", serde_json::to_string_pretty(&detections)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No glow recorded in {}", config.database.display());
        return Ok(());
    }

    let total: u64 = records.iter().map(|record| record.duration_ms).sum();
    for record in &records {
        println!("{}", record);
    }
    println!("{} glow(s), {}ms in total", records.len(), total);
    Ok(())
}

async fn set(config: &Config, state: Switch) -> Result<()> {
    let dio = HttpDio::from_config(config)?;
    let level = matches!(state, Switch::On);
    dio.write_output(level).await?;
    println!("{} set to {}", dio.get_output(), if level { "on" } else { "off" });
    Ok(())
}
