//! handyd - HTTP control daemon for The Handy
//!
//! Subcommands:
//! - `handyd serve` - Run the daemon
//! - `handyd config` - Print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use handyconf::HandyConfig;
use std::path::PathBuf;

use handyd::serve::{self, ServeOptions};
use handyd::telemetry;

#[derive(Parser)]
#[command(name = "handyd")]
#[command(about = "HTTP control daemon for The Handy via Intiface")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP daemon
    Serve {
        /// Config file (replaces ./handyd.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// HTTP port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Hub WebSocket endpoint; repeat to try several in order
        #[arg(long = "hub")]
        hubs: Vec<String>,

        /// Use an in-process simulated hub instead of Intiface
        #[arg(long)]
        simulate: bool,

        /// Connect and scan at startup
        #[arg(long)]
        connect: bool,
    },

    /// Print the effective configuration and where it came from
    Config {
        /// Config file (replaces ./handyd.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            host,
            hubs,
            simulate,
            connect,
        } => {
            let mut config =
                HandyConfig::load_from(config.as_deref()).context("Failed to load config")?;

            if let Some(port) = port {
                config.infra.bind.http_port = port;
            }
            if let Some(host) = host {
                config.infra.bind.host = host;
            }
            if !hubs.is_empty() {
                config.infra.hub.endpoints = hubs;
            }
            config.validate().context("Invalid configuration")?;

            let _telemetry = telemetry::init(&config.infra.telemetry)?;

            serve::run(
                config,
                ServeOptions {
                    simulate,
                    connect_on_start: connect,
                },
            )
            .await
        }

        Commands::Config { config } => {
            let (config, sources) = HandyConfig::load_with_sources_from(config.as_deref())
                .context("Failed to load config")?;

            if sources.files.is_empty() {
                println!("# Sources: defaults only");
            } else {
                for file in &sources.files {
                    println!("# Loaded: {}", file.display());
                }
            }
            for var in &sources.env_overrides {
                println!("# Env override: {}", var);
            }
            println!();
            print!("{}", config.to_toml());
            Ok(())
        }
    }
}
