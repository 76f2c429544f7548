//! Development server binary.
//!
//! Usage:
//! ```text
//! devgate --config devgate.toml --root ./dist
//! devgate --check
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use devgate::config::{self, HostSetting, Overrides, ServerConfig};
use devgate::ConfigError;

#[derive(Debug, Parser)]
#[command(name = "devgate", version, about = "Development server with prefix-based API proxying")]
struct Args {
    /// Declaration file (TOML, or JSON by `.json` extension). Defaults to
    /// ./devgate.toml when present, otherwise the built-in declaration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overrides the declaration and DEVGATE_PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// `true` (all interfaces), `false` (loopback) or an address to bind
    #[arg(long)]
    host: Option<HostSetting>,

    /// Directory served for requests no proxy rule claims
    #[arg(long)]
    root: Option<PathBuf>,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Validate the declaration, print the effective configuration as JSON and exit
    #[arg(long)]
    check: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            port: self.port,
            host: self.host.clone(),
            root: self.root.clone(),
        }
    }
}

fn load_config(args: &Args) -> Result<ServerConfig, ConfigError> {
    let overrides = Overrides::from_env()?.merge(args.overrides());
    let default_path = Path::new(config::DEFAULT_CONFIG_FILE);
    let path = match &args.config {
        Some(path) => Some(path.as_path()),
        None => default_path.exists().then_some(default_path),
    };
    config::load_from(path, &overrides)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = devgate::logging::init(args.log_dir.as_deref()) {
        eprintln!("devgate: {e:#}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            eprintln!("devgate: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.check {
        return match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("devgate: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let handle = match devgate::start(config).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Failed to start dev server: {}", e);
            eprintln!("devgate: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Ready on http://{}", handle.local_addr());

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    let status = handle.status();
    tracing::info!(
        "Handled {} requests ({} proxied, {} failed)",
        status.total_requests,
        status.proxied_requests,
        status.failed_requests
    );
    handle.stop().await;
    ExitCode::SUCCESS
}
