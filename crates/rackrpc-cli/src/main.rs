//! # rackd Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Keep this rack connected to its region controllers
//! rackd run --config /etc/rackd/rackd.toml
//!
//! # Show what the region is advertising
//! rackd discover
//! ```
//!
//! ## Configuration
//!
//! A minimal configuration file only names the region:
//!
//! ```toml
//! url = "http://region.example:5240/MAAS"
//! ```

use anyhow::{Context, Result};
use argh::FromArgs;
use rackrpc_cluster::config::DEFAULT_CONFIG_PATH;
use rackrpc_cluster::{
    ConfigStore, FileConfigStore, LifecycleHooks, LoggingHooks, ServiceBuilder,
    StopDependentServices,
};
use rackrpc_cli::systemd::SystemdMonitor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

#[derive(FromArgs)]
/// rackd - rack controller region connection service
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Run(RunArgs),
    Discover(DiscoverArgs),
}

/// Arguments for running the connection service.
///
/// The service polls the region, keeps one connection per advertised
/// event-loop and answers region calls until SIGINT or SIGTERM. Losing the
/// last connection stops the dependent services unless `--keep-services`
/// is given.
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// keep the rack connected to its region controllers
struct RunArgs {
    /// path to the configuration file
    #[argh(option, short = 'c', default = "DEFAULT_CONFIG_PATH.into()")]
    config: PathBuf,

    /// unit to stop when every region connection is lost (repeatable;
    /// defaults to dhcpd and dhcpd6)
    #[argh(option, long = "stop-service")]
    stop_services: Vec<String>,

    /// only log when every region connection is lost
    #[argh(switch)]
    keep_services: bool,
}

impl RunArgs {
    fn hooks(&self) -> Arc<dyn LifecycleHooks> {
        if self.keep_services {
            return Arc::new(LoggingHooks);
        }
        let monitor = SystemdMonitor::default();
        if self.stop_services.is_empty() {
            Arc::new(StopDependentServices::new(monitor))
        } else {
            Arc::new(StopDependentServices::with_services(
                monitor,
                self.stop_services.clone(),
            ))
        }
    }
}

/// Arguments for a one-shot discovery.
///
/// Prints raw JSON to stdout. Logging is left off so the output can be
/// piped to `jq`.
#[derive(FromArgs)]
#[argh(subcommand, name = "discover")]
/// print the event-loops the region advertises
struct DiscoverArgs {
    /// path to the configuration file
    #[argh(option, short = 'c', default = "DEFAULT_CONFIG_PATH.into()")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    if !matches!(cli.command, Commands::Discover(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Run(args) => run_service(args).await,
        Commands::Discover(args) => {
            let report = rackrpc_cli::report::discover(&args.config).await?;
            println!("{}", serde_json::to_string(&report)?);
            Ok(())
        }
    }
}

async fn run_service(args: RunArgs) -> Result<()> {
    let store = Arc::new(FileConfigStore::new(&args.config));
    let config = store
        .open()
        .await
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    tracing::info!("Starting rack controller service for region {}", config.url);
    let service = ServiceBuilder::from_config(&config, store)
        .hooks(args.hooks())
        .build();
    service.start();

    shutdown_signal().await?;

    tracing::info!("Stopping rack controller service");
    service.stop().await;
    tracing::info!("Final state: {}", rackrpc_cli::report::service_report(&service));
    Ok(())
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_default_config() {
        let args: Cli = Cli::from_args(&["rackd"], &["run"]).unwrap();
        match args.command {
            Commands::Run(RunArgs {
                config,
                stop_services,
                keep_services,
            }) => {
                assert_eq!(config, PathBuf::from("/etc/rackd/rackd.toml"));
                assert!(stop_services.is_empty());
                assert!(!keep_services);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_with_config() {
        let args: Cli = Cli::from_args(&["rackd"], &["run", "-c", "/tmp/rackd.toml"]).unwrap();
        match args.command {
            Commands::Run(RunArgs { config, .. }) => {
                assert_eq!(config, PathBuf::from("/tmp/rackd.toml"));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_services() {
        let args: Cli = Cli::from_args(
            &["rackd"],
            &["run", "--stop-service", "dhcpd", "--stop-service", "tftpd", "--keep-services"],
        )
        .unwrap();
        match args.command {
            Commands::Run(RunArgs {
                stop_services,
                keep_services,
                ..
            }) => {
                assert_eq!(stop_services, vec!["dhcpd".to_string(), "tftpd".to_string()]);
                assert!(keep_services);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_discover() {
        let args: Cli =
            Cli::from_args(&["rackd"], &["discover", "--config", "./rackd.toml"]).unwrap();
        match args.command {
            Commands::Discover(DiscoverArgs { config }) => {
                assert_eq!(config, PathBuf::from("./rackd.toml"));
            }
            _ => panic!("Expected Discover command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::from_args(&["rackd"], &["orchestrate"]).is_err());
    }
}
