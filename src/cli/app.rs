use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use crate::config::{resolve_config_path, AppConfig};

use super::commands::Commands;
use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, load_local_env_overrides, LoadedConfig};

pub async fn run() -> Result<()> {
    load_local_env_overrides();
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug)?;

    info!("Starting webpilot v{}", env!("CARGO_PKG_VERSION"));

    let loaded_config = match load_config(cli.config.as_ref()).await {
        Ok(loaded) => loaded,
        // `config` subcommands must still run against a broken file so it
        // can be validated or re-initialised.
        Err(err) if matches!(cli.command, Commands::Config(_)) => {
            warn!("Ignoring unreadable configuration: {:#}", err);
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            LoadedConfig {
                config,
                path: resolve_config_path(cli.config.as_deref()),
                from_file: false,
            }
        }
        Err(err) => return Err(err),
    };
    let LoadedConfig { config, path, .. } = loaded_config;
    let cli_context = CliContext::new(config, path, cli.output);

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
