use anyhow::Result;

use super::commands::Commands;
use super::config::cmd_config;
use super::context::CliContext;
use super::env::CliArgs;
use super::history::cmd_history;
use super::rerun::cmd_rerun;
use super::run::cmd_run;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Rerun(args) => cmd_rerun(args, ctx).await,
        Commands::History(args) => cmd_history(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
    }
}
