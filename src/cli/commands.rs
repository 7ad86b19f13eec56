use clap::Subcommand;

use super::config::ConfigArgs;
use super::history::HistoryArgs;
use super::rerun::RerunArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run the agent on a task
    Run(RunArgs),

    /// Replay a saved history file
    Rerun(RerunArgs),

    /// Summarize a saved history file
    History(HistoryArgs),

    /// Configuration management
    Config(ConfigArgs),
}
