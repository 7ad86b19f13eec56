use std::path::PathBuf;
use std::sync::Arc;

use agent_core::{Agent, AgentControl, Browser, LlmProvider};
use anyhow::{bail, Context, Result};
use cdp_adapter::ChromeBrowser;
use clap::Args;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::llm::build_provider;

use super::context::CliContext;
use super::history::{print_summary, HistorySummary};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// What the agent should do, in plain language
    pub task: String,

    /// Step ceiling for this run
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Do not send screenshots to the model
    #[arg(long)]
    pub no_vision: bool,

    /// Launch the browser without a window
    #[arg(long)]
    pub headless: bool,

    /// Attach to a running browser (ws:// or http://host:port)
    #[arg(long, value_name = "URL")]
    pub cdp_url: Option<String>,

    /// Write an animated replay of the run
    #[arg(
        long,
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "agent_history.gif"
    )]
    pub gif: Option<PathBuf>,

    /// Save the run history as JSON
    #[arg(long, value_name = "FILE")]
    pub history_out: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(max_steps) = self.max_steps {
            config.agent.max_steps = max_steps;
        }
        if self.no_vision {
            config.agent.use_vision = false;
        }
        if self.gif.is_some() {
            config.agent.generate_gif = true;
            config.agent.gif_path = self.gif.clone();
        }
        apply_browser_flags(config, self.headless, self.cdp_url.as_deref());
    }
}

pub(crate) fn apply_browser_flags(config: &mut AppConfig, headless: bool, cdp_url: Option<&str>) {
    if headless {
        config.browser.headless = true;
    }
    if let Some(url) = cdp_url {
        config.browser.cdp_url = Some(url.to_string());
    }
}

/// Model providers for the agent and, when configured, its planner.
pub(crate) fn providers(
    config: &AppConfig,
) -> Result<(Arc<dyn LlmProvider>, Option<Arc<dyn LlmProvider>>)> {
    let llm = build_provider(&config.llm).context("configuring the model provider")?;
    let planner = config
        .resolved_planner_llm()
        .map(|planner| build_provider(&planner))
        .transpose()
        .context("configuring the planner model")?;
    Ok((llm, planner))
}

/// Stop the agent after its current step on Ctrl-C.
pub(crate) fn stop_on_interrupt(control: AgentControl) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current step");
            control.stop();
        }
    })
}

pub(crate) async fn close_browser(browser: &ChromeBrowser) {
    if let Err(err) = browser.close().await {
        warn!(%err, "closing the browser failed");
    }
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;
    let (llm, planner) = providers(&config)?;

    let browser = Arc::new(
        ChromeBrowser::launch(config.browser.clone())
            .await
            .context("starting the browser")?,
    );

    let mut builder = Agent::builder(args.task.clone(), llm)
        .settings(config.agent.clone())
        .browser(browser.clone())
        .browser_context_config(config.browser.new_context_config.clone());
    if let Some(planner) = planner {
        builder = builder.planner_llm(planner);
    }
    let mut agent = match builder.build() {
        Ok(agent) => agent,
        Err(err) => {
            close_browser(&browser).await;
            return Err(err).context("building the agent");
        }
    };

    info!(task = %args.task, max_steps = config.agent.max_steps, "starting agent run");
    let interrupt = stop_on_interrupt(agent.control());
    let outcome = agent.run(config.agent.max_steps).await;
    interrupt.abort();
    close_browser(&browser).await;
    let history = outcome.context("agent run failed")?;

    if let Some(path) = &args.history_out {
        history
            .save_to_file(path)
            .with_context(|| format!("saving history to {}", path.display()))?;
        info!(path = %path.display(), "saved run history");
    }

    let summary = HistorySummary::from_history(&history);
    print_summary(&summary, ctx.output())?;
    match summary.successful {
        Some(true) => Ok(()),
        Some(false) => bail!("the agent finished without completing the task"),
        None => bail!(
            "the agent stopped after {} steps without finishing",
            summary.steps
        ),
    }
}
