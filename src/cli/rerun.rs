use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_core::{ActionResult, Agent, AgentHistoryList};
use anyhow::{bail, Context, Result};
use cdp_adapter::ChromeBrowser;
use clap::Args;
use tracing::info;

use super::context::CliContext;
use super::output::render_structured;
use super::run::{apply_browser_flags, close_browser, providers, stop_on_interrupt};

#[derive(Args, Clone, Debug)]
pub struct RerunArgs {
    /// History file written by `run --history-out`
    #[arg(value_name = "FILE")]
    pub history: PathBuf,

    /// Attempts per step before it counts as failed
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Record failing steps and keep going instead of aborting
    #[arg(long)]
    pub skip_failures: bool,

    /// Pause between replayed actions, in seconds
    #[arg(long, default_value_t = 2.0)]
    pub delay: f64,

    /// Launch the browser without a window
    #[arg(long)]
    pub headless: bool,

    /// Attach to a running browser (ws:// or http://host:port)
    #[arg(long, value_name = "URL")]
    pub cdp_url: Option<String>,
}

pub async fn cmd_rerun(args: RerunArgs, ctx: &CliContext) -> Result<()> {
    if !args.delay.is_finite() || args.delay < 0.0 {
        bail!("--delay must be a non-negative number of seconds");
    }
    let history = AgentHistoryList::load_from_file(&args.history)
        .with_context(|| format!("loading history from {}", args.history.display()))?;

    let mut config = ctx.config().clone();
    apply_browser_flags(&mut config, args.headless, args.cdp_url.as_deref());
    config.validate().context("invalid configuration")?;
    let (llm, _) = providers(&config)?;

    let browser = Arc::new(
        ChromeBrowser::launch(config.browser.clone())
            .await
            .context("starting the browser")?,
    );
    let built = Agent::builder(format!("Replay {}", args.history.display()), llm)
        .settings(config.agent.clone())
        .browser(browser.clone())
        .browser_context_config(config.browser.new_context_config.clone())
        .build();
    let mut agent = match built {
        Ok(agent) => agent,
        Err(err) => {
            close_browser(&browser).await;
            return Err(err).context("building the agent");
        }
    };

    info!(
        steps = history.number_of_steps(),
        max_retries = args.max_retries,
        skip_failures = args.skip_failures,
        "replaying history"
    );
    let interrupt = stop_on_interrupt(agent.control());
    let outcome = agent
        .rerun_history(
            &history,
            args.max_retries,
            args.skip_failures,
            Duration::from_secs_f64(args.delay),
        )
        .await;
    interrupt.abort();
    close_browser(&browser).await;
    let results = outcome.context("replay failed")?;

    match render_structured(&results, ctx.output())? {
        Some(rendered) => println!("{rendered}"),
        None => println!("{}", render_results(&results)),
    }
    Ok(())
}

fn render_results(results: &[ActionResult]) -> String {
    let errors: Vec<&str> = results
        .iter()
        .filter_map(|result| result.error.as_deref())
        .collect();
    let mut lines = vec![format!(
        "Replayed {} actions, {} failed",
        results.len(),
        errors.len()
    )];
    if let Some(done) = results.iter().rev().find(|result| result.is_done) {
        if let Some(content) = &done.extracted_content {
            lines.push(format!("Final result: {content}"));
        }
    }
    lines.extend(errors.iter().map(|error| format!("  error: {error}")));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_counts_errors_and_final_result() {
        let results = vec![
            ActionResult::default(),
            ActionResult::error("Step 2 failed after 3 attempts: element missing"),
            ActionResult {
                is_done: true,
                success: Some(true),
                extracted_content: Some("42 stars".into()),
                ..ActionResult::default()
            },
        ];
        let rendered = render_results(&results);
        assert!(rendered.starts_with("Replayed 3 actions, 1 failed"));
        assert!(rendered.contains("Final result: 42 stars"));
        assert!(rendered.contains("error: Step 2 failed after 3 attempts"));
    }
}
