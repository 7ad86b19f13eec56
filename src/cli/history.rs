use std::path::PathBuf;

use agent_core::AgentHistoryList;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use super::context::CliContext;
use super::output::{render_structured, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct HistoryArgs {
    /// History file written by `run --history-out`
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

pub async fn cmd_history(args: HistoryArgs, ctx: &CliContext) -> Result<()> {
    let history = AgentHistoryList::load_from_file(&args.file)
        .with_context(|| format!("loading history from {}", args.file.display()))?;
    print_summary(&HistorySummary::from_history(&history), ctx.output())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepError {
    pub step: usize,
    pub error: String,
}

/// Condensed view of a recorded run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub steps: usize,
    pub done: bool,
    pub successful: Option<bool>,
    pub final_result: Option<String>,
    pub duration_seconds: f64,
    pub input_tokens: usize,
    pub actions: Vec<String>,
    pub urls: Vec<String>,
    pub errors: Vec<StepError>,
}

impl HistorySummary {
    pub fn from_history(history: &AgentHistoryList) -> Self {
        let mut urls: Vec<String> = Vec::new();
        for url in history.urls() {
            if !url.is_empty() && urls.last() != Some(&url) {
                urls.push(url);
            }
        }
        let errors = history
            .errors()
            .into_iter()
            .enumerate()
            .filter_map(|(i, error)| error.map(|error| StepError { step: i + 1, error }))
            .collect();

        Self {
            steps: history.number_of_steps(),
            done: history.is_done(),
            successful: history.is_successful(),
            final_result: history.final_result(),
            duration_seconds: history.total_duration_seconds(),
            input_tokens: history.total_input_tokens(),
            actions: history.action_names(),
            urls,
            errors,
        }
    }

    fn status(&self) -> &'static str {
        match (self.done, self.successful) {
            (true, Some(true)) => "done (success)",
            (true, _) => "done (failure)",
            (false, _) => "not finished",
        }
    }

    pub fn render_human(&self) -> String {
        let mut lines = vec![
            format!(
                "Steps: {} ({:.1}s, ~{} input tokens)",
                self.steps, self.duration_seconds, self.input_tokens
            ),
            format!("Status: {}", self.status()),
        ];
        if let Some(result) = &self.final_result {
            lines.push(format!("Final result: {result}"));
        }
        if !self.actions.is_empty() {
            lines.push(format!("Actions: {}", self.actions.join(", ")));
        }
        if !self.urls.is_empty() {
            lines.push("URLs visited:".to_string());
            lines.extend(self.urls.iter().map(|url| format!("  - {url}")));
        }
        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            lines.extend(
                self.errors
                    .iter()
                    .map(|e| format!("  step {}: {}", e.step, e.error)),
            );
        }
        lines.join("\n")
    }
}

pub fn print_summary(summary: &HistorySummary, format: OutputFormat) -> Result<()> {
    match render_structured(summary, format)? {
        Some(rendered) => println!("{rendered}"),
        None => println!("{}", summary.render_human()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AgentHistory, BrowserStateHistory, StepMetadata};

    fn history_fixture() -> AgentHistoryList {
        serde_json::from_str(include_str!("../../tests/fixtures/history.json")).unwrap()
    }

    #[test]
    fn summarizes_a_finished_run() {
        let summary = HistorySummary::from_history(&history_fixture());
        assert_eq!(summary.steps, 3);
        assert!(summary.done);
        assert_eq!(summary.successful, Some(true));
        assert_eq!(summary.final_result.as_deref(), Some("Example Domain"));
        assert_eq!(summary.input_tokens, 2500);
        assert!((summary.duration_seconds - 3.0).abs() < 1e-9);
        assert_eq!(summary.actions, vec!["go_to_url", "click_element", "done"]);
        assert_eq!(
            summary.urls,
            vec!["about:blank".to_string(), "https://example.com/".to_string()]
        );
        assert_eq!(
            summary.errors,
            vec![StepError {
                step: 2,
                error: "element 3 not found".into()
            }]
        );

        let human = summary.render_human();
        assert!(human.contains("Status: done (success)"));
        assert!(human.contains("step 2: element 3 not found"));
    }

    #[test]
    fn empty_history_is_not_finished() {
        let mut history = AgentHistoryList::new();
        history.push(AgentHistory {
            model_output: None,
            result: Vec::new(),
            state: BrowserStateHistory::default(),
            metadata: None::<StepMetadata>,
        });
        let summary = HistorySummary::from_history(&history);
        assert!(!summary.done);
        assert_eq!(summary.successful, None);
        assert!(summary.urls.is_empty());
        assert!(summary.render_human().contains("not finished"));
    }
}
