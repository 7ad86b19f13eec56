//! Built-in browser actions.

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;
use url::Url;

use super::registry::ActionRegistry;
use super::{ActionContext, ActionResult};
use crate::browser::ScrollDirection;
use crate::errors::AgentError;
use crate::llm::{ChatMessage, CompletionOptions};

/// Page text handed to the extraction model is capped at this many chars.
const MAX_EXTRACTION_CHARS: usize = 40_000;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DoneParams {
    pub text: String,
    #[serde(default = "default_true")]
    pub success: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UrlParams {
    pub url: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WaitParams {
    #[serde(default = "default_wait_seconds")]
    pub seconds: u64,
}

fn default_wait_seconds() -> u64 {
    3
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IndexParams {
    pub index: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InputTextParams {
    pub index: u32,
    pub text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SwitchTabParams {
    pub page_id: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExtractParams {
    pub goal: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScrollParams {
    /// Pixels to scroll; one page when omitted.
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendKeysParams {
    pub keys: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TextParams {
    pub text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SelectOptionParams {
    pub index: u32,
    pub text: String,
}

pub(crate) fn register_builtin(registry: &mut ActionRegistry) {
    registry.register(
        "done",
        "Complete task - with return text and if the task is finished (success=True) or not yet completely finished (success=False), because last step is reached",
        |params: DoneParams, _ctx: ActionContext| async move {
            Ok(ActionResult::done(params.text, params.success))
        },
    );

    registry.register(
        "search_google",
        "Search the query in Google in the current tab, the query should be a search query like humans search in Google, concrete and not vague or super long",
        |params: SearchParams, ctx: ActionContext| async move {
            let url = google_search_url(&params.query)?;
            ctx.browser.navigate(url.as_str()).await?;
            let message = format!("Searched for \"{}\" in Google", params.query);
            info!("{message}");
            Ok::<_, AgentError>(ActionResult::memory(message))
        },
    );

    registry.register(
        "go_to_url",
        "Navigate to URL in the current tab",
        |params: UrlParams, ctx: ActionContext| async move {
            ctx.browser.navigate(&params.url).await?;
            let message = format!("Navigated to {}", params.url);
            info!("{message}");
            Ok::<_, AgentError>(ActionResult::memory(message))
        },
    );

    registry.register(
        "go_back",
        "Go back",
        |_: NoParams, ctx: ActionContext| async move {
            ctx.browser.go_back().await?;
            Ok::<_, AgentError>(ActionResult::memory("Navigated back"))
        },
    );

    registry.register(
        "wait",
        "Wait for x seconds default 3",
        |params: WaitParams, _ctx: ActionContext| async move {
            tokio::time::sleep(Duration::from_secs(params.seconds)).await;
            Ok::<_, AgentError>(ActionResult::memory(format!(
                "Waited for {} seconds",
                params.seconds
            )))
        },
    );

    registry.register(
        "click_element",
        "Click element by index",
        |params: IndexParams, ctx: ActionContext| async move {
            ctx.browser.click_element(params.index).await?;
            let message = format!("Clicked element with index {}", params.index);
            info!("{message}");
            Ok::<_, AgentError>(ActionResult::memory(message))
        },
    );

    registry.register(
        "input_text",
        "Input text into a input interactive element",
        |params: InputTextParams, ctx: ActionContext| async move {
            ctx.browser.input_text(params.index, &params.text).await?;
            Ok::<_, AgentError>(ActionResult::memory(format!(
                "Input {} into index {}",
                params.text, params.index
            )))
        },
    );

    registry.register(
        "switch_tab",
        "Switch tab",
        |params: SwitchTabParams, ctx: ActionContext| async move {
            ctx.browser.switch_tab(params.page_id).await?;
            Ok::<_, AgentError>(ActionResult::memory(format!(
                "Switched to tab {}",
                params.page_id
            )))
        },
    );

    registry.register(
        "open_tab",
        "Open url in new tab",
        |params: UrlParams, ctx: ActionContext| async move {
            ctx.browser.open_tab(&params.url).await?;
            Ok::<_, AgentError>(ActionResult::memory(format!(
                "Opened new tab with {}",
                params.url
            )))
        },
    );

    registry.register(
        "extract_content",
        "Extract page content to retrieve specific information from the page, e.g. all company names, a specific description, all information about, links with companies in structured format or simply links",
        |params: ExtractParams, ctx: ActionContext| async move { extract_content(params, ctx).await },
    );

    registry.register(
        "scroll_down",
        "Scroll down the page by pixel amount - if no amount is specified, scroll down one page",
        |params: ScrollParams, ctx: ActionContext| async move {
            ctx.browser.scroll(ScrollDirection::Down, params.amount).await?;
            Ok::<_, AgentError>(ActionResult::memory(scroll_message("down", params.amount)))
        },
    );

    registry.register(
        "scroll_up",
        "Scroll up the page by pixel amount - if no amount is specified, scroll up one page",
        |params: ScrollParams, ctx: ActionContext| async move {
            ctx.browser.scroll(ScrollDirection::Up, params.amount).await?;
            Ok::<_, AgentError>(ActionResult::memory(scroll_message("up", params.amount)))
        },
    );

    registry.register(
        "send_keys",
        "Send strings of special keys like Escape, Backspace, Insert, PageDown, Delete, Enter. Shortcuts such as `Control+o`, `Control+Shift+T` are supported as well",
        |params: SendKeysParams, ctx: ActionContext| async move {
            ctx.browser.send_keys(&params.keys).await?;
            Ok::<_, AgentError>(ActionResult::memory(format!("Sent keys: {}", params.keys)))
        },
    );

    registry.register(
        "scroll_to_text",
        "If you dont find something which you want to interact with, scroll to it",
        |params: TextParams, ctx: ActionContext| async move {
            let found = ctx.browser.scroll_to_text(&params.text).await?;
            let message = if found {
                format!("Scrolled to text: {}", params.text)
            } else {
                format!("Text '{}' not found or not visible on page", params.text)
            };
            Ok::<_, AgentError>(ActionResult::memory(message))
        },
    );

    registry.register(
        "get_dropdown_options",
        "Get all options from a native dropdown",
        |params: IndexParams, ctx: ActionContext| async move {
            let options = ctx.browser.dropdown_options(params.index).await?;
            if options.is_empty() {
                return Ok(ActionResult::memory(format!(
                    "No options found in dropdown with index {}",
                    params.index
                )));
            }
            let listing = options
                .iter()
                .enumerate()
                .map(|(i, option)| format!("{i}: text={option:?}"))
                .collect::<Vec<_>>()
                .join("\n");
            Ok::<_, AgentError>(ActionResult::memory(format!(
                "{listing}\nUse the exact text string in select_dropdown_option"
            )))
        },
    );

    registry.register(
        "select_dropdown_option",
        "Select dropdown option for interactive element index by the text of the option you want to select",
        |params: SelectOptionParams, ctx: ActionContext| async move {
            ctx.browser
                .select_dropdown_option(params.index, &params.text)
                .await?;
            Ok::<_, AgentError>(ActionResult::memory(format!(
                "Selected option {:?} in dropdown {}",
                params.text, params.index
            )))
        },
    );
}

fn google_search_url(query: &str) -> Result<Url, AgentError> {
    Url::parse_with_params(
        "https://www.google.com/search",
        [("q", query), ("udm", "14")],
    )
    .map_err(|err| AgentError::action("search_google", err.to_string()))
}

fn scroll_message(direction: &str, amount: Option<i64>) -> String {
    match amount {
        Some(pixels) => format!("Scrolled {direction} the page by {pixels} pixels"),
        None => format!("Scrolled {direction} the page by one page"),
    }
}

async fn extract_content(
    params: ExtractParams,
    ctx: ActionContext,
) -> Result<ActionResult, AgentError> {
    let text = ctx.browser.page_text().await?;
    let page: String = text.chars().take(MAX_EXTRACTION_CHARS).collect();

    let Some(llm) = ctx.page_extraction_llm.as_ref() else {
        return Ok(ActionResult::memory(format!("Page content:\n{page}")));
    };

    let prompt = format!(
        "Your task is to extract the content of the page. You will be given a page and a goal \
         and you should extract all relevant information around this goal from the page. \
         If the goal is vague, summarize the page. Respond in json format.\n\
         Extraction goal: {}, Page: {}",
        params.goal, page
    );
    match llm
        .complete(&[ChatMessage::user(prompt)], &CompletionOptions::default())
        .await
    {
        Ok(response) => Ok(ActionResult::memory(format!(
            "Extracted from page\n: {}\n",
            response.content
        ))),
        Err(err) => {
            tracing::warn!(error = %err, "extraction model failed, returning raw page text");
            Ok(ActionResult::memory(format!("Page content:\n{page}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_is_encoded() {
        let url = google_search_url("rust async & tokio").unwrap();
        assert_eq!(url.host_str(), Some("www.google.com"));
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs[0].1, "rust async & tokio");
        assert_eq!(pairs[1].1, "14");
    }

    #[test]
    fn builtin_catalogue_is_complete() {
        let mut registry = ActionRegistry::new();
        register_builtin(&mut registry);
        assert_eq!(
            registry.names(),
            vec![
                "done",
                "search_google",
                "go_to_url",
                "go_back",
                "wait",
                "click_element",
                "input_text",
                "switch_tab",
                "open_tab",
                "extract_content",
                "scroll_down",
                "scroll_up",
                "send_keys",
                "scroll_to_text",
                "get_dropdown_options",
                "select_dropdown_option",
            ]
        );
        let wait = registry.get("wait").unwrap();
        assert!(wait.param_schema.get("required").is_none());
    }
}
