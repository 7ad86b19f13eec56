//! Prompt templates for the agent, planner, memory and output validation.
//!
//! The system prompt instructs the model on the element list format and the
//! JSON response shape; formatters turn browser state into user messages.

use chrono::Local;

use super::types::AgentStepInfo;
use crate::browser::BrowserState;
use crate::controller::ActionResult;

/// Default system prompt. `{max_actions}` is substituted at build time.
pub const AGENT_SYSTEM_PROMPT: &str = r#"You are a browser automation agent. Your task is to interact with web pages to accomplish the user's goal through an iterative observe-think-act loop.

## Input Format
Each step you receive:
1. **Current URL** and the open tabs
2. **Interactive elements** from the current viewport, one per line:
```
[33]<button type="submit">Submit Form</button>
[34]<input placeholder="Search" />
```
   - Only elements with a numeric `[index]` are interactive
   - Text without an index is context only
3. **Screenshot** (if enabled) of the current viewport
4. **Results** of the previous actions

## Response Format
You must ALWAYS respond with valid JSON in this exact format:
```json
{
  "current_state": {
    "evaluation_previous_goal": "Success|Failed|Unknown - Analyze the current elements and the image to check if the previous goals/actions are successful like intended by the task. Mention if something unexpected happened. Shortly state why/why not",
    "memory": "Description of what has been done and what you need to remember. Be very specific. Count here ALWAYS how many times you have done something and how many remain",
    "next_goal": "What needs to be done with the next immediate action"
  },
  "action": [
    {"one_action_name": {"parameter": "value"}}
  ]
}
```

## Actions
- Use a maximum of {max_actions} actions per sequence. Actions are executed in the given order.
- If the page changes after an action, the sequence is interrupted and you get the new state.
- Only chain actions that do not change the page, e.g. fill several form fields then click submit.
- Use `search_google` for searches and `go_to_url` when you know the address; never type URLs into search boxes.

## Element Interaction
- Only use indexes of the interactive elements listed in the current state.
- If no suitable element exists, scroll or use `scroll_to_text` to find it.
- Handle popups and cookie banners by accepting or closing them.
- If a captcha appears, try to solve it or use a different approach.

## Task Completion
- Use the `done` action as the last action as soon as the task is complete.
- If you reach the last step, use `done` even if the task is not finished, and report everything you found with `success` set to false.
- Put all the information the user asked for into the `text` of `done`.
- Do not hallucinate results; report only what you actually saw.

## Visual Context
- When a screenshot is provided, use it as ground truth for layout and visibility.
- Bounding box labels in the screenshot match the element indexes.

## Extraction
- Use `extract_content` when you need information from the whole page, not just the visible elements.
"#;

/// Planner system prompt.
pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are a planning agent that helps break down tasks into smaller steps and reason about the current state.
Your role is to:
1. Analyze the current state and history
2. Evaluate progress towards the ultimate goal
3. Identify potential challenges or roadblocks
4. Suggest the next high-level steps to take

Inside your messages, there will be AI messages from different agents with different formats.

Your output format should be always a JSON object with the following fields:
{
    "state_analysis": "Brief analysis of the current state and what has been done so far",
    "progress_evaluation": "Evaluation of progress towards the ultimate goal (as percentage and description)",
    "challenges": "List any potential challenges or roadblocks",
    "next_steps": "List 2-3 concrete next steps to take",
    "reasoning": "Explain your reasoning for the suggested next steps"
}

Ignore the other AI messages output structures.

Keep your responses concise and focused on actionable insights."#;

/// Procedural memory prompt; the conversation excerpt follows it.
pub const MEMORY_SYSTEM_PROMPT: &str = r#"You are summarizing the recent history of a browser automation agent into procedural memory.
Write a concise, factual summary that lets the agent continue the task without the original messages:
- the steps already taken and their outcomes
- pages visited and the data gathered so far, with exact values
- what failed and should not be retried
- what remains to be done
Do not invent information and do not include instructions for the agent. Respond in plain text."#;

/// Output validation prompt; the task and final answer follow it.
pub const VALIDATOR_SYSTEM_PROMPT: &str = r#"You are a validator of an agent who interacts with a browser.
Validate if the output of the last action is what the user wanted and if the task is completed.
If the task is unclear defined, you can let it pass. But if something is missing or the image does not show what was requested, dont let it pass.
Try to understand the page and help the model with suggestions like scroll, do x, ... to get the solution right.
Respond with a JSON object: {"is_valid": true or false, "reason": "explanation of why it is valid or not"}"#;

/// Build the agent system prompt honouring override/extension settings.
pub fn format_system_prompt(
    max_actions: u32,
    override_message: Option<&str>,
    extend_message: Option<&str>,
) -> String {
    let mut prompt = match override_message {
        Some(custom) => custom.to_string(),
        None => AGENT_SYSTEM_PROMPT.replace("{max_actions}", &max_actions.to_string()),
    };
    if let Some(extra) = extend_message {
        prompt.push('\n');
        prompt.push_str(extra);
    }
    prompt
}

pub fn format_planner_prompt(extend_message: Option<&str>) -> String {
    let mut prompt = PLANNER_SYSTEM_PROMPT.to_string();
    if let Some(extra) = extend_message {
        prompt.push('\n');
        prompt.push_str(extra);
    }
    prompt
}

/// Action list appended to the system prompt.
pub fn format_action_catalogue(description: &str) -> String {
    format!("Available actions:\n{description}")
}

pub fn format_task(task: &str) -> String {
    format!(
        "Your ultimate task is: \"\"\"{task}\"\"\". If you achieved your ultimate task, stop everything and use the done action in the next step to complete the task. If not, continue as usual."
    )
}

pub fn format_new_task(task: &str) -> String {
    format!(
        "Your new ultimate task is: \"\"\"{task}\"\"\". Take the previous context into account and finish your new ultimate task."
    )
}

/// Format the per-step state message.
pub fn format_state_message(
    state: &BrowserState,
    results: &[ActionResult],
    step_info: Option<&AgentStepInfo>,
    include_attributes: &[String],
) -> String {
    let mut message = String::new();

    message.push_str(&format!("Current url: {}\n", state.url));
    if !state.title.is_empty() {
        message.push_str(&format!("Page title: {}\n", state.title));
    }

    if !state.tabs.is_empty() {
        let tabs = state
            .tabs
            .iter()
            .map(|tab| format!("{{page_id: {}, url: {}, title: {}}}", tab.page_id, tab.url, tab.title))
            .collect::<Vec<_>>()
            .join(", ");
        message.push_str(&format!("Available tabs:\n[{tabs}]\n"));
    }

    message.push_str("Interactive elements from top layer of the current page inside the viewport:\n");
    let elements = state.element_tree(include_attributes);
    if elements.is_empty() {
        message.push_str("empty page\n");
    } else {
        if state.pixels_above > 0 {
            message.push_str(&format!(
                "... {} pixels above - scroll or extract content to see more ...\n",
                state.pixels_above
            ));
        } else {
            message.push_str("[Start of page]\n");
        }
        message.push_str(&elements);
        message.push('\n');
        if state.pixels_below > 0 {
            message.push_str(&format!(
                "... {} pixels below - scroll or extract content to see more ...\n",
                state.pixels_below
            ));
        } else {
            message.push_str("[End of page]\n");
        }
    }

    if let Some(info) = step_info {
        message.push_str(&format!(
            "Current step: {}/{}\n",
            info.step_number, info.max_steps
        ));
        if info.is_last_step() {
            message.push_str(LAST_STEP_NOTE);
            message.push('\n');
        }
    }
    message.push_str(&format!(
        "Current date and time: {}\n",
        Local::now().format("%Y-%m-%d %H:%M")
    ));

    for (i, result) in results.iter().enumerate() {
        let position = i + 1;
        if let Some(content) = &result.extracted_content {
            message.push_str(&format!(
                "Action result {position}/{}: {content}\n",
                results.len()
            ));
        }
        if let Some(error) = &result.error {
            message.push_str(&format!(
                "Action error {position}/{}: ...{}\n",
                results.len(),
                tail_chars(error, 300)
            ));
        }
    }

    message
}

/// Note appended on the final step.
pub const LAST_STEP_NOTE: &str = "Now comes your last step. Use only the \"done\" action now. No other actions - so here your action sequence must have length 1.\nIf the task is not yet fully finished as requested by the user, set success in \"done\" to false! E.g. if not all steps are fully completed.\nIf the task is fully finished, set success in \"done\" to true.\nInclude everything you found out for the ultimate task in the done text.";

fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{DomElement, TabInfo};

    fn test_state() -> BrowserState {
        BrowserState {
            url: "https://www.google.com".to_string(),
            title: "Google".to_string(),
            tabs: vec![TabInfo {
                page_id: 0,
                url: "https://www.google.com".to_string(),
                title: "Google".to_string(),
            }],
            elements: vec![
                DomElement::new(0, "input").with_attribute("aria-label", "Search"),
                DomElement::new(1, "button").with_text("Google Search"),
            ],
            screenshot: None,
            pixels_above: 0,
            pixels_below: 640,
        }
    }

    #[test]
    fn test_system_prompt_substitutes_max_actions() {
        let prompt = format_system_prompt(4, None, Some("Always answer in French."));
        assert!(prompt.contains("maximum of 4 actions"));
        assert!(prompt.ends_with("Always answer in French."));

        let custom = format_system_prompt(4, Some("custom"), None);
        assert_eq!(custom, "custom");
    }

    #[test]
    fn test_state_message_lists_elements_and_scroll() {
        let attrs = vec!["aria-label".to_string()];
        let message = format_state_message(
            &test_state(),
            &[],
            Some(&AgentStepInfo::new(2, 10)),
            &attrs,
        );
        assert!(message.contains("Current url: https://www.google.com"));
        assert!(message.contains("[0]<input aria-label=\"Search\" />"));
        assert!(message.contains("[Start of page]"));
        assert!(message.contains("640 pixels below"));
        assert!(message.contains("Current step: 2/10"));
        assert!(!message.contains("last step"));

        let last = format_state_message(&test_state(), &[], Some(&AgentStepInfo::new(10, 10)), &attrs);
        assert!(last.contains("Now comes your last step"));
    }

    #[test]
    fn test_state_message_includes_results() {
        let results = vec![
            ActionResult::memory("Clicked element with index 1"),
            ActionResult::error("element 9 missing"),
        ];
        let message = format_state_message(&test_state(), &results, None, &[]);
        assert!(message.contains("Action result 1/2: Clicked element with index 1"));
        assert!(message.contains("Action error 2/2: ...element 9 missing"));
    }

    #[test]
    fn test_empty_page() {
        let state = BrowserState::default();
        let message = format_state_message(&state, &[], None, &[]);
        assert!(message.contains("empty page"));
    }
}
