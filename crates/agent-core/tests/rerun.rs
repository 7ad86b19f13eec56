mod support;

use std::sync::Arc;
use std::time::Duration;

use agent_core::{
    Agent, AgentError, AgentHistoryList, AgentSettings, DomElement, MockLlmProvider,
};
use serde_json::json;
use support::{done_reply, reply, search_page, FakeContext};

fn settings() -> AgentSettings {
    AgentSettings::new()
        .vision(false)
        .memory(false, 10)
        .wait_between_actions(Duration::ZERO)
}

async fn recorded_search_run() -> AgentHistoryList {
    let llm = Arc::new(MockLlmProvider::with_replies([
        reply(
            "search",
            json!([
                {"input_text": {"index": 1, "text": "tokio"}},
                {"click_element": {"index": 2}}
            ]),
        ),
        done_reply("found tokio"),
    ]));
    let context = FakeContext::new("https://example.com", search_page());
    let mut agent = Agent::builder("Search for tokio", llm)
        .settings(settings())
        .browser_context(context)
        .build()
        .expect("agent");
    agent.run(5).await.expect("recording run")
}

/// Same page with a banner pushed in front, shifting every index.
fn shifted_page() -> Vec<DomElement> {
    let mut elements = vec![
        DomElement::new(0, "button").with_text("Accept cookies"),
        DomElement::new(1, "a").with_attribute("href", "/about").with_text("About"),
    ];
    for (offset, element) in search_page().into_iter().enumerate() {
        let mut element = element;
        element.index = offset as u32 + 2;
        elements.push(element);
    }
    elements
}

fn replay_agent(context: Arc<FakeContext>) -> Agent {
    Agent::builder("replay", Arc::new(MockLlmProvider::new()))
        .settings(settings())
        .browser_context(context)
        .build()
        .expect("agent")
}

#[tokio::test]
async fn replay_follows_moved_elements() {
    let history = recorded_search_run().await;
    let context = FakeContext::new("https://example.com", shifted_page());
    let mut agent = replay_agent(context.clone());

    let results = agent
        .rerun_history(&history, 3, false, Duration::ZERO)
        .await
        .expect("replay");

    assert_eq!(context.log(), vec!["input:3:tokio", "click:4"]);
    assert_eq!(results.len(), 3);
    assert!(results[2].is_done);
    assert_eq!(results[2].extracted_content.as_deref(), Some("found tokio"));
}

#[tokio::test]
async fn replay_from_saved_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.json");
    recorded_search_run()
        .await
        .save_to_file(&path)
        .expect("save history");

    let loaded = AgentHistoryList::load_from_file(&path).expect("load history");
    let context = FakeContext::new("https://example.com", search_page());
    let mut agent = replay_agent(context.clone());
    agent
        .rerun_history(&loaded, 1, false, Duration::ZERO)
        .await
        .expect("replay");

    assert_eq!(context.log(), vec!["input:1:tokio", "click:2"]);
}

#[tokio::test]
async fn missing_element_aborts_replay() {
    let history = recorded_search_run().await;
    let context = FakeContext::new("https://example.com", Vec::new());
    let mut agent = replay_agent(context.clone());

    let err = agent
        .rerun_history(&history, 2, false, Duration::from_millis(5))
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Action { .. }));
    assert!(err.to_string().contains("failed after 2 attempts"));
    assert!(context.log().is_empty());
    // two attempts, each observing the page once
    assert_eq!(context.observations(), 2);
}

#[tokio::test]
async fn skip_failures_keeps_replaying() {
    let history = recorded_search_run().await;
    let context = FakeContext::new("https://example.com", Vec::new());
    let mut agent = replay_agent(context);

    let results = agent
        .rerun_history(&history, 1, true, Duration::ZERO)
        .await
        .expect("replay");

    assert_eq!(results.len(), 2);
    assert!(results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("could not find matching element 1"));
    assert!(results[1].is_done);
}

#[tokio::test]
async fn steps_without_output_are_skipped() {
    let llm = Arc::new(MockLlmProvider::with_replies(["garbage".to_string(), done_reply("ok")]));
    let context = FakeContext::new("https://example.com", search_page());
    let mut recorder = Agent::builder("flaky", llm)
        .settings(settings())
        .browser_context(context)
        .build()
        .expect("agent");
    let history = recorder.run(5).await.expect("run");
    assert!(history.history[0].model_output.is_none());

    let replay_context = FakeContext::new("https://example.com", search_page());
    let mut agent = replay_agent(replay_context);
    let results = agent
        .rerun_history(&history, 1, false, Duration::ZERO)
        .await
        .expect("replay");

    assert_eq!(results[0].error.as_deref(), Some("No action to replay"));
    assert!(results[1].is_done);
}
