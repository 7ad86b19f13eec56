//! `ChromeContext` behaviour against a scripted CDP transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_core::{
    Browser, BrowserContext, BrowserContextConfig, BrowserError, ScrollDirection, Viewport,
};
use async_trait::async_trait;
use cdp_adapter::{
    AdapterError, AdapterErrorKind, BrowserConfig, CdpTransport, ChromeBrowser, CommandTarget,
};
use serde_json::{json, Value};

type Responder = Box<dyn Fn(&str, &Value) -> Result<Value, AdapterError> + Send + Sync>;

/// Records every command and answers through a test supplied responder.
/// Commands the responder does not know fall back to stock replies.
struct ScriptedTransport {
    calls: Mutex<Vec<(CommandTarget, String, Value)>>,
    responder: Responder,
}

impl ScriptedTransport {
    fn new(
        responder: impl Fn(&str, &Value) -> Option<Result<Value, AdapterError>>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(move |method, params| {
                responder(method, params).unwrap_or_else(|| Ok(stock_reply(method, params)))
            }),
        })
    }

    fn calls(&self) -> Vec<(CommandTarget, String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, method, _)| method).collect()
    }

    fn params_of(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(_, m, _)| m == method)
            .map(|(_, _, params)| params)
            .collect()
    }
}

#[async_trait]
impl CdpTransport for ScriptedTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.calls
            .lock()
            .unwrap()
            .push((target, method.to_string(), params.clone()));
        (self.responder)(method, &params)
    }
}

fn script_name(params: &Value) -> &str {
    let expression = params["expression"].as_str().unwrap_or_default();
    expression
        .rsplit_once("sourceURL=webpilot/")
        .map(|(_, name)| name.trim_end_matches(".js"))
        .unwrap_or_default()
}

fn evaluated(value: Value) -> Value {
    json!({ "result": { "type": "object", "value": value } })
}

fn stock_reply(method: &str, params: &Value) -> Value {
    match method {
        "Target.createBrowserContext" => json!({ "browserContextId": "CTX-1" }),
        "Target.createTarget" => json!({ "targetId": format!("T-{}", params["url"].as_str().unwrap_or("")) }),
        "Target.attachToTarget" => {
            json!({ "sessionId": format!("S-{}", params["targetId"].as_str().unwrap_or("")) })
        }
        "Target.getTargets" => json!({ "targetInfos": [] }),
        "Target.getTargetInfo" => json!({
            "targetInfo": { "url": "https://example.com/", "title": "Example Domain" }
        }),
        "Page.navigate" => json!({ "frameId": "F1" }),
        "Page.captureScreenshot" => json!({ "data": "iVBORw0KGgo=" }),
        "Runtime.evaluate" => match script_name(params) {
            "load_state" => evaluated(json!({ "ready": "complete", "resources": 3 })),
            _ => evaluated(Value::Null),
        },
        _ => json!({}),
    }
}

fn quick_config() -> BrowserContextConfig {
    BrowserContextConfig {
        minimum_wait_page_load_time: Duration::ZERO,
        wait_for_network_idle_page_load_time: Duration::ZERO,
        maximum_wait_page_load_time: Duration::from_millis(200),
        viewport: Viewport {
            width: 1024,
            height: 768,
        },
        user_agent: Some("webpilot-test".to_string()),
        highlight_elements: true,
        cookies_file: None,
    }
}

fn browser_over(transport: Arc<ScriptedTransport>) -> ChromeBrowser {
    ChromeBrowser::with_transport(BrowserConfig::default(), transport)
}

#[tokio::test]
async fn new_context_opens_a_prepared_tab() {
    let transport = ScriptedTransport::new(|_, _| None);
    let browser = browser_over(transport.clone());

    let context = browser
        .new_chrome_context(quick_config())
        .await
        .expect("context");
    assert_eq!(context.browser_context_id(), "CTX-1");

    assert_eq!(
        transport.methods(),
        vec![
            "Target.createBrowserContext",
            "Target.createTarget",
            "Target.attachToTarget",
            "Emulation.setDeviceMetricsOverride",
            "Emulation.setUserAgentOverride",
        ]
    );
    let target = &transport.params_of("Target.createTarget")[0];
    assert_eq!(target["browserContextId"], "CTX-1");
    assert_eq!(target["url"], "about:blank");
    assert_eq!(transport.params_of("Target.attachToTarget")[0]["flatten"], true);

    let calls = transport.calls();
    let (metrics_target, _, metrics) = &calls[3];
    assert_eq!(
        metrics_target,
        &CommandTarget::Session("S-T-about:blank".to_string())
    );
    assert_eq!(metrics["width"], 1024);
    assert_eq!(metrics["height"], 768);
}

#[tokio::test]
async fn state_combines_snapshot_tabs_and_screenshot() {
    let transport = ScriptedTransport::new(|method, params| {
        (method == "Runtime.evaluate" && script_name(params) == "dom_tree").then(|| {
            assert!(params["expression"]
                .as_str()
                .unwrap()
                .contains(r#"({"highlight":true})"#));
            Ok(evaluated(json!({
                "url": "https://example.com/",
                "title": "Example Domain",
                "elements": [
                    {"index": 0, "tag_name": "a", "attributes": {"href": "https://www.iana.org/domains/example"}, "text": "More information...", "xpath": "html/body/div/p[2]/a"}
                ],
                "pixels_above": 0,
                "pixels_below": 320
            })))
        })
    });
    let context = browser_over(transport.clone())
        .new_context(quick_config())
        .await
        .expect("context");

    let state = context.get_state(true).await.expect("state");
    assert_eq!(state.url, "https://example.com/");
    assert_eq!(state.title, "Example Domain");
    assert_eq!(state.elements.len(), 1);
    assert_eq!(state.elements[0].text, "More information...");
    assert_eq!(state.pixels_below, 320);
    assert_eq!(state.screenshot.as_deref(), Some("iVBORw0KGgo="));
    assert_eq!(state.tabs.len(), 1);
    assert_eq!(state.tabs[0].title, "Example Domain");

    let without_vision = context.get_state(false).await.expect("state");
    assert!(without_vision.screenshot.is_none());
    assert_eq!(transport.params_of("Page.captureScreenshot").len(), 1);
}

#[tokio::test]
async fn click_dispatches_mouse_events_at_element_centre() {
    let transport = ScriptedTransport::new(|method, params| {
        (method == "Runtime.evaluate" && script_name(params) == "click_target")
            .then(|| Ok(evaluated(json!({ "x": 120.5, "y": 48.0 }))))
    });
    let context = browser_over(transport.clone())
        .new_context(quick_config())
        .await
        .expect("context");

    context.click_element(3).await.expect("click");

    let clicks = transport.params_of("Input.dispatchMouseEvent");
    assert_eq!(clicks.len(), 2);
    assert_eq!(clicks[0]["type"], "mousePressed");
    assert_eq!(clicks[1]["type"], "mouseReleased");
    assert_eq!(clicks[0]["x"], 120.5);
    assert_eq!(clicks[0]["y"], 48.0);
    assert_eq!(clicks[0]["button"], "left");

    let expression = transport
        .params_of("Runtime.evaluate")
        .into_iter()
        .find(|p| script_name(p) == "click_target")
        .unwrap();
    assert!(expression["expression"]
        .as_str()
        .unwrap()
        .contains(r#"({"index":3})"#));
}

#[tokio::test]
async fn click_on_unknown_index_fails() {
    let transport = ScriptedTransport::new(|_, _| None);
    let context = browser_over(transport.clone())
        .new_context(quick_config())
        .await
        .expect("context");

    let err = context.click_element(7).await.unwrap_err();
    assert!(matches!(err, BrowserError::ElementNotFound(7)));
    assert!(transport.params_of("Input.dispatchMouseEvent").is_empty());
}

#[tokio::test]
async fn click_adopts_tab_opened_by_page() {
    let transport = ScriptedTransport::new(|method, params| match method {
        "Runtime.evaluate" if script_name(params) == "click_target" => {
            Some(Ok(evaluated(json!({ "x": 1, "y": 1 }))))
        }
        "Target.getTargets" => Some(Ok(json!({
            "targetInfos": [
                {"targetId": "T-about:blank", "type": "page", "browserContextId": "CTX-1"},
                {"targetId": "POPUP", "type": "page", "browserContextId": "CTX-1"},
                {"targetId": "FOREIGN", "type": "page", "browserContextId": "CTX-9"},
                {"targetId": "WORKER", "type": "service_worker", "browserContextId": "CTX-1"}
            ]
        }))),
        _ => None,
    });
    let context = browser_over(transport.clone())
        .new_context(quick_config())
        .await
        .expect("context");

    context.click_element(0).await.expect("click");

    let attached: Vec<Value> = transport
        .params_of("Target.attachToTarget")
        .into_iter()
        .map(|p| p["targetId"].clone())
        .collect();
    assert_eq!(attached, vec![json!("T-about:blank"), json!("POPUP")]);

    context.scroll(ScrollDirection::Down, Some(200)).await.expect("scroll");
    let (target, _, _) = transport.calls().last().cloned().unwrap();
    assert_eq!(target, CommandTarget::Session("S-POPUP".to_string()));
}

#[tokio::test]
async fn input_text_focuses_then_inserts() {
    let transport = ScriptedTransport::new(|method, params| {
        (method == "Runtime.evaluate" && script_name(params) == "focus_and_clear")
            .then(|| Ok(evaluated(json!(params["expression"].as_str().unwrap().contains(r#"{"index":1}"#)))))
    });
    let context = browser_over(transport.clone())
        .new_context(quick_config())
        .await
        .expect("context");

    context.input_text(1, "rust agents").await.expect("input");
    assert_eq!(
        transport.params_of("Input.insertText"),
        vec![json!({ "text": "rust agents" })]
    );

    let err = context.input_text(2, "nope").await.unwrap_err();
    assert!(matches!(err, BrowserError::ElementNotFound(2)));
}

#[tokio::test]
async fn navigation_errors_surface() {
    let transport = ScriptedTransport::new(|method, _| {
        (method == "Page.navigate")
            .then(|| Ok(json!({ "frameId": "F1", "errorText": "net::ERR_NAME_NOT_RESOLVED" })))
    });
    let context = browser_over(transport)
        .new_context(quick_config())
        .await
        .expect("context");

    let err = context.navigate("https://nowhere.invalid").await.unwrap_err();
    match err {
        BrowserError::Navigation(message) => {
            assert!(message.contains("net::ERR_NAME_NOT_RESOLVED"));
            assert!(message.contains("https://nowhere.invalid"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn navigate_waits_for_load_state() {
    let transport = ScriptedTransport::new(|_, _| None);
    let context = browser_over(transport.clone())
        .new_context(quick_config())
        .await
        .expect("context");

    context.navigate("https://example.com").await.expect("navigate");
    let methods = transport.methods();
    let nav = methods.iter().position(|m| m == "Page.navigate").unwrap();
    assert_eq!(methods[nav + 1], "Runtime.evaluate");
    assert_eq!(script_name(&transport.calls()[nav + 1].2), "load_state");
}

#[tokio::test]
async fn tabs_open_and_switch() {
    let transport = ScriptedTransport::new(|_, _| None);
    let context = browser_over(transport.clone())
        .new_context(quick_config())
        .await
        .expect("context");

    context.open_tab("https://docs.rs").await.expect("open tab");
    context.switch_tab(0).await.expect("switch");
    assert_eq!(
        transport.params_of("Target.activateTarget"),
        vec![json!({ "targetId": "T-about:blank" })]
    );

    let err = context.switch_tab(5).await.unwrap_err();
    assert!(matches!(err, BrowserError::TabNotFound(5)));

    let state = context.get_state(false).await;
    // the scripted dom_tree returns null, which is not a snapshot
    assert!(matches!(state, Err(BrowserError::Script(_))));
    assert_eq!(transport.params_of("Target.getTargetInfo").len(), 0);
}

#[tokio::test]
async fn script_exceptions_become_script_errors() {
    let transport = ScriptedTransport::new(|method, params| {
        (method == "Runtime.evaluate" && script_name(params) == "page_text").then(|| {
            Ok(json!({
                "result": {"type": "object", "subtype": "error"},
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": {"description": "TypeError: Cannot read properties of null"}
                }
            }))
        })
    });
    let context = browser_over(transport)
        .new_context(quick_config())
        .await
        .expect("context");

    let err = context.page_text().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "page script failed: page_text: TypeError: Cannot read properties of null"
    );
}

#[tokio::test]
async fn key_chords_dispatch_key_events() {
    let transport = ScriptedTransport::new(|_, _| None);
    let context = browser_over(transport.clone())
        .new_context(quick_config())
        .await
        .expect("context");

    context.send_keys("Control+a").await.expect("chord");
    let events = transport.params_of("Input.dispatchKeyEvent");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "rawKeyDown");
    assert_eq!(events[0]["modifiers"], 2);
    assert_eq!(events[0]["key"], "a");
    assert_eq!(events[1]["type"], "keyUp");

    context.send_keys("Enter").await.expect("enter");
    let events = transport.params_of("Input.dispatchKeyEvent");
    assert_eq!(events[2]["type"], "keyDown");
    assert_eq!(events[2]["text"], "\r");

    let err = context.send_keys("Hyper+x").await.unwrap_err();
    assert!(err.to_string().contains("unsupported key combination"));
}

#[tokio::test]
async fn dropdowns_report_missing_elements_and_options() {
    let transport = ScriptedTransport::new(|method, params| {
        if method != "Runtime.evaluate" {
            return None;
        }
        let expression = params["expression"].as_str().unwrap();
        match script_name(params) {
            "dropdown_options" if expression.contains(r#"{"index":4}"#) => Some(Ok(evaluated(
                json!({ "found": true, "options": ["Rust", "Go"] }),
            ))),
            "dropdown_options" => Some(Ok(evaluated(json!({ "found": false, "options": [] })))),
            "select_option" if expression.contains(r#""text":"Go""#) => {
                Some(Ok(evaluated(json!("selected"))))
            }
            "select_option" => Some(Ok(evaluated(json!("missing_option")))),
            _ => None,
        }
    });
    let context = browser_over(transport)
        .new_context(quick_config())
        .await
        .expect("context");

    assert_eq!(
        context.dropdown_options(4).await.expect("options"),
        vec!["Rust".to_string(), "Go".to_string()]
    );
    assert!(matches!(
        context.dropdown_options(9).await,
        Err(BrowserError::ElementNotFound(9))
    ));

    context
        .select_dropdown_option(4, "Go")
        .await
        .expect("select");
    let err = context
        .select_dropdown_option(4, "Zig")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("option not found"));
}

#[tokio::test]
async fn close_disposes_context_and_blocks_further_use() {
    let transport = ScriptedTransport::new(|_, _| None);
    let context = browser_over(transport.clone())
        .new_context(quick_config())
        .await
        .expect("context");

    context.close().await.expect("close");
    context.close().await.expect("second close is a no-op");
    assert_eq!(
        transport.params_of("Target.disposeBrowserContext"),
        vec![json!({ "browserContextId": "CTX-1" })]
    );

    assert!(matches!(
        context.get_state(false).await,
        Err(BrowserError::Closed)
    ));
    assert!(matches!(
        context.switch_tab(0).await,
        Err(BrowserError::Closed)
    ));
}

#[tokio::test]
async fn cookies_round_trip_through_the_cookie_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cookies.json");
    std::fs::write(
        &path,
        json!([
            {"name": "sid", "value": "abc", "domain": ".example.com", "path": "/", "sameSite": "Lax"},
            {"value": "nameless"}
        ])
        .to_string(),
    )
    .unwrap();

    let transport = ScriptedTransport::new(|method, _| {
        (method == "Storage.getCookies").then(|| {
            Ok(json!({ "cookies": [{"name": "sid", "value": "rotated", "domain": ".example.com"}] }))
        })
    });
    let config = BrowserContextConfig {
        cookies_file: Some(path.clone()),
        ..quick_config()
    };
    let context = browser_over(transport.clone())
        .new_context(config)
        .await
        .expect("context");

    let loaded = transport.params_of("Storage.setCookies");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0]["browserContextId"], "CTX-1");
    assert_eq!(loaded[0]["cookies"].as_array().unwrap().len(), 1);
    assert_eq!(loaded[0]["cookies"][0]["sameSite"], "Lax");

    context.close().await.expect("close");
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved[0]["value"], "rotated");
}

#[tokio::test]
async fn transport_failures_map_to_browser_errors() {
    let transport = ScriptedTransport::new(|method, _| {
        (method == "Page.captureScreenshot").then(|| {
            Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("websocket closed"))
        })
    });
    let context = browser_over(transport)
        .new_context(quick_config())
        .await
        .expect("context");

    let err = context.take_screenshot().await.unwrap_err();
    assert!(matches!(err, BrowserError::Other(ref m) if m == "cdp i/o failure: websocket closed"));
}

#[tokio::test]
async fn closing_a_launched_browser_sends_browser_close() {
    let transport = ScriptedTransport::new(|_, _| None);
    let browser = browser_over(transport.clone());
    browser.close().await.expect("close");
    assert_eq!(transport.methods(), vec!["Browser.close"]);

    let attached = ScriptedTransport::new(|_, _| None);
    let browser = ChromeBrowser::with_transport(
        BrowserConfig {
            cdp_url: Some("ws://127.0.0.1:9222/devtools/browser/x".to_string()),
            ..BrowserConfig::default()
        },
        attached.clone(),
    );
    browser.close().await.expect("close");
    assert!(attached.methods().is_empty());
}
