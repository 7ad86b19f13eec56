//! [`BrowserContext`] over an isolated Chromium browser context.
//!
//! Each context owns a CDP `browserContextId` (separate cookies and storage)
//! and a list of tabs, each reached through a flattened target session.
//! Elements are addressed through the `data-webpilot-index` tags written by
//! the indexing script during [`BrowserContext::get_state`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_core::{
    BrowserContext, BrowserContextConfig, BrowserError, BrowserState, ScrollDirection, TabInfo,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dom::{
    self, parse_key_chord, DropdownListing, LoadState, PageScript, PageSnapshot, Point,
};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::transport::{CdpTransport, CommandTarget};

const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);
const COOKIE_FIELDS: &[&str] = &[
    "name", "value", "url", "domain", "path", "secure", "httpOnly", "sameSite", "expires",
];

#[derive(Debug, Clone)]
struct Tab {
    target_id: String,
    session_id: String,
}

#[derive(Debug, Default)]
struct TabSet {
    tabs: Vec<Tab>,
    active: usize,
}

impl TabSet {
    fn active(&self) -> Result<&Tab, AdapterError> {
        self.tabs.get(self.active).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint("no open tab")
        })
    }

    fn push_active(&mut self, tab: Tab) {
        self.tabs.push(tab);
        self.active = self.tabs.len() - 1;
    }
}

pub struct ChromeContext {
    transport: Arc<dyn CdpTransport>,
    browser_context_id: String,
    config: BrowserContextConfig,
    tabs: Mutex<TabSet>,
    closed: AtomicBool,
}

impl ChromeContext {
    /// Create a browser context with one blank tab, loading cookies from
    /// `config.cookies_file` when it exists.
    pub async fn create(
        transport: Arc<dyn CdpTransport>,
        config: BrowserContextConfig,
    ) -> Result<Arc<Self>, AdapterError> {
        let created = transport
            .send_command(
                CommandTarget::Browser,
                "Target.createBrowserContext",
                json!({ "disposeOnDetach": true }),
            )
            .await?;
        let browser_context_id = required_str(&created, "browserContextId")?;

        let context = Arc::new(Self {
            transport,
            browser_context_id,
            config,
            tabs: Mutex::new(TabSet::default()),
            closed: AtomicBool::new(false),
        });

        context.load_cookies().await?;
        let tab = context.attach_new_target("about:blank").await?;
        context.tabs.lock().await.push_active(tab);

        info!(
            target: "cdp-context",
            id = %context.browser_context_id,
            "browser context created"
        );
        Ok(context)
    }

    pub fn browser_context_id(&self) -> &str {
        &self.browser_context_id
    }

    pub fn config(&self) -> &BrowserContextConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(AdapterError::new(AdapterErrorKind::Closed))
        } else {
            Ok(())
        }
    }

    async fn active_session(&self) -> Result<String, AdapterError> {
        self.ensure_open()?;
        Ok(self.tabs.lock().await.active()?.session_id.clone())
    }

    async fn session_command(
        &self,
        session: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.transport
            .send_command(CommandTarget::Session(session.to_string()), method, params)
            .await
    }

    async fn evaluate(
        &self,
        session: &str,
        script: PageScript,
        args: Value,
    ) -> Result<Value, AdapterError> {
        let response = self
            .session_command(
                session,
                "Runtime.evaluate",
                json!({
                    "expression": script.call(&args),
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("uncaught exception");
            return Err(AdapterError::new(AdapterErrorKind::ScriptFailed)
                .with_hint(format!("{}: {message}", script.name)));
        }

        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn evaluate_as<T: DeserializeOwned>(
        &self,
        session: &str,
        script: PageScript,
        args: Value,
    ) -> Result<T, AdapterError> {
        let value = self.evaluate(session, script, args).await?;
        serde_json::from_value(value).map_err(|err| {
            AdapterError::new(AdapterErrorKind::ScriptFailed)
                .with_hint(format!("{} returned unexpected data: {err}", script.name))
        })
    }

    /// Open a target in this context, attach to it and apply the viewport
    /// and user agent.
    async fn attach_new_target(&self, url: &str) -> Result<Tab, AdapterError> {
        let created = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": url, "browserContextId": self.browser_context_id }),
            )
            .await?;
        let target_id = required_str(&created, "targetId")?;
        self.attach(target_id).await
    }

    async fn attach(&self, target_id: String) -> Result<Tab, AdapterError> {
        let attached = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = required_str(&attached, "sessionId")?;

        let viewport = self.config.viewport;
        self.session_command(
            &session_id,
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": viewport.width,
                "height": viewport.height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;
        if let Some(user_agent) = &self.config.user_agent {
            self.session_command(
                &session_id,
                "Emulation.setUserAgentOverride",
                json!({ "userAgent": user_agent }),
            )
            .await?;
        }

        debug!(target: "cdp-context", %target_id, %session_id, "attached to tab");
        Ok(Tab {
            target_id,
            session_id,
        })
    }

    /// Tabs opened by the page itself (`target=_blank`, `window.open`) are
    /// adopted and become active.
    async fn adopt_new_tabs(&self) -> Result<(), AdapterError> {
        let known: HashSet<String> = self
            .tabs
            .lock()
            .await
            .tabs
            .iter()
            .map(|tab| tab.target_id.clone())
            .collect();

        let targets = self
            .transport
            .send_command(CommandTarget::Browser, "Target.getTargets", json!({}))
            .await?;
        let infos = targets
            .get("targetInfos")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for info in infos {
            let is_ours = info.get("type").and_then(Value::as_str) == Some("page")
                && info.get("browserContextId").and_then(Value::as_str)
                    == Some(self.browser_context_id.as_str());
            let Some(target_id) = info.get("targetId").and_then(Value::as_str) else {
                continue;
            };
            if !is_ours || known.contains(target_id) {
                continue;
            }
            let tab = self.attach(target_id.to_string()).await?;
            info!(target: "cdp-context", target = %target_id, "switched to newly opened tab");
            self.tabs.lock().await.push_active(tab);
        }
        Ok(())
    }

    /// Wait until the document is complete and no new resources arrived for
    /// the idle window, bounded by the configured minimum and maximum.
    async fn wait_for_page_load(&self, session: &str) {
        let min = self.config.minimum_wait_page_load_time;
        let idle = self.config.wait_for_network_idle_page_load_time;
        let max = self.config.maximum_wait_page_load_time;

        let started = Instant::now();
        let mut last_count = None;
        let mut last_change = Instant::now();

        loop {
            let state: LoadState = match self
                .evaluate_as(session, dom::LOAD_STATE, json!({}))
                .await
            {
                Ok(state) => state,
                Err(err) => {
                    // the execution context is replaced while navigating
                    debug!(target: "cdp-context", %err, "load state unavailable");
                    LoadState::default()
                }
            };

            if last_count != Some(state.resources) {
                last_count = Some(state.resources);
                last_change = Instant::now();
            }

            let elapsed = started.elapsed();
            if state.is_complete() && last_change.elapsed() >= idle && elapsed >= min {
                break;
            }
            if elapsed >= max {
                debug!(target: "cdp-context", ?max, "page load wait capped");
                break;
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
    }

    async fn load_cookies(&self) -> Result<(), AdapterError> {
        let Some(path) = &self.config.cookies_file else {
            return Ok(());
        };
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!(target: "cdp-context", path = %path.display(), %err, "no cookies loaded");
                return Ok(());
            }
        };
        let cookies = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => items
                .iter()
                .filter_map(sanitize_cookie)
                .collect::<Vec<_>>(),
            Ok(_) | Err(_) => {
                warn!(target: "cdp-context", path = %path.display(), "cookie file is not a JSON array");
                return Ok(());
            }
        };
        if cookies.is_empty() {
            return Ok(());
        }

        info!(target: "cdp-context", count = cookies.len(), "loading cookies");
        self.transport
            .send_command(
                CommandTarget::Browser,
                "Storage.setCookies",
                json!({ "cookies": cookies, "browserContextId": self.browser_context_id }),
            )
            .await?;
        Ok(())
    }

    async fn save_cookies(&self, path: &Path) -> Result<(), AdapterError> {
        let response = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Storage.getCookies",
                json!({ "browserContextId": self.browser_context_id }),
            )
            .await?;
        let cookies = response.get("cookies").cloned().unwrap_or(json!([]));
        let body = serde_json::to_string_pretty(&cookies)
            .map_err(|err| AdapterError::internal(err.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AdapterError::internal(err.to_string()))?;
        }
        tokio::fs::write(path, body)
            .await
            .map_err(|err| AdapterError::internal(format!("write {}: {err}", path.display())))
    }

    async fn tab_infos(&self) -> Result<Vec<TabInfo>, AdapterError> {
        let targets: Vec<String> = self
            .tabs
            .lock()
            .await
            .tabs
            .iter()
            .map(|tab| tab.target_id.clone())
            .collect();

        let mut infos = Vec::with_capacity(targets.len());
        for (page_id, target_id) in targets.into_iter().enumerate() {
            let response = self
                .transport
                .send_command(
                    CommandTarget::Browser,
                    "Target.getTargetInfo",
                    json!({ "targetId": target_id }),
                )
                .await?;
            let info = response.get("targetInfo").cloned().unwrap_or(Value::Null);
            infos.push(TabInfo {
                page_id,
                url: str_field(&info, "url"),
                title: str_field(&info, "title"),
            });
        }
        Ok(infos)
    }

    async fn press_keys(&self, session: &str, keys: &str) -> Result<(), BrowserError> {
        let Some(stroke) = parse_key_chord(keys) else {
            if keys.contains('+') {
                return Err(BrowserError::Other(format!("unsupported key combination {keys:?}")));
            }
            self.session_command(session, "Input.insertText", json!({ "text": keys }))
                .await?;
            return Ok(());
        };

        let mut down = json!({
            "type": if stroke.text.is_some() { "keyDown" } else { "rawKeyDown" },
            "key": stroke.key,
            "code": stroke.code,
            "windowsVirtualKeyCode": stroke.key_code,
            "modifiers": stroke.modifiers,
        });
        if let Some(text) = &stroke.text {
            down["text"] = json!(text);
        }
        self.session_command(session, "Input.dispatchKeyEvent", down)
            .await?;
        self.session_command(
            session,
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": stroke.key,
                "code": stroke.code,
                "windowsVirtualKeyCode": stroke.key_code,
                "modifiers": stroke.modifiers,
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BrowserContext for ChromeContext {
    async fn get_state(&self, use_vision: bool) -> Result<BrowserState, BrowserError> {
        let session = self.active_session().await?;
        let snapshot: PageSnapshot = self
            .evaluate_as(
                &session,
                dom::DOM_TREE,
                json!({ "highlight": self.config.highlight_elements }),
            )
            .await?;
        let tabs = self.tab_infos().await?;
        let screenshot = if use_vision {
            Some(self.take_screenshot().await?)
        } else {
            None
        };

        debug!(
            target: "cdp-context",
            url = %snapshot.url,
            elements = snapshot.elements.len(),
            "observed page"
        );
        Ok(BrowserState {
            url: snapshot.url,
            title: snapshot.title,
            tabs,
            elements: snapshot.elements,
            screenshot,
            pixels_above: snapshot.pixels_above,
            pixels_below: snapshot.pixels_below,
        })
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let session = self.active_session().await?;
        let response = self
            .session_command(&session, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(AdapterError::new(AdapterErrorKind::NavFailed)
                .with_hint(format!("{url}: {error}"))
                .into());
        }
        self.wait_for_page_load(&session).await;
        Ok(())
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        let session = self.active_session().await?;
        let history = self
            .session_command(&session, "Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        if current == 0 {
            debug!(target: "cdp-context", "no previous page in history");
            return Ok(());
        }
        let entry_id = history
            .pointer(&format!("/entries/{}/id", current - 1))
            .cloned()
            .ok_or_else(|| AdapterError::internal("navigation history entry missing"))?;
        self.session_command(
            &session,
            "Page.navigateToHistoryEntry",
            json!({ "entryId": entry_id }),
        )
        .await?;
        self.wait_for_page_load(&session).await;
        Ok(())
    }

    async fn click_element(&self, index: u32) -> Result<(), BrowserError> {
        let session = self.active_session().await?;
        let point = self
            .evaluate(&session, dom::CLICK_TARGET, json!({ "index": index }))
            .await?;
        if point.is_null() {
            return Err(BrowserError::ElementNotFound(index));
        }
        let point: Point = serde_json::from_value(point)
            .map_err(|err| BrowserError::Script(format!("click_target: {err}")))?;

        for kind in ["mousePressed", "mouseReleased"] {
            self.session_command(
                &session,
                "Input.dispatchMouseEvent",
                json!({
                    "type": kind,
                    "x": point.x,
                    "y": point.y,
                    "button": "left",
                    "clickCount": 1,
                }),
            )
            .await?;
        }

        self.wait_for_page_load(&session).await;
        self.adopt_new_tabs().await?;
        Ok(())
    }

    async fn input_text(&self, index: u32, text: &str) -> Result<(), BrowserError> {
        let session = self.active_session().await?;
        let focused = self
            .evaluate(&session, dom::FOCUS_AND_CLEAR, json!({ "index": index }))
            .await?;
        if focused != Value::Bool(true) {
            return Err(BrowserError::ElementNotFound(index));
        }
        self.session_command(&session, "Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn switch_tab(&self, page_id: usize) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let tab = {
            let mut tabs = self.tabs.lock().await;
            let tab = tabs
                .tabs
                .get(page_id)
                .cloned()
                .ok_or(BrowserError::TabNotFound(page_id))?;
            tabs.active = page_id;
            tab
        };
        self.transport
            .send_command(
                CommandTarget::Browser,
                "Target.activateTarget",
                json!({ "targetId": tab.target_id }),
            )
            .await?;
        self.wait_for_page_load(&tab.session_id).await;
        Ok(())
    }

    async fn open_tab(&self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let tab = self.attach_new_target(url).await?;
        let session = tab.session_id.clone();
        self.tabs.lock().await.push_active(tab);
        self.wait_for_page_load(&session).await;
        Ok(())
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        amount: Option<i64>,
    ) -> Result<(), BrowserError> {
        let session = self.active_session().await?;
        self.evaluate(
            &session,
            dom::SCROLL_BY,
            json!({ "down": direction == ScrollDirection::Down, "amount": amount }),
        )
        .await?;
        Ok(())
    }

    async fn send_keys(&self, keys: &str) -> Result<(), BrowserError> {
        let session = self.active_session().await?;
        self.press_keys(&session, keys).await
    }

    async fn scroll_to_text(&self, text: &str) -> Result<bool, BrowserError> {
        let session = self.active_session().await?;
        let found = self
            .evaluate(&session, dom::SCROLL_TO_TEXT, json!({ "text": text }))
            .await?;
        Ok(found.as_bool().unwrap_or(false))
    }

    async fn dropdown_options(&self, index: u32) -> Result<Vec<String>, BrowserError> {
        let session = self.active_session().await?;
        let listing: DropdownListing = self
            .evaluate_as(&session, dom::DROPDOWN_OPTIONS, json!({ "index": index }))
            .await?;
        if !listing.found {
            return Err(BrowserError::ElementNotFound(index));
        }
        Ok(listing.options)
    }

    async fn select_dropdown_option(&self, index: u32, text: &str) -> Result<(), BrowserError> {
        let session = self.active_session().await?;
        let outcome = self
            .evaluate(
                &session,
                dom::SELECT_OPTION,
                json!({ "index": index, "text": text }),
            )
            .await?;
        match outcome.as_str() {
            Some("selected") => Ok(()),
            Some("not_found") => Err(BrowserError::ElementNotFound(index)),
            Some("not_select") => Err(BrowserError::Other(format!(
                "element {index} is not a select element"
            ))),
            _ => Err(AdapterError::new(AdapterErrorKind::OptionNotFound)
                .with_hint(format!("{text:?} in dropdown {index}"))
                .into()),
        }
    }

    async fn page_text(&self) -> Result<String, BrowserError> {
        let session = self.active_session().await?;
        let text = self.evaluate(&session, dom::PAGE_TEXT, json!({})).await?;
        Ok(text.as_str().unwrap_or_default().to_string())
    }

    async fn take_screenshot(&self) -> Result<String, BrowserError> {
        let session = self.active_session().await?;
        let response = self
            .session_command(&session, "Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        Ok(required_str(&response, "data")?)
    }

    async fn remove_highlights(&self) -> Result<(), BrowserError> {
        if !self.config.highlight_elements {
            return Ok(());
        }
        let session = self.active_session().await?;
        self.evaluate(&session, dom::REMOVE_HIGHLIGHTS, json!({}))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(path) = &self.config.cookies_file {
            if let Err(err) = self.save_cookies(path).await {
                warn!(target: "cdp-context", %err, "failed to save cookies");
            }
        }
        self.transport
            .send_command(
                CommandTarget::Browser,
                "Target.disposeBrowserContext",
                json!({ "browserContextId": self.browser_context_id }),
            )
            .await?;
        info!(target: "cdp-context", id = %self.browser_context_id, "browser context closed");
        Ok(())
    }
}

fn required_str(value: &Value, field: &str) -> Result<String, AdapterError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AdapterError::internal(format!("cdp response missing {field}")).with_data(value.clone())
        })
}

fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Keep the fields `Storage.setCookies` accepts; cookies without a name are
/// dropped.
fn sanitize_cookie(cookie: &Value) -> Option<Value> {
    let object = cookie.as_object()?;
    object.get("name")?.as_str()?;
    let mut kept = Map::new();
    for field in COOKIE_FIELDS {
        if let Some(value) = object.get(*field) {
            kept.insert(field.to_string(), value.clone());
        }
    }
    if let Some(same_site) = kept.get("sameSite").and_then(Value::as_str) {
        if !matches!(same_site, "Strict" | "Lax" | "None") {
            kept.remove("sameSite");
        }
    }
    Some(Value::Object(kept))
}
