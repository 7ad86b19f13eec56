#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agent_core::{
    Browser, BrowserContext, BrowserContextConfig, BrowserError, BrowserState, DomElement,
    ScrollDirection, TabInfo,
};
use async_trait::async_trait;

/// In-memory page driven by scripted reactions to clicks.
#[derive(Default)]
struct Page {
    state: BrowserState,
    text: String,
    dropdowns: HashMap<u32, Vec<String>>,
    /// Elements appended to the page when the key index is clicked.
    on_click: HashMap<u32, Vec<DomElement>>,
    /// Element indices removed from the page when the key index is clicked.
    hide_on_click: HashMap<u32, Vec<u32>>,
}

#[derive(Default)]
pub struct FakeContext {
    page: Mutex<Page>,
    log: Mutex<Vec<String>>,
    closed: AtomicBool,
    observations: AtomicUsize,
}

impl FakeContext {
    pub fn new(url: &str, elements: Vec<DomElement>) -> Arc<Self> {
        let context = Self::default();
        {
            let mut page = context.page.lock().unwrap();
            page.state = BrowserState {
                url: url.to_string(),
                title: "Fake page".to_string(),
                tabs: vec![TabInfo {
                    page_id: 0,
                    url: url.to_string(),
                    title: "Fake page".to_string(),
                }],
                elements,
                ..BrowserState::default()
            };
        }
        Arc::new(context)
    }

    pub fn with_text(self: Arc<Self>, text: &str) -> Arc<Self> {
        self.page.lock().unwrap().text = text.to_string();
        self
    }

    pub fn with_screenshot(self: Arc<Self>, base64_png: &str) -> Arc<Self> {
        self.page.lock().unwrap().state.screenshot = Some(base64_png.to_string());
        self
    }

    pub fn with_dropdown(self: Arc<Self>, index: u32, options: &[&str]) -> Arc<Self> {
        self.page
            .lock()
            .unwrap()
            .dropdowns
            .insert(index, options.iter().map(|o| o.to_string()).collect());
        self
    }

    /// Clicking `index` makes `appears` show up on the page.
    pub fn reveal_on_click(self: Arc<Self>, index: u32, appears: Vec<DomElement>) -> Arc<Self> {
        self.page.lock().unwrap().on_click.insert(index, appears);
        self
    }

    /// Clicking `index` removes the elements listed in `hides`.
    pub fn hide_on_click(self: Arc<Self>, index: u32, hides: Vec<u32>) -> Arc<Self> {
        self.page.lock().unwrap().hide_on_click.insert(index, hides);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn url(&self) -> String {
        self.page.lock().unwrap().state.url.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn observations(&self) -> usize {
        self.observations.load(Ordering::SeqCst)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.is_closed() {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_element(&self, index: u32) -> Result<(), BrowserError> {
        let page = self.page.lock().unwrap();
        page.state
            .element(index)
            .map(|_| ())
            .ok_or(BrowserError::ElementNotFound(index))
    }
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn get_state(&self, use_vision: bool) -> Result<BrowserState, BrowserError> {
        self.ensure_open()?;
        self.observations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.page.lock().unwrap().state.clone();
        if !use_vision {
            state.screenshot = None;
        }
        Ok(state)
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.record(format!("navigate:{url}"));
        let mut page = self.page.lock().unwrap();
        page.state.url = url.to_string();
        if let Some(tab) = page.state.tabs.first_mut() {
            tab.url = url.to_string();
        }
        Ok(())
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        self.record("back".to_string());
        Ok(())
    }

    async fn click_element(&self, index: u32) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.ensure_element(index)?;
        self.record(format!("click:{index}"));
        let mut page = self.page.lock().unwrap();
        if let Some(appears) = page.on_click.remove(&index) {
            page.state.elements.extend(appears);
        }
        if let Some(hides) = page.hide_on_click.remove(&index) {
            page.state.elements.retain(|e| !hides.contains(&e.index));
        }
        Ok(())
    }

    async fn input_text(&self, index: u32, text: &str) -> Result<(), BrowserError> {
        self.ensure_element(index)?;
        self.record(format!("input:{index}:{text}"));
        Ok(())
    }

    async fn switch_tab(&self, page_id: usize) -> Result<(), BrowserError> {
        let page = self.page.lock().unwrap();
        if page_id >= page.state.tabs.len() {
            return Err(BrowserError::TabNotFound(page_id));
        }
        drop(page);
        self.record(format!("switch:{page_id}"));
        Ok(())
    }

    async fn open_tab(&self, url: &str) -> Result<(), BrowserError> {
        self.record(format!("open:{url}"));
        let mut page = self.page.lock().unwrap();
        let page_id = page.state.tabs.len();
        page.state.tabs.push(TabInfo {
            page_id,
            url: url.to_string(),
            title: String::new(),
        });
        Ok(())
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        amount: Option<i64>,
    ) -> Result<(), BrowserError> {
        let direction = match direction {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        };
        let amount = amount.map(|a| a.to_string()).unwrap_or_else(|| "page".to_string());
        self.record(format!("scroll:{direction}:{amount}"));
        Ok(())
    }

    async fn send_keys(&self, keys: &str) -> Result<(), BrowserError> {
        self.record(format!("keys:{keys}"));
        Ok(())
    }

    async fn scroll_to_text(&self, text: &str) -> Result<bool, BrowserError> {
        self.record(format!("scroll_to:{text}"));
        Ok(self.page.lock().unwrap().text.contains(text))
    }

    async fn dropdown_options(&self, index: u32) -> Result<Vec<String>, BrowserError> {
        self.ensure_element(index)?;
        Ok(self
            .page
            .lock()
            .unwrap()
            .dropdowns
            .get(&index)
            .cloned()
            .unwrap_or_default())
    }

    async fn select_dropdown_option(&self, index: u32, text: &str) -> Result<(), BrowserError> {
        let options = self.dropdown_options(index).await?;
        if !options.iter().any(|option| option == text) {
            return Err(BrowserError::Other(format!("option {text:?} not found")));
        }
        self.record(format!("select:{index}:{text}"));
        Ok(())
    }

    async fn page_text(&self) -> Result<String, BrowserError> {
        Ok(self.page.lock().unwrap().text.clone())
    }

    async fn take_screenshot(&self) -> Result<String, BrowserError> {
        self.page
            .lock()
            .unwrap()
            .state
            .screenshot
            .clone()
            .ok_or_else(|| BrowserError::Other("no screenshot".to_string()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Browser handing out a single prepared context.
pub struct FakeBrowser {
    context: Arc<FakeContext>,
    created: AtomicUsize,
}

impl FakeBrowser {
    pub fn new(context: Arc<FakeContext>) -> Arc<Self> {
        Arc::new(Self {
            context,
            created: AtomicUsize::new(0),
        })
    }

    pub fn contexts_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_context(
        &self,
        _config: BrowserContextConfig,
    ) -> Result<Arc<dyn BrowserContext>, BrowserError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.context.clone())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        Ok(())
    }
}

pub fn search_page() -> Vec<DomElement> {
    vec![
        DomElement::new(0, "a")
            .with_attribute("href", "/")
            .with_text("Home")
            .with_xpath("html/body/nav/a"),
        DomElement::new(1, "input")
            .with_attribute("name", "q")
            .with_attribute("placeholder", "Search")
            .with_xpath("html/body/form/input"),
        DomElement::new(2, "button")
            .with_attribute("type", "submit")
            .with_text("Search")
            .with_xpath("html/body/form/button"),
    ]
}

pub fn reply(goal: &str, actions: serde_json::Value) -> String {
    serde_json::json!({
        "current_state": {
            "evaluation_previous_goal": "Unknown",
            "memory": "",
            "next_goal": goal
        },
        "action": actions
    })
    .to_string()
}

pub fn done_reply(text: &str) -> String {
    reply("finish", serde_json::json!([{"done": {"text": text, "success": true}}]))
}
