//! Browser abstraction driven by the controller.
//!
//! The agent never talks to a concrete browser; it works against
//! [`Browser`] and [`BrowserContext`]. The `cdp-adapter` crate provides the
//! Chromium implementation and tests use in-memory fakes.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element_tree;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("element with index {0} does not exist")]
    ElementNotFound(u32),

    #[error("tab {0} does not exist")]
    TabNotFound(usize),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("page script failed: {0}")]
    Script(String),

    #[error("browser context is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Open tab summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub page_id: usize,
    pub url: String,
    pub title: String,
}

/// Interactive element indexed for the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomElement {
    pub index: u32,
    pub tag_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub xpath: String,
}

impl DomElement {
    pub fn new(index: u32, tag_name: impl Into<String>) -> Self {
        Self {
            index,
            tag_name: tag_name.into(),
            attributes: BTreeMap::new(),
            text: String::new(),
            xpath: String::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_xpath(mut self, xpath: impl Into<String>) -> Self {
        self.xpath = xpath.into();
        self
    }

    /// Index-independent identity used to spot new elements and to re-find
    /// recorded elements on a later visit.
    pub fn fingerprint(&self) -> String {
        let attrs = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}|{}|{}|{}", self.tag_name, self.xpath, attrs, self.text.trim())
    }
}

/// Snapshot of the active tab handed to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserState {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub tabs: Vec<TabInfo>,
    #[serde(default)]
    pub elements: Vec<DomElement>,
    /// Base64-encoded PNG of the viewport (vision mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub pixels_above: i64,
    #[serde(default)]
    pub pixels_below: i64,
}

impl BrowserState {
    pub fn selector_map(&self) -> BTreeMap<u32, &DomElement> {
        self.elements.iter().map(|el| (el.index, el)).collect()
    }

    pub fn element(&self, index: u32) -> Option<&DomElement> {
        self.elements.iter().find(|el| el.index == index)
    }

    pub fn element_tree(&self, include_attributes: &[String]) -> String {
        element_tree::format_elements(&self.elements, include_attributes)
    }

    pub fn fingerprints(&self) -> HashSet<String> {
        self.elements.iter().map(DomElement::fingerprint).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1100,
        }
    }
}

/// Per-context tuning applied by browser implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserContextConfig {
    /// Minimum time to wait after an action before reading the page.
    #[serde(with = "millis")]
    pub minimum_wait_page_load_time: Duration,
    /// Quiet window used to decide the network has settled.
    #[serde(with = "millis")]
    pub wait_for_network_idle_page_load_time: Duration,
    /// Hard cap on waiting for a page load.
    #[serde(with = "millis")]
    pub maximum_wait_page_load_time: Duration,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    /// Draw index overlays on the page while observing.
    pub highlight_elements: bool,
    /// JSON cookie jar loaded on context creation.
    pub cookies_file: Option<PathBuf>,
}

impl Default for BrowserContextConfig {
    fn default() -> Self {
        Self {
            minimum_wait_page_load_time: Duration::from_millis(250),
            wait_for_network_idle_page_load_time: Duration::from_millis(500),
            maximum_wait_page_load_time: Duration::from_secs(5),
            viewport: Viewport::default(),
            user_agent: None,
            highlight_elements: true,
            cookies_file: None,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// A running browser able to hand out isolated contexts.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_context(
        &self,
        config: BrowserContextConfig,
    ) -> Result<Arc<dyn BrowserContext>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// A browsing session (tabs, cookies) the agent acts in.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Observe the active tab, indexing its interactive elements.
    async fn get_state(&self, use_vision: bool) -> Result<BrowserState, BrowserError>;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    async fn go_back(&self) -> Result<(), BrowserError>;

    async fn click_element(&self, index: u32) -> Result<(), BrowserError>;

    async fn input_text(&self, index: u32, text: &str) -> Result<(), BrowserError>;

    async fn switch_tab(&self, page_id: usize) -> Result<(), BrowserError>;

    async fn open_tab(&self, url: &str) -> Result<(), BrowserError>;

    /// Scroll the page; `None` scrolls by one viewport.
    async fn scroll(
        &self,
        direction: ScrollDirection,
        amount: Option<i64>,
    ) -> Result<(), BrowserError>;

    async fn send_keys(&self, keys: &str) -> Result<(), BrowserError>;

    /// Scroll the first element containing `text` into view.
    async fn scroll_to_text(&self, text: &str) -> Result<bool, BrowserError>;

    async fn dropdown_options(&self, index: u32) -> Result<Vec<String>, BrowserError>;

    async fn select_dropdown_option(&self, index: u32, text: &str) -> Result<(), BrowserError>;

    /// Visible text of the active tab.
    async fn page_text(&self) -> Result<String, BrowserError>;

    /// Base64-encoded PNG of the viewport.
    async fn take_screenshot(&self) -> Result<String, BrowserError>;

    /// Drop any overlays drawn by [`get_state`](Self::get_state).
    async fn remove_highlights(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError>;
}
