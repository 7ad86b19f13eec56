//! Chromium DevTools Protocol browser for the webpilot agent.
//!
//! [`ChromeBrowser`] launches or attaches to Chromium and hands out
//! [`ChromeContext`]s, which implement the agent's
//! [`BrowserContext`](agent_core::BrowserContext) on top of a raw
//! [`CdpTransport`].

pub mod browser;
pub mod config;
pub mod context;
pub mod dom;
pub mod error;
pub mod metrics;
pub mod transport;
pub mod util;

pub use browser::ChromeBrowser;
pub use config::{detect_chrome_executable, BrowserConfig};
pub use context::ChromeContext;
pub use error::{AdapterError, AdapterErrorKind};
pub use metrics::AdapterMetricsSnapshot;
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget};
