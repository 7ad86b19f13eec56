use std::sync::Arc;

use agent_core::{Browser, BrowserContext, BrowserContextConfig, BrowserError};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::config::BrowserConfig;
use crate::context::ChromeContext;
use crate::error::AdapterError;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget};

/// A Chromium instance the agent can open contexts in.
pub struct ChromeBrowser {
    transport: Arc<dyn CdpTransport>,
    config: BrowserConfig,
}

impl ChromeBrowser {
    /// Launch Chromium, or attach when `config.cdp_url` is set.
    pub async fn launch(config: BrowserConfig) -> Result<Self, AdapterError> {
        let transport = Arc::new(ChromiumTransport::new(config.clone()));
        transport.start().await?;
        info!(
            target: "cdp-browser",
            attached = config.cdp_url.is_some(),
            headless = config.headless,
            "browser started"
        );
        Ok(Self::with_transport(config, transport))
    }

    /// Attach to a running browser at a `ws://` or `http://host:port` endpoint.
    pub async fn connect(cdp_url: impl Into<String>) -> Result<Self, AdapterError> {
        Self::launch(BrowserConfig {
            cdp_url: Some(cdp_url.into()),
            ..BrowserConfig::default()
        })
        .await
    }

    pub fn with_transport(config: BrowserConfig, transport: Arc<dyn CdpTransport>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub async fn new_chrome_context(
        &self,
        config: BrowserContextConfig,
    ) -> Result<Arc<ChromeContext>, AdapterError> {
        ChromeContext::create(self.transport.clone(), config).await
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn new_context(
        &self,
        config: BrowserContextConfig,
    ) -> Result<Arc<dyn BrowserContext>, BrowserError> {
        let context = self.new_chrome_context(config).await?;
        Ok(context)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        // An attached browser belongs to someone else; only drop the connection.
        if self.config.cdp_url.is_none() {
            if let Err(err) = self
                .transport
                .send_command(CommandTarget::Browser, "Browser.close", json!({}))
                .await
            {
                debug!(target: "cdp-browser", %err, "Browser.close did not answer");
            }
        }
        self.transport.shutdown().await;
        info!(target: "cdp-browser", "browser closed");
        Ok(())
    }
}
