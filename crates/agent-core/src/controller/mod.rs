//! Action controller: the registry of callable actions and the context
//! handed to them.

mod actions;
mod registry;
mod types;

pub use registry::{ActionFuture, ActionRegistry, RegisteredAction};
pub use types::{ActionInvocation, ActionResult};

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::browser::BrowserContext;
use crate::errors::AgentError;
use crate::llm::LlmProvider;

static SECRET_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<secret>(.*?)</secret>").expect("valid secret regex"));

/// Everything an action handler may touch.
#[derive(Clone)]
pub struct ActionContext {
    pub browser: Arc<dyn BrowserContext>,
    /// Model used by `extract_content`; falls back to raw page text when unset.
    pub page_extraction_llm: Option<Arc<dyn LlmProvider>>,
    pub sensitive_data: HashMap<String, String>,
    pub available_file_paths: Vec<PathBuf>,
}

impl ActionContext {
    pub fn new(browser: Arc<dyn BrowserContext>) -> Self {
        Self {
            browser,
            page_extraction_llm: None,
            sensitive_data: HashMap::new(),
            available_file_paths: Vec::new(),
        }
    }

    pub fn with_page_extraction_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.page_extraction_llm = Some(llm);
        self
    }

    pub fn with_sensitive_data(mut self, data: HashMap<String, String>) -> Self {
        self.sensitive_data = data;
        self
    }

    pub fn with_available_file_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.available_file_paths = paths;
        self
    }
}

/// Dispatches [`ActionInvocation`]s to registered handlers.
#[derive(Debug, Clone)]
pub struct Controller {
    registry: ActionRegistry,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    /// Controller with every built-in browser action.
    pub fn new() -> Self {
        Self::with_excluded(&[])
    }

    /// Controller with the built-ins minus `excluded`.
    pub fn with_excluded(excluded: &[&str]) -> Self {
        let mut registry = ActionRegistry::new();
        actions::register_builtin(&mut registry);
        for name in excluded {
            registry.remove(name);
        }
        Self { registry }
    }

    /// Controller without any actions.
    pub fn empty() -> Self {
        Self {
            registry: ActionRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Add a custom action; see [`ActionRegistry::register`].
    pub fn register<P, F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(P, ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResult, AgentError>> + Send + 'static,
    {
        self.registry.register(name, description, handler);
    }

    /// Execute one action.
    ///
    /// `<secret>name</secret>` placeholders inside string parameters are
    /// replaced with the matching sensitive value before the handler runs.
    pub async fn act(
        &self,
        invocation: &ActionInvocation,
        ctx: &ActionContext,
    ) -> Result<ActionResult, AgentError> {
        let action = self
            .registry
            .get(&invocation.name)
            .ok_or_else(|| AgentError::UnknownAction(invocation.name.clone()))?;

        let mut params = invocation.params.clone();
        if !ctx.sensitive_data.is_empty() {
            replace_secrets(&mut params, &ctx.sensitive_data);
        }

        debug!(action = %invocation.name, "executing action");
        action.call(params, ctx.clone()).await
    }

    /// Action catalogue embedded in the system prompt.
    pub fn prompt_description(&self) -> String {
        self.registry
            .iter()
            .map(RegisteredAction::prompt_description)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn replace_secrets(value: &mut Value, sensitive_data: &HashMap<String, String>) {
    match value {
        Value::String(text) => {
            if !SECRET_PLACEHOLDER.is_match(text) {
                return;
            }
            let replaced = SECRET_PLACEHOLDER.replace_all(text, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match sensitive_data.get(name) {
                    Some(secret) => secret.clone(),
                    None => {
                        warn!(placeholder = name, "no sensitive value registered for placeholder");
                        caps[0].to_string()
                    }
                }
            });
            *text = replaced.into_owned();
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| replace_secrets(item, sensitive_data)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|item| replace_secrets(item, sensitive_data)),
        _ => {}
    }
}
