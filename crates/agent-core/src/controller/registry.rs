//! Name-keyed registry of callable actions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{ActionContext, ActionResult};
use crate::errors::AgentError;

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<ActionResult, AgentError>> + Send>>;

type ActionHandler = Arc<dyn Fn(Value, ActionContext) -> ActionFuture + Send + Sync>;

/// One registered action.
#[derive(Clone)]
pub struct RegisteredAction {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameter object (`properties` / `required` only).
    pub param_schema: Value,
    handler: ActionHandler,
}

impl RegisteredAction {
    /// Rendered as `name: description` followed by the parameter properties.
    pub fn prompt_description(&self) -> String {
        let properties = self
            .param_schema
            .get("properties")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        format!("{}: {}\n{{{}: {}}}", self.name, self.description, self.name, properties)
    }

    pub(crate) fn call(&self, params: Value, ctx: ActionContext) -> ActionFuture {
        (self.handler)(params, ctx)
    }
}

impl std::fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Ordered collection of actions; registration order is prompt order.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: Vec<RegisteredAction>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action whose parameters deserialize into `P`.
    ///
    /// Registering an existing name replaces the previous handler.
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
        let name = name.into();
        let action_name = name.clone();
        let erased: ActionHandler = Arc::new(move |params: Value, ctx: ActionContext| {
            let params = if params.is_null() {
                Value::Object(Map::new())
            } else {
                params
            };
            match serde_json::from_value::<P>(params) {
                Ok(parsed) => Box::pin(handler(parsed, ctx)) as ActionFuture,
                Err(err) => {
                    let action = action_name.clone();
                    Box::pin(async move {
                        Err::<ActionResult, _>(AgentError::InvalidParams {
                            action,
                            message: err.to_string(),
                        })
                    }) as ActionFuture
                }
            }
        });

        let action = RegisteredAction {
            name: name.clone(),
            description: description.into(),
            param_schema: param_schema::<P>(),
            handler: erased,
        };
        match self.actions.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => *existing = action,
            None => self.actions.push(action),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredAction> {
        self.actions.iter().find(|action| action.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<RegisteredAction> {
        let position = self.actions.iter().position(|action| action.name == name)?;
        Some(self.actions.remove(position))
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.iter().map(|action| action.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredAction> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn param_schema<P: JsonSchema>() -> Value {
    let root = serde_json::to_value(schemars::schema_for!(P)).unwrap_or(Value::Null);
    let mut schema = Map::new();
    schema.insert("type".into(), Value::from("object"));
    schema.insert(
        "properties".into(),
        root.get("properties")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );
    if let Some(required) = root.get("required") {
        schema.insert("required".into(), required.clone());
    }
    Value::Object(schema)
}
