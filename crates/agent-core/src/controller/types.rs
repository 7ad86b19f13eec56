//! Action invocations and their results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single action requested by the model or supplied up front.
///
/// Serialized the way the model writes it: a one-key object mapping the
/// action name to its parameters, e.g. `{"click_element": {"index": 5}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ActionInvocation {
    pub name: String,
    pub params: Value,
}

impl ActionInvocation {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Element index targeted by the action, if any.
    pub fn index(&self) -> Option<u32> {
        self.params
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|idx| u32::try_from(idx).ok())
    }

    /// Point the action at another element; no-op for index-less actions.
    pub fn set_index(&mut self, index: u32) {
        if let Some(slot) = self.params.get_mut("index") {
            *slot = Value::from(index);
        }
    }
}

impl TryFrom<Map<String, Value>> for ActionInvocation {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut entries = map.into_iter();
        match (entries.next(), entries.next()) {
            (Some((name, params)), None) => Ok(Self { name, params }),
            (None, _) => Err("action object is empty".to_string()),
            (Some(_), Some(_)) => Err("action object must have exactly one key".to_string()),
        }
    }
}

impl From<ActionInvocation> for Map<String, Value> {
    fn from(invocation: ActionInvocation) -> Self {
        let mut map = Map::new();
        map.insert(invocation.name, invocation.params);
        map
    }
}

/// Outcome of one executed action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// The task is finished.
    #[serde(default)]
    pub is_done: bool,

    /// Success flag reported by `done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Feed `extracted_content` / `error` back to the model on the next step.
    #[serde(default)]
    pub include_in_memory: bool,
}

impl ActionResult {
    /// Content the model should see on its next step.
    pub fn memory(content: impl Into<String>) -> Self {
        Self {
            extracted_content: Some(content.into()),
            include_in_memory: true,
            ..Self::default()
        }
    }

    pub fn done(text: impl Into<String>, success: bool) -> Self {
        Self {
            is_done: true,
            success: Some(success),
            extracted_content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            include_in_memory: true,
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invocation_uses_single_key_form() {
        let parsed: ActionInvocation =
            serde_json::from_value(json!({"click_element": {"index": 5}})).unwrap();
        assert_eq!(parsed.name, "click_element");
        assert_eq!(parsed.index(), Some(5));

        let rendered = serde_json::to_value(&parsed).unwrap();
        assert_eq!(rendered, json!({"click_element": {"index": 5}}));
    }

    #[test]
    fn invocation_rejects_ambiguous_objects() {
        assert!(serde_json::from_value::<ActionInvocation>(json!({})).is_err());
        assert!(serde_json::from_value::<ActionInvocation>(
            json!({"go_back": {}, "wait": {"seconds": 1}})
        )
        .is_err());
    }

    #[test]
    fn set_index_only_touches_indexed_actions() {
        let mut click = ActionInvocation::new("click_element", json!({"index": 2}));
        click.set_index(8);
        assert_eq!(click.index(), Some(8));

        let mut back = ActionInvocation::new("go_back", json!({}));
        back.set_index(8);
        assert_eq!(back.index(), None);
    }

    #[test]
    fn done_result_is_not_fed_back() {
        let result = ActionResult::done("finished", true);
        assert!(result.is_done);
        assert_eq!(result.success, Some(true));
        assert!(!result.include_in_memory);
        assert!(ActionResult::error("boom").include_in_memory);
    }
}
