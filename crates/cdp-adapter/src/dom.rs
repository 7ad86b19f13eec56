//! Scripts evaluated in the page and the shapes they return.
//!
//! Every script is a JavaScript function expression called with a single
//! JSON argument, so no value is ever spliced into script source.

use agent_core::DomElement;
use serde::Deserialize;
use serde_json::Value;

/// Attribute the indexing script stamps on every interactive element.
pub const INDEX_ATTRIBUTE: &str = "data-webpilot-index";

#[derive(Debug, Clone, Copy)]
pub struct PageScript {
    pub name: &'static str,
    source: &'static str,
}

impl PageScript {
    const fn new(name: &'static str, source: &'static str) -> Self {
        Self { name, source }
    }

    /// Expression invoking the script with `args`. The `sourceURL` names the
    /// script in DevTools stack traces.
    pub fn call(&self, args: &Value) -> String {
        format!(
            "({})({})\n//# sourceURL=webpilot/{}.js",
            self.source, args, self.name
        )
    }
}

pub const DOM_TREE: PageScript = PageScript::new(
    "dom_tree",
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts/dom_tree.js")),
);

pub const REMOVE_HIGHLIGHTS: PageScript = PageScript::new(
    "remove_highlights",
    r#"() => {
  const overlay = document.getElementById('webpilot-highlight-container');
  if (overlay) overlay.remove();
  return true;
}"#,
);

/// Scrolls the element into view and returns its centre in CSS pixels, or
/// `null` when the index is unknown.
pub const CLICK_TARGET: PageScript = PageScript::new(
    "click_target",
    r#"(args) => {
  const el = document.querySelector(`[data-webpilot-index="${args.index}"]`);
  if (!el) return null;
  el.scrollIntoView({ block: 'center', inline: 'center' });
  const rect = el.getBoundingClientRect();
  return { x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 };
}"#,
);

pub const FOCUS_AND_CLEAR: PageScript = PageScript::new(
    "focus_and_clear",
    r#"(args) => {
  const el = document.querySelector(`[data-webpilot-index="${args.index}"]`);
  if (!el) return false;
  el.scrollIntoView({ block: 'center' });
  el.focus();
  if ('value' in el) {
    el.value = '';
    el.dispatchEvent(new Event('input', { bubbles: true }));
  } else if (el.isContentEditable) {
    el.textContent = '';
  }
  return true;
}"#,
);

pub const SCROLL_BY: PageScript = PageScript::new(
    "scroll_by",
    r#"(args) => {
  const amount = args.amount === null ? window.innerHeight : args.amount;
  window.scrollBy(0, args.down ? amount : -amount);
  return Math.round(window.scrollY);
}"#,
);

pub const SCROLL_TO_TEXT: PageScript = PageScript::new(
    "scroll_to_text",
    r#"(args) => {
  const needle = args.text.toLowerCase();
  const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT);
  for (let node = walker.nextNode(); node; node = walker.nextNode()) {
    const parent = node.parentElement;
    if (!parent || !node.textContent.toLowerCase().includes(needle)) continue;
    const rect = parent.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) continue;
    parent.scrollIntoView({ behavior: 'auto', block: 'center' });
    return true;
  }
  return false;
}"#,
);

/// `{found, options}`; `options` is empty for non-select elements.
pub const DROPDOWN_OPTIONS: PageScript = PageScript::new(
    "dropdown_options",
    r#"(args) => {
  const el = document.querySelector(`[data-webpilot-index="${args.index}"]`);
  if (!el) return { found: false, options: [] };
  const options = el.tagName === 'SELECT' ? Array.from(el.options).map((o) => o.text.trim()) : [];
  return { found: true, options };
}"#,
);

/// `"selected"`, `"missing_option"`, `"not_select"` or `"not_found"`.
pub const SELECT_OPTION: PageScript = PageScript::new(
    "select_option",
    r#"(args) => {
  const el = document.querySelector(`[data-webpilot-index="${args.index}"]`);
  if (!el) return 'not_found';
  if (el.tagName !== 'SELECT') return 'not_select';
  const option = Array.from(el.options).find((o) => o.text.trim() === args.text.trim());
  if (!option) return 'missing_option';
  el.value = option.value;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return 'selected';
}"#,
);

pub const PAGE_TEXT: PageScript = PageScript::new(
    "page_text",
    r#"() => (document.body ? document.body.innerText : '')"#,
);

/// Ready state plus the number of loaded resources, polled to detect a
/// settled page.
pub const LOAD_STATE: PageScript = PageScript::new(
    "load_state",
    r#"() => ({
  ready: document.readyState,
  resources: performance.getEntriesByType('resource').length,
})"#,
);

/// Result of [`DOM_TREE`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub elements: Vec<DomElement>,
    pub pixels_above: i64,
    pub pixels_below: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropdownListing {
    pub found: bool,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoadState {
    pub ready: String,
    pub resources: u64,
}

impl LoadState {
    pub fn is_complete(&self) -> bool {
        self.ready == "complete"
    }
}

/// A single key press as sent through `Input.dispatchKeyEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStroke {
    pub key: String,
    pub code: String,
    pub key_code: u32,
    pub text: Option<String>,
    /// CDP modifier bitmask: Alt=1, Control=2, Meta=4, Shift=8.
    pub modifiers: u32,
}

/// Parse a chord such as `"Control+a"` or `"Enter"`.
pub fn parse_key_chord(chord: &str) -> Option<KeyStroke> {
    let parts: Vec<&str> = chord.split('+').map(str::trim).collect();
    let (key, modifier_names) = match parts.split_last() {
        Some((key, rest)) if !key.is_empty() => (*key, rest),
        // "Control++" style chords name the plus key itself
        _ if chord.ends_with('+') => ("+", &parts[..parts.len().saturating_sub(2)]),
        _ => return None,
    };

    let mut modifiers = 0;
    for name in modifier_names {
        modifiers |= match name.to_ascii_lowercase().as_str() {
            "alt" | "option" => 1,
            "control" | "ctrl" => 2,
            "meta" | "cmd" | "command" => 4,
            "shift" => 8,
            _ => return None,
        };
    }

    let (key, code, key_code, text) = named_key(key).or_else(|| character_key(key))?;
    // Chords with Control/Meta trigger shortcuts rather than typing.
    let text = if modifiers & (2 | 4) != 0 { None } else { text };
    Some(KeyStroke {
        key,
        code,
        key_code,
        text,
        modifiers,
    })
}

type KeyParts = (String, String, u32, Option<String>);

fn named_key(key: &str) -> Option<KeyParts> {
    let (name, key_code, text) = match key.to_ascii_lowercase().as_str() {
        "enter" | "return" => ("Enter", 13, Some("\r")),
        "tab" => ("Tab", 9, None),
        "escape" | "esc" => ("Escape", 27, None),
        "backspace" => ("Backspace", 8, None),
        "delete" => ("Delete", 46, None),
        "space" => (" ", 32, Some(" ")),
        "arrowup" | "up" => ("ArrowUp", 38, None),
        "arrowdown" | "down" => ("ArrowDown", 40, None),
        "arrowleft" | "left" => ("ArrowLeft", 37, None),
        "arrowright" | "right" => ("ArrowRight", 39, None),
        "pageup" => ("PageUp", 33, None),
        "pagedown" => ("PageDown", 34, None),
        "home" => ("Home", 36, None),
        "end" => ("End", 35, None),
        _ => return None,
    };
    let code = if name == " " { "Space" } else { name };
    Some((
        name.to_string(),
        code.to_string(),
        key_code,
        text.map(str::to_string),
    ))
}

fn character_key(key: &str) -> Option<KeyParts> {
    let mut chars = key.chars();
    let ch = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    let upper = ch.to_ascii_uppercase();
    let (code, key_code) = if upper.is_ascii_alphabetic() {
        (format!("Key{upper}"), upper as u32)
    } else if ch.is_ascii_digit() {
        (format!("Digit{ch}"), ch as u32)
    } else {
        (String::new(), 0)
    };
    Some((ch.to_string(), code, key_code, Some(ch.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_passes_arguments_as_json() {
        let expr = CLICK_TARGET.call(&json!({"index": 4}));
        assert!(expr.ends_with(")({\"index\":4})\n//# sourceURL=webpilot/click_target.js"));
        assert!(expr.starts_with("((args) =>"));
    }

    #[test]
    fn dom_tree_script_is_embedded() {
        let expr = DOM_TREE.call(&json!({"highlight": true}));
        assert!(expr.contains(INDEX_ATTRIBUTE));
        assert!(expr.contains("pixels_below"));
    }

    #[test]
    fn snapshot_parses_script_output() {
        let snapshot: PageSnapshot = serde_json::from_value(json!({
            "url": "https://example.com/",
            "title": "Example",
            "elements": [
                {"index": 0, "tag_name": "a", "attributes": {"href": "/"}, "text": "Home", "xpath": "html/body/a"}
            ],
            "pixels_above": 0,
            "pixels_below": 1200
        }))
        .unwrap();
        assert_eq!(snapshot.elements.len(), 1);
        assert_eq!(snapshot.elements[0].attributes["href"], "/");
        assert_eq!(snapshot.pixels_below, 1200);

        let empty: PageSnapshot = serde_json::from_value(json!({})).unwrap();
        assert!(empty.elements.is_empty());
    }

    #[test]
    fn parses_named_keys_and_chords() {
        let enter = parse_key_chord("Enter").unwrap();
        assert_eq!(enter.key_code, 13);
        assert_eq!(enter.text.as_deref(), Some("\r"));
        assert_eq!(enter.modifiers, 0);

        let select_all = parse_key_chord("Control+a").unwrap();
        assert_eq!(select_all.key, "a");
        assert_eq!(select_all.code, "KeyA");
        assert_eq!(select_all.key_code, 65);
        assert_eq!(select_all.modifiers, 2);
        assert_eq!(select_all.text, None);

        let shifted = parse_key_chord("Shift+Tab").unwrap();
        assert_eq!(shifted.modifiers, 8);
        assert_eq!(shifted.code, "Tab");

        let plus = parse_key_chord("Control++").unwrap();
        assert_eq!(plus.key, "+");
        assert_eq!(plus.modifiers, 2);

        assert!(parse_key_chord("Hyper+x").is_none());
        assert!(parse_key_chord("NotAKey").is_none());
        assert!(parse_key_chord("").is_none());
    }
}
