//! Text rendering of indexed elements for the model.
//!
//! Each interactive element becomes one line of the form
//! `[index]<tag attr="value">text</tag>`; only the attributes listed in
//! [`AgentSettings::include_attributes`](crate::AgentSettings) are rendered.

use crate::browser::{BrowserState, DomElement};

const MAX_TEXT_LENGTH: usize = 100;

/// Render elements into the list shown in state messages.
pub fn format_elements(elements: &[DomElement], include_attributes: &[String]) -> String {
    elements
        .iter()
        .map(|el| format!("[{}]{}", el.index, html_repr(el, include_attributes)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn html_repr(element: &DomElement, include_attributes: &[String]) -> String {
    let mut parts = vec![format!("<{}", element.tag_name)];

    for attr in include_attributes {
        if let Some(value) = element.attributes.get(attr) {
            let truncated = truncate_text(value, MAX_TEXT_LENGTH);
            if !truncated.is_empty() {
                parts.push(format!(" {}=\"{}\"", attr, escape_html(&truncated)));
            }
        }
    }

    let text = truncate_text(&element.text, MAX_TEXT_LENGTH);
    if text.is_empty() {
        parts.push(" />".to_string());
    } else {
        parts.push(">".to_string());
        parts.push(escape_html(&text));
        parts.push(format!("</{}>", element.tag_name));
    }

    parts.join("")
}

/// Truncate text to max length (character-based, not byte-based for UTF-8 safety).
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let truncated: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Locate a previously recorded element in a fresh observation.
///
/// Exact fingerprint matches win; otherwise the element must share the tag
/// and at least one identifying attribute or the same text.
pub fn find_matching_element<'a>(
    recorded: &DomElement,
    state: &'a BrowserState,
) -> Option<&'a DomElement> {
    let fingerprint = recorded.fingerprint();
    if let Some(exact) = state
        .elements
        .iter()
        .find(|candidate| candidate.fingerprint() == fingerprint)
    {
        return Some(exact);
    }

    if !recorded.xpath.is_empty() {
        if let Some(by_path) = state
            .elements
            .iter()
            .find(|candidate| candidate.xpath == recorded.xpath && candidate.tag_name == recorded.tag_name)
        {
            return Some(by_path);
        }
    }

    const IDENTIFYING: &[&str] = &["id", "name", "aria-label", "placeholder", "href", "title"];
    state
        .elements
        .iter()
        .filter(|candidate| candidate.tag_name == recorded.tag_name)
        .find(|candidate| {
            let same_attr = IDENTIFYING.iter().any(|attr| {
                matches!(
                    (recorded.attributes.get(*attr), candidate.attributes.get(*attr)),
                    (Some(a), Some(b)) if !a.is_empty() && a == b
                )
            });
            let recorded_text = recorded.text.trim();
            same_attr || (!recorded_text.is_empty() && recorded_text == candidate.text.trim())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::default_include_attributes;

    fn state_with(elements: Vec<DomElement>) -> BrowserState {
        BrowserState {
            elements,
            ..BrowserState::default()
        }
    }

    #[test]
    fn renders_selected_attributes_only() {
        let elements = vec![
            DomElement::new(0, "button")
                .with_attribute("type", "submit")
                .with_attribute("class", "btn primary")
                .with_text("Click me"),
            DomElement::new(1, "input").with_attribute("placeholder", "Search"),
        ];

        let tree = format_elements(&elements, &default_include_attributes());
        let lines: Vec<_> = tree.lines().collect();
        assert_eq!(lines[0], "[0]<button type=\"submit\">Click me</button>");
        assert_eq!(lines[1], "[1]<input placeholder=\"Search\" />");
    }

    #[test]
    fn truncates_and_collapses_whitespace() {
        assert_eq!(truncate_text("  Short \n text ", 20), "Short text");
        assert_eq!(
            truncate_text("This is a very long text that should be truncated", 20),
            "This is a very lo..."
        );
    }

    #[test]
    fn escapes_markup_in_text() {
        let tree = format_elements(
            &[DomElement::new(3, "a").with_text("<b>&</b>")],
            &[],
        );
        assert_eq!(tree, "[3]<a>&lt;b&gt;&amp;&lt;/b&gt;</a>");
    }

    #[test]
    fn matching_survives_reindexing() {
        let recorded = DomElement::new(4, "input")
            .with_attribute("name", "q")
            .with_xpath("html/body/form/input");
        let state = state_with(vec![
            DomElement::new(0, "a").with_text("Home"),
            DomElement::new(9, "input")
                .with_attribute("name", "q")
                .with_xpath("html/body/form/input"),
        ]);
        assert_eq!(find_matching_element(&recorded, &state).map(|el| el.index), Some(9));
    }

    #[test]
    fn matching_falls_back_to_identifying_attributes() {
        let recorded = DomElement::new(2, "button")
            .with_attribute("aria-label", "Submit")
            .with_xpath("html/body/div[1]/button");
        let state = state_with(vec![DomElement::new(5, "button")
            .with_attribute("aria-label", "Submit")
            .with_xpath("html/body/div[2]/button")]);
        assert_eq!(find_matching_element(&recorded, &state).map(|el| el.index), Some(5));

        let other = state_with(vec![DomElement::new(5, "a").with_attribute("aria-label", "Submit")]);
        assert!(find_matching_element(&recorded, &other).is_none());
    }
}
