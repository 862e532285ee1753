//! JavaScript snippets evaluated inside the rendered page.

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn resolve_xpath(xpath: &str) -> String {
    format!(
        "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
        js_string(xpath)
    )
}

/// Clicks the first node matching `xpath`; evaluates to `false` when nothing matched.
pub fn click(xpath: &str) -> String {
    format!(
        r#"
        (() => {{
            const el = {node};
            if (!el) {{ return false; }}
            el.click();
            return true;
        }})()
        "#,
        node = resolve_xpath(xpath)
    )
}

/// Types `value` into the first node matching `xpath` and fires input/change events.
pub fn type_into(xpath: &str, value: &str) -> String {
    format!(
        r#"
        (() => {{
            const el = {node};
            if (!el) {{ return false; }}
            el.focus();
            el.value = {value};
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
        }})()
        "#,
        node = resolve_xpath(xpath),
        value = js_string(value)
    )
}

/// Number of resource entries loaded so far, polled to detect network idle.
pub fn resource_count() -> &'static str {
    "performance.getEntriesByType('resource').length"
}

/// Network log of the page as `"<initiator> <url> <duration>ms"` lines.
pub fn network_log() -> &'static str {
    r#"
    (() => performance.getEntriesByType('resource').map(e =>
        `${e.initiatorType} ${e.name} ${Math.round(e.duration)}ms`))()
    "#
}

/// Bounding rectangle of the first node matching `xpath`, relative to the document.
pub fn bounding_rect(xpath: &str) -> String {
    format!(
        r#"
        (() => {{
            const el = {node};
            if (!el || !el.getBoundingClientRect) {{ return null; }}
            const r = el.getBoundingClientRect();
            return {{ x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height }};
        }})()
        "#,
        node = resolve_xpath(xpath)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xpath_is_escaped() {
        let script = click("//a[@title=\"say \\\"hi\\\"\"]");
        assert!(script.contains("document.evaluate(\"//a[@title=\\\"say"));
        assert!(script.contains("el.click()"));
    }

    #[test]
    fn test_type_into_sets_value() {
        let script = type_into("//input[@name='q']", "rust's");
        assert!(script.contains("el.value = \"rust's\""));
        assert!(script.contains("'input'"));
    }
}
