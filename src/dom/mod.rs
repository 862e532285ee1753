//! Helpers over the `scraper` DOM shared by the scrape engine, discovery and plugins.

pub mod xpath;

pub use xpath::{XPath, XValue};

use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node};
use url::Url;

pub fn parse_document(html: &str) -> Html {
    Html::parse_document(html)
}

fn is_raw_text_container(node: &NodeRef<'_, Node>) -> bool {
    node.value()
        .as_element()
        .map(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
        .unwrap_or(false)
}

/// Text nodes below `node` in depth-first order, trimmed, one per line.
pub fn collect_text(node: NodeRef<'_, Node>) -> String {
    let mut parts = Vec::new();
    push_text(node, &mut parts);
    parts.join("\n")
}

fn push_text(node: NodeRef<'_, Node>, parts: &mut Vec<String>) {
    if let Node::Text(text) = node.value() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
        return;
    }
    if is_raw_text_container(&node) {
        return;
    }
    for child in node.children() {
        push_text(child, parts);
    }
}

/// XPath string-value: all descendant text concatenated as-is.
pub fn string_value(node: NodeRef<'_, Node>) -> String {
    match node.value() {
        Node::Text(text) => (**text).to_owned(),
        _ => node
            .descendants()
            .filter_map(|n| n.value().as_text().map(|t| (**t).to_owned()))
            .collect(),
    }
}

/// Markup inside `node`; the full document for the document node.
pub fn inner_html(document: &Html, node: NodeRef<'_, Node>) -> String {
    match node.value() {
        Node::Document | Node::Fragment => document.html(),
        Node::Text(text) => html_escape::encode_text(&**text).into_owned(),
        _ => ElementRef::wrap(node)
            .map(|e| e.inner_html())
            .unwrap_or_default(),
    }
}

pub fn outer_html(node: NodeRef<'_, Node>) -> String {
    match node.value() {
        Node::Text(text) => html_escape::encode_text(&**text).into_owned(),
        _ => ElementRef::wrap(node).map(|e| e.html()).unwrap_or_default(),
    }
}

pub fn element_name<'a>(node: &NodeRef<'a, Node>) -> Option<&'a str> {
    node.value().as_element().map(|e| e.name())
}

pub fn attr<'a>(node: &NodeRef<'a, Node>, name: &str) -> Option<&'a str> {
    node.value().as_element().and_then(|e| e.attr(name))
}

/// Resolves `href` against `base`; `None` for unusable links.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let resolved = match Url::parse(base) {
        Ok(base) => base.join(href).ok()?,
        Err(_) => Url::parse(href).ok()?,
    };
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// `href` if it is already an absolute http(s) URL.
pub fn absolute_url(href: &str) -> Option<String> {
    resolve_url("", href)
}

/// Contents of `<title>`, whitespace-collapsed.
pub fn document_title(document: &Html) -> Option<String> {
    let selector = scraper::Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
