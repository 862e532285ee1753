//! Heuristic discovery of feeds hidden in plain HTML: repeating sibling
//! elements that each carry a link become items.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ego_tree::NodeRef;
use scraper::{Html, Node};
use serde::{Deserialize, Serialize};

use crate::app::Result;
use crate::dom::xpath::{path_to, relative_path};
use crate::dom::{attr, collapse_whitespace, collect_text, document_title, element_name, outer_html, resolve_url, XPath, XValue};
use crate::domain::{FeedItem, GenericFeedRule, NormalizedFeed};

const CANDIDATE_TAGS: &[&str] = &["li", "article", "div", "tr", "section", "dd", "dt", "p", "figure"];

const PAGINATION_XPATHS: &[&str] = &[
    "//a[@rel='next']",
    "//link[@rel='next']",
    "//a[contains(@class, 'next')]",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericFeedOptions {
    /// Groups with fewer linked elements are dropped (default: 3)
    pub min_item_count: usize,
    /// Keep at most this many rules (default: 10)
    pub max_rules: usize,
    /// Only keep rules with a resolvable date (default: false)
    pub require_date: bool,
}

impl Default for GenericFeedOptions {
    fn default() -> Self {
        Self {
            min_item_count: 3,
            max_rules: 10,
            require_date: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenericFeedLocator {
    options: GenericFeedOptions,
}

impl GenericFeedLocator {
    pub fn new(options: GenericFeedOptions) -> Self {
        Self { options }
    }

    /// Scored rules, best first. Deterministic for a given document.
    pub fn locate(&self, document: &Html) -> Vec<GenericFeedRule> {
        let root = document.tree.root();
        let pagination_xpath = PAGINATION_XPATHS
            .iter()
            .find(|expr| {
                XPath::parse(expr)
                    .map(|xpath| !xpath.nodes(root).is_empty())
                    .unwrap_or(false)
            })
            .map(|expr| format!("{}/@href", expr));

        let mut rules = Vec::new();
        for parent in root.descendants().filter(|n| n.value().is_element()) {
            let mut groups: BTreeMap<&str, Vec<NodeRef<'_, Node>>> = BTreeMap::new();
            for child in parent.children() {
                if let Some(name) = element_name(&child) {
                    if CANDIDATE_TAGS.contains(&name) {
                        groups.entry(name).or_default().push(child);
                    }
                }
            }

            for (tag, children) in groups {
                if children.len() < self.options.min_item_count {
                    continue;
                }
                if let Some(mut rule) = self.rule_for_group(parent, tag, &children) {
                    rule.pagination_xpath = pagination_xpath.clone();
                    rules.push(rule);
                }
            }
        }

        rules.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.count.cmp(&a.count))
                .then(a.depth().cmp(&b.depth()))
                .then(a.context_xpath.cmp(&b.context_xpath))
        });
        rules.truncate(self.options.max_rules);
        rules
    }

    fn rule_for_group(
        &self,
        parent: NodeRef<'_, Node>,
        tag: &str,
        children: &[NodeRef<'_, Node>],
    ) -> Option<GenericFeedRule> {
        let min = self.options.min_item_count;

        let linked: Vec<_> = children
            .iter()
            .filter_map(|child| first_anchor(*child).map(|anchor| (*child, anchor)))
            .collect();
        if linked.len() < min {
            return None;
        }

        let distinct_hrefs: HashSet<_> = linked
            .iter()
            .filter_map(|(_, anchor)| attr(anchor, "href"))
            .collect();
        if distinct_hrefs.len() < min {
            return None;
        }

        let (link_xpath, link_hits) = most_common(
            linked
                .iter()
                .filter_map(|(child, anchor)| relative_path(*child, *anchor)),
        )?;
        if link_hits < min {
            return None;
        }

        let date = most_common(children.iter().filter_map(|child| date_path(*child)));
        let date_xpath = date
            .filter(|(_, hits)| hits * 2 >= link_hits)
            .map(|(path, _)| path);
        if self.options.require_date && date_xpath.is_none() {
            return None;
        }

        let text_len: usize = linked
            .iter()
            .map(|(child, _)| collect_text(*child).chars().count())
            .sum();
        let avg_text = (text_len / linked.len()).min(400) as f64;

        let mut score = link_hits as f64;
        if date_xpath.is_some() {
            score *= 1.5;
        }
        score += avg_text / 40.0;

        Some(GenericFeedRule {
            context_xpath: format!("{}/{}", path_to(parent), tag),
            link_xpath,
            date_xpath,
            pagination_xpath: None,
            count: link_hits,
            score: (score * 100.0).round() / 100.0,
        })
    }
}

fn first_anchor(node: NodeRef<'_, Node>) -> Option<NodeRef<'_, Node>> {
    node.descendants().find(|n| {
        element_name(n) == Some("a")
            && attr(n, "href")
                .map(|href| !href.trim().is_empty() && !href.starts_with('#'))
                .unwrap_or(false)
    })
}

fn date_path(node: NodeRef<'_, Node>) -> Option<String> {
    for d in node.descendants() {
        if element_name(&d) == Some("time") {
            if let Some(datetime) = attr(&d, "datetime") {
                if parse_date(datetime).is_some() {
                    return relative_path(node, d).map(|p| format!("{}/@datetime", p));
                }
            }
        }
        if let Node::Text(text) = d.value() {
            if parse_date(text).is_some() {
                let parent = d.parent()?;
                return relative_path(node, parent);
            }
        }
    }
    None
}

/// Most frequent value and its count; ties go to the first seen.
fn most_common(values: impl Iterator<Item = String>) -> Option<(String, usize)> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (i, value) in values.enumerate() {
        counts.entry(value).or_insert((0, i)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (ca, ia)), (_, (cb, ib))| ca.cmp(cb).then(ib.cmp(ia)))
        .map(|(value, (count, _))| (value, count))
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Best-effort parse of dates commonly printed on web pages.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let text = collapse_whitespace(raw);
    if text.is_empty() || text.len() > 40 || !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&text, format) {
            return Some(dt.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&text, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

fn href_of(value: &XValue<'_>) -> Option<String> {
    match value {
        XValue::Attr(v) => Some(v.to_string()),
        XValue::Node(node) => attr(node, "href")
            .map(String::from)
            .or_else(|| first_anchor(*node).and_then(|a| attr(&a, "href")).map(String::from)),
    }
}

/// Applies `rule` to `document`: one item per context node with a resolvable link.
pub fn extract_feed(document: &Html, rule: &GenericFeedRule, base_url: &str) -> Result<NormalizedFeed> {
    let root = document.tree.root();
    let context = XPath::parse(&rule.context_xpath)?;
    let link = XPath::parse(&rule.link_xpath)?;
    let date = rule.date_xpath.as_deref().map(XPath::parse).transpose()?;
    let pagination = rule.pagination_xpath.as_deref().map(XPath::parse).transpose()?;

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for node in context.nodes(root) {
        let link_values = link.evaluate(node);
        let Some(first) = link_values.first() else {
            continue;
        };
        let Some(url) = href_of(first).and_then(|href| resolve_url(base_url, &href)) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        let content_text = collect_text(node);
        let title = first
            .node()
            .map(|n| collapse_whitespace(&collect_text(n)))
            .filter(|t| !t.is_empty())
            .or_else(|| content_text.lines().next().map(String::from));

        let image_url = node
            .descendants()
            .find(|n| element_name(n) == Some("img"))
            .and_then(|img| attr(&img, "src"))
            .and_then(|src| resolve_url(base_url, src));

        items.push(FeedItem {
            url,
            title,
            content_text: Some(content_text).filter(|t| !t.is_empty()),
            content_raw: Some(outer_html(node)),
            content_raw_mime: Some("text/html".to_string()),
            image_url,
            published_at: date
                .as_ref()
                .and_then(|d| d.first_string(node))
                .and_then(|s| parse_date(&s)),
            tags: Vec::new(),
        });
    }

    let mut links = Vec::new();
    if let Some(pagination) = pagination {
        for value in pagination.evaluate(root) {
            if let Some(next) = href_of(&value).and_then(|href| resolve_url(base_url, &href)) {
                if next != base_url && !links.contains(&next) {
                    links.push(next);
                }
            }
        }
    }

    Ok(NormalizedFeed {
        title: document_title(document),
        description: None,
        feed_url: base_url.to_string(),
        website_url: Some(base_url.to_string()),
        published_at: None,
        items,
        links,
    })
}
