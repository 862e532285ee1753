use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::app::{GleanerError, Result};
use crate::domain::Document;
use crate::plugins::{parse_params, DocumentPlugin, PluginContext, PluginOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringOperator {
    Contains,
    StartsWith,
    EndsWith,
    Equals,
    /// Regular expression search.
    Matches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericOperator {
    Lt,
    Gt,
    Eq,
}

/// Case-insensitive except for `matches`, which uses the pattern as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringFilter {
    pub operator: StringOperator,
    pub value: String,
}

impl StringFilter {
    pub fn matches(&self, subject: &str) -> Result<bool> {
        let folded = || (subject.to_lowercase(), self.value.to_lowercase());
        Ok(match self.operator {
            StringOperator::Contains => {
                let (subject, value) = folded();
                subject.contains(&value)
            }
            StringOperator::StartsWith => {
                let (subject, value) = folded();
                subject.starts_with(&value)
            }
            StringOperator::EndsWith => {
                let (subject, value) = folded();
                subject.ends_with(&value)
            }
            StringOperator::Equals => {
                let (subject, value) = folded();
                subject == value
            }
            StringOperator::Matches => Regex::new(&self.value)
                .map_err(|e| GleanerError::plugin(FilterPlugin::ID, format!("invalid pattern: {}", e)))?
                .is_match(subject),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericFilter {
    pub operator: NumericOperator,
    pub value: i64,
}

impl NumericFilter {
    pub fn matches(&self, subject: i64) -> bool {
        match self.operator {
            NumericOperator::Lt => subject < self.value,
            NumericOperator::Gt => subject > self.value,
            NumericOperator::Eq => subject == self.value,
        }
    }
}

/// Conditions over item fields; every present condition must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<NumericFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<StringFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<StringFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<StringFilter>,
}

impl FieldFilter {
    pub fn matches(&self, document: &Document, index: usize) -> Result<bool> {
        if let Some(filter) = &self.index {
            if !filter.matches(index as i64) {
                return Ok(false);
            }
        }
        let fields = [
            (&self.title, document.title.as_deref()),
            (&self.content, document.content_text.as_deref()),
            (&self.link, Some(document.url.as_str())),
        ];
        for (filter, subject) in fields {
            if let Some(filter) = filter {
                if !filter.matches(subject.unwrap_or(""))? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Keeps an item if it matches `include` (when given) and does not match `exclude`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<FieldFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<FieldFilter>,
}

impl CompositeFilter {
    pub fn keeps(&self, document: &Document, index: usize) -> Result<bool> {
        if let Some(include) = &self.include {
            if !include.matches(document, index)? {
                return Ok(false);
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.matches(document, index)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// True if every filter keeps the document.
pub fn keeps_all(filters: &[CompositeFilter], document: &Document, index: usize) -> Result<bool> {
    for filter in filters {
        if !filter.keeps(document, index)? {
            return Ok(false);
        }
    }
    Ok(true)
}

pub struct FilterPlugin;

impl FilterPlugin {
    pub const ID: &'static str = "filter";
}

#[async_trait]
impl DocumentPlugin for FilterPlugin {
    fn id(&self) -> &'static str {
        Self::ID
    }

    async fn process(
        &self,
        ctx: &PluginContext<'_>,
        document: &mut Document,
        params: &serde_json::Value,
    ) -> Result<PluginOutcome> {
        let filters: Vec<CompositeFilter> = parse_params(Self::ID, params)?;
        if keeps_all(&filters, document, ctx.index)? {
            Ok(PluginOutcome::Keep)
        } else {
            Ok(PluginOutcome::Drop)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(title: &str, content: &str, url: &str) -> Document {
        let mut document = Document::new("r", url);
        document.title = Some(title.into());
        document.content_text = Some(content.into());
        document
    }

    fn filters(value: serde_json::Value) -> Vec<CompositeFilter> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_string_operators() {
        let f = |operator, value: &str| StringFilter {
            operator,
            value: value.into(),
        };
        assert!(f(StringOperator::Contains, "RUST").matches("Learning rust").unwrap());
        assert!(f(StringOperator::StartsWith, "learn").matches("Learning rust").unwrap());
        assert!(f(StringOperator::EndsWith, "Rust").matches("Learning rust").unwrap());
        assert!(f(StringOperator::Equals, "learning rust").matches("Learning Rust").unwrap());
        assert!(f(StringOperator::Matches, r"^\d{4}-").matches("2024-01 notes").unwrap());
        assert!(!f(StringOperator::Matches, r"^\d{4}-").matches("notes").unwrap());
        assert!(f(StringOperator::Matches, "(").matches("x").is_err());
    }

    #[test]
    fn test_include_and_exclude() {
        let filters = filters(json!([{
            "include": { "content": { "operator": "contains", "value": "rust" } },
            "exclude": { "title": { "operator": "starts_with", "value": "[ad]" } }
        }]));

        let good = document("Weekly", "All about Rust", "https://e.com/1");
        let ad = document("[AD] Buy", "Rust merch", "https://e.com/2");
        let other = document("Weekly", "Gardening", "https://e.com/3");

        assert!(keeps_all(&filters, &good, 0).unwrap());
        assert!(!keeps_all(&filters, &ad, 0).unwrap());
        assert!(!keeps_all(&filters, &other, 0).unwrap());
    }

    #[test]
    fn test_index_field() {
        let filters = filters(json!([{ "include": { "index": { "operator": "lt", "value": 2 } } }]));
        let doc = document("a", "b", "https://e.com/");
        assert!(keeps_all(&filters, &doc, 0).unwrap());
        assert!(keeps_all(&filters, &doc, 1).unwrap());
        assert!(!keeps_all(&filters, &doc, 2).unwrap());
    }

    #[test]
    fn test_all_filters_must_keep() {
        let filters = filters(json!([
            { "include": { "link": { "operator": "contains", "value": "blog" } } },
            { "exclude": { "link": { "operator": "ends_with", "value": ".pdf" } } }
        ]));
        assert!(keeps_all(&filters, &document("a", "", "https://e.com/blog/1"), 0).unwrap());
        assert!(!keeps_all(&filters, &document("a", "", "https://e.com/blog/1.pdf"), 0).unwrap());
        assert!(!keeps_all(&filters, &document("a", "", "https://e.com/news/1"), 0).unwrap());
        assert!(keeps_all(&[], &document("a", "", "https://e.com/news/1"), 0).unwrap());
    }
}
