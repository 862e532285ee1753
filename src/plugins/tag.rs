use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::Result;
use crate::domain::Document;
use crate::plugins::filter::FieldFilter;
use crate::plugins::{parse_params, DocumentPlugin, PluginContext, PluginOutcome};

/// Adds `tag` to documents matching `filter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalTag {
    pub tag: String,
    #[serde(default)]
    pub filter: FieldFilter,
}

/// Applies every matching tag; never drops a document.
pub fn apply_tags(tags: &[ConditionalTag], document: &mut Document, index: usize) -> Result<()> {
    for conditional in tags {
        if conditional.filter.matches(document, index)? {
            document.add_tag(&conditional.tag);
        }
    }
    Ok(())
}

pub struct ConditionalTagPlugin;

impl ConditionalTagPlugin {
    pub const ID: &'static str = "conditional_tag";
}

#[async_trait]
impl DocumentPlugin for ConditionalTagPlugin {
    fn id(&self) -> &'static str {
        Self::ID
    }

    async fn process(
        &self,
        ctx: &PluginContext<'_>,
        document: &mut Document,
        params: &serde_json::Value,
    ) -> Result<PluginOutcome> {
        let tags: Vec<ConditionalTag> = parse_params(Self::ID, params)?;
        apply_tags(&tags, document, ctx.index)?;
        Ok(PluginOutcome::Keep)
    }
}
