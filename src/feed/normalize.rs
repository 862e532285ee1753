use feed_rs::model::{Entry, Feed};
use html_escape::decode_html_entities;
use scraper::Html;
use tracing::debug;

use crate::dom::{absolute_url, collect_text, resolve_url};
use crate::domain::{FeedItem, NormalizedFeed};

/// Converts the feed-rs model into a `NormalizedFeed`, resolving links against `feed_url`.
pub fn normalize(feed: Feed, feed_url: &str) -> NormalizedFeed {
    let website_url = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .or(feed.links.first())
        .and_then(|l| resolve_url(feed_url, &l.href));

    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| normalize_entry(entry, feed_url))
        .collect();

    NormalizedFeed {
        title: feed.title.map(|t| decode_html_entities(&t.content).trim().to_string()),
        description: feed
            .description
            .map(|d| decode_html_entities(&d.content).trim().to_string()),
        feed_url: feed_url.to_string(),
        website_url,
        published_at: feed.published.or(feed.updated),
        items,
        links: Vec::new(),
    }
}

fn normalize_entry(entry: Entry, feed_url: &str) -> Option<FeedItem> {
    let url = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or(entry.links.first())
        .and_then(|l| resolve_url(feed_url, &l.href))
        .or_else(|| absolute_url(&entry.id));

    let Some(url) = url else {
        debug!(entry_id = %entry.id, "Skipping entry without a usable link");
        return None;
    };

    let image_url = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter().map(|t| t.image.uri.clone()))
        .chain(entry.media.iter().flat_map(|m| {
            m.content.iter().filter_map(|c| {
                let is_image = c
                    .content_type
                    .as_ref()
                    .map_or(false, |ct| ct.to_string().starts_with("image/"));
                if is_image {
                    c.url.as_ref().map(|u| u.to_string())
                } else {
                    None
                }
            })
        }))
        .next();

    let summary = entry.summary.map(|s| decode_html_entities(&s.content).to_string());
    let (content_raw, content_raw_mime) = match entry.content {
        Some(content) => {
            let mime = content.content_type.to_string();
            (content.body.map(|b| decode_html_entities(&b).to_string()), Some(mime))
        }
        None => (summary.clone(), summary.as_ref().map(|_| "text/html".to_string())),
    };

    let content_text = summary
        .as_deref()
        .or(content_raw.as_deref())
        .map(html_to_text)
        .filter(|t| !t.is_empty());

    Some(FeedItem {
        url,
        title: entry
            .title
            .map(|t| decode_html_entities(&t.content).trim().to_string()),
        content_text,
        content_raw,
        content_raw_mime,
        image_url,
        published_at: entry.published.or(entry.updated),
        tags: entry.categories.into_iter().map(|c| c.term).collect(),
    })
}

pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    collect_text(fragment.tree.root())
}
