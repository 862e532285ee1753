//! Readability-style main content extraction over a parsed document.

use ego_tree::NodeRef;
use html_escape::{encode_double_quoted_attribute, encode_text};
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};

use crate::dom::{collapse_whitespace, collect_text, document_title, resolve_url};
use crate::domain::ExtractedArticle;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadabilityOptions {
    /// Candidate containers for the main content, in priority order
    pub content_selectors: Vec<String>,

    /// Elements dropped from the extracted content (ads, navigation, etc.)
    pub remove_selectors: Vec<String>,

    /// A candidate needs at least this many characters of text (default: 100)
    pub min_content_length: usize,
}

impl Default for ReadabilityOptions {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            content_selectors: strings(&[
                "article",
                "[role=\"main\"]",
                "main",
                ".post-content",
                ".article-content",
                ".entry-content",
                ".content",
                "#content",
                ".post",
                ".article",
                ".blog-post",
            ]),
            remove_selectors: strings(&[
                "nav",
                "header",
                "footer",
                "aside",
                "form",
                ".sidebar",
                ".advertisement",
                ".ad",
                ".ads",
                ".social-share",
                ".comments",
                ".related-posts",
                "script",
                "style",
                "noscript",
                "iframe",
            ]),
            min_content_length: 100,
        }
    }
}

pub struct ReadabilityExtractor {
    content_selectors: Vec<Selector>,
    remove_selectors: Vec<Selector>,
    min_content_length: usize,
}

impl Default for ReadabilityExtractor {
    fn default() -> Self {
        Self::new(&ReadabilityOptions::default())
    }
}

fn parse_selectors(selectors: &[String]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(selector) => Some(selector),
            Err(e) => {
                tracing::warn!(selector = %s, "Ignoring invalid selector: {:?}", e);
                None
            }
        })
        .collect()
}

impl ReadabilityExtractor {
    pub fn new(options: &ReadabilityOptions) -> Self {
        Self {
            content_selectors: parse_selectors(&options.content_selectors),
            remove_selectors: parse_selectors(&options.remove_selectors),
            min_content_length: options.min_content_length,
        }
    }

    pub fn extract_html(&self, html: &str, url: &str) -> ExtractedArticle {
        self.extract(&Html::parse_document(html), url)
    }

    pub fn extract(&self, document: &Html, url: &str) -> ExtractedArticle {
        let container = self.main_container(document);

        let mut content = String::new();
        let mut text = Vec::new();
        match container {
            Some(element) => {
                for child in element.children() {
                    self.write_clean(child, url, &mut content, &mut text);
                }
            }
            None => self.write_clean(document.tree.root(), url, &mut content, &mut text),
        }

        let image_url = meta_content(document, "meta[property=\"og:image\"]")
            .or_else(|| {
                container
                    .and_then(|c| select_first(c, "img[src]"))
                    .and_then(|img| img.value().attr("src").map(String::from))
            })
            .and_then(|src| resolve_url(url, &src));

        ExtractedArticle {
            url: url.to_string(),
            title: meta_content(document, "meta[property=\"og:title\"]")
                .or_else(|| document_title(document))
                .or_else(|| {
                    Selector::parse("h1").ok().and_then(|sel| {
                        document
                            .select(&sel)
                            .next()
                            .map(|h| collapse_whitespace(&h.text().collect::<String>()))
                    })
                }),
            content: content.trim().to_string(),
            content_text: text.join("\n"),
            content_mime: "text/html".to_string(),
            image_url,
            favicon_url: Selector::parse("link[rel~=\"icon\"][href]")
                .ok()
                .and_then(|sel| document.select(&sel).next())
                .and_then(|link| link.value().attr("href"))
                .and_then(|href| resolve_url(url, href)),
            published: meta_content(document, "meta[property=\"article:published_time\"]").or_else(|| {
                Selector::parse("time[datetime]")
                    .ok()
                    .and_then(|sel| document.select(&sel).next())
                    .and_then(|t| t.value().attr("datetime").map(String::from))
            }),
        }
    }

    fn main_container<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        for selector in &self.content_selectors {
            if let Some(element) = document.select(selector).next() {
                if collect_text(*element).chars().count() > self.min_content_length {
                    return Some(element);
                }
            }
        }
        Selector::parse("body")
            .ok()
            .and_then(|sel| document.select(&sel).next())
    }

    fn is_removed(&self, element: ElementRef<'_>) -> bool {
        self.remove_selectors.iter().any(|s| s.matches(&element))
    }

    fn write_clean(&self, node: NodeRef<'_, Node>, base_url: &str, html: &mut String, text: &mut Vec<String>) {
        match node.value() {
            Node::Text(t) => {
                html.push_str(&encode_text(&**t));
                let trimmed = t.trim();
                if !trimmed.is_empty() {
                    text.push(trimmed.to_string());
                }
            }
            Node::Element(element) => {
                let Some(element_ref) = ElementRef::wrap(node) else {
                    return;
                };
                if self.is_removed(element_ref) {
                    return;
                }
                let name = element.name();
                html.push('<');
                html.push_str(name);
                for (key, value) in element.attrs() {
                    if key.starts_with("on") || key == "style" {
                        continue;
                    }
                    let value = if key == "href" || key == "src" {
                        resolve_url(base_url, value).unwrap_or_else(|| value.to_string())
                    } else {
                        value.to_string()
                    };
                    html.push_str(&format!(" {}=\"{}\"", key, encode_double_quoted_attribute(&value)));
                }
                html.push('>');
                if VOID_ELEMENTS.contains(&name) {
                    return;
                }
                for child in node.children() {
                    self.write_clean(child, base_url, html, text);
                }
                html.push_str("</");
                html.push_str(name);
                html.push('>');
            }
            Node::Document | Node::Fragment => {
                for child in node.children() {
                    self.write_clean(child, base_url, html, text);
                }
            }
            _ => {}
        }
    }
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn select_first<'a>(element: ElementRef<'a>, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    element.select(&selector).next()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<html><head>
        <title>Page Title</title>
        <meta property="og:image" content="/cover.png">
        <link rel="icon" href="/favicon.ico">
      </head><body>
        <nav><a href="/">Home</a></nav>
        <article>
          <h1>Headline</h1>
          <p onclick="evil()">This paragraph is long enough to count as the main content of the page, well over a hundred characters.</p>
          <aside>Related stuff</aside>
          <img src="inline.png">
          <script>track()</script>
        </article>
        <footer>Copyright</footer>
      </body></html>"#;

    #[test]
    fn test_extracts_article_and_strips_noise() {
        let article = ReadabilityExtractor::default().extract_html(ARTICLE, "https://example.com/post");

        assert_eq!(article.title.as_deref(), Some("Page Title"));
        assert!(article.content.contains("<h1>Headline</h1>"));
        assert!(article.content.contains("<img src=\"https://example.com/inline.png\">"));
        assert!(!article.content.contains("Related stuff"));
        assert!(!article.content.contains("track()"));
        assert!(!article.content.contains("onclick"));
        assert!(!article.content.contains("Copyright"));
        assert!(article.content_text.starts_with("Headline\nThis paragraph"));
        assert_eq!(article.image_url.as_deref(), Some("https://example.com/cover.png"));
        assert_eq!(article.favicon_url.as_deref(), Some("https://example.com/favicon.ico"));
        assert_eq!(article.content_mime, "text/html");
    }

    #[test]
    fn test_falls_back_to_body_for_short_candidates() {
        let html = "<html><body><article>tiny</article><div>Body text</div></body></html>";
        let article = ReadabilityExtractor::default().extract_html(html, "https://example.com");
        assert!(article.content_text.contains("tiny"));
        assert!(article.content_text.contains("Body text"));
        assert_eq!(article.title, None);
    }

    #[test]
    fn test_title_falls_back_to_h1() {
        let html = "<html><body><h1>Only Heading</h1></body></html>";
        let article = ReadabilityExtractor::default().extract_html(html, "https://example.com");
        assert_eq!(article.title.as_deref(), Some("Only Heading"));
    }
}
