use serde::{Deserialize, Serialize};

/// Payload kinds a fragment can be emitted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitType {
    Markup,
    Text,
    Pixel,
    Feeds,
    Readability,
}

impl EmitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitType::Markup => "markup",
            EmitType::Text => "text",
            EmitType::Pixel => "pixel",
            EmitType::Feeds => "feeds",
            EmitType::Readability => "readability",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "markup" | "html" => Some(EmitType::Markup),
            "text" => Some(EmitType::Text),
            "pixel" | "png" => Some(EmitType::Pixel),
            "feeds" | "feed" => Some(EmitType::Feeds),
            "readability" => Some(EmitType::Readability),
            _ => None,
        }
    }
}

/// Pixel region of a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Addresses a sub-region of a page, either structurally or by pixels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl FragmentSpec {
    pub fn root() -> Self {
        Self::xpath("/")
    }

    pub fn xpath(xpath: impl Into<String>) -> Self {
        Self {
            xpath: Some(xpath.into()),
            bounding_box: None,
        }
    }

    pub fn bounding_box(bounding_box: BoundingBox) -> Self {
        Self {
            xpath: None,
            bounding_box: Some(bounding_box),
        }
    }

    pub fn is_underspecified(&self) -> bool {
        let blank_xpath = self.xpath.as_deref().map(str::trim).unwrap_or("").is_empty();
        blank_xpath && self.bounding_box.is_none()
    }
}

/// One extraction target: where to look and what to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitSpec {
    pub types: Vec<EmitType>,
    pub fragment: FragmentSpec,
}

impl EmitSpec {
    pub fn new(fragment: FragmentSpec, types: Vec<EmitType>) -> Self {
        Self { types, fragment }
    }

    pub fn wants(&self, emit_type: EmitType) -> bool {
        self.types.contains(&emit_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub is_mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            is_mobile: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// Interaction replayed on the page before the snapshot is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageAction {
    Click { xpath: String },
    Type { xpath: String, value: String },
    Wait { ms: u64 },
    Cookie { name: String, value: String },
    Header { name: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderDirectives {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub wait_until: WaitUntil,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<PageAction>,
}

/// Declarative "fetch this URL and extract these pieces" request.
///
/// An empty `emit` list extracts the markup of the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderDirectives>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emit: Vec<EmitSpec>,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            render: None,
            emit: Vec::new(),
        }
    }

    pub fn with_emit(mut self, emit: EmitSpec) -> Self {
        self.emit.push(emit);
        self
    }

    pub fn rendered(mut self, directives: RenderDirectives) -> Self {
        self.render = Some(directives);
        self
    }

    pub fn is_rendered(&self) -> bool {
        self.render.is_some()
    }

    /// Same request against another URL, used to follow pagination.
    pub fn retarget(&self, url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..self.clone()
        }
    }

    /// Emit specs to evaluate; the whole document as markup when none are given.
    pub fn effective_emit(&self) -> Vec<EmitSpec> {
        if self.emit.is_empty() {
            vec![EmitSpec::new(FragmentSpec::root(), vec![EmitType::Markup])]
        } else {
            self.emit.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_underspecified() {
        assert!(FragmentSpec::default().is_underspecified());
        assert!(FragmentSpec::xpath("  ").is_underspecified());
        assert!(!FragmentSpec::root().is_underspecified());
        let bbox = BoundingBox {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        assert!(!FragmentSpec::bounding_box(bbox).is_underspecified());
    }

    #[test]
    fn test_effective_emit_defaults_to_root_markup() {
        let request = ScrapeRequest::new("https://example.com");
        let emit = request.effective_emit();
        assert_eq!(emit.len(), 1);
        assert_eq!(emit[0].fragment.xpath.as_deref(), Some("/"));
        assert!(emit[0].wants(EmitType::Markup));
    }

    #[test]
    fn test_request_deserializes_from_json() {
        let json = r#"{
            "url": "https://example.com",
            "render": {"wait_until": "network_idle", "actions": [{"type": "click", "xpath": "//button"}]},
            "emit": [{"types": ["text", "pixel"], "fragment": {"xpath": "//h1"}}]
        }"#;
        let request: ScrapeRequest = serde_json::from_str(json).unwrap();
        let render = request.render.unwrap();
        assert_eq!(render.wait_until, WaitUntil::NetworkIdle);
        assert_eq!(
            render.actions[0],
            PageAction::Click {
                xpath: "//button".into()
            }
        );
        assert_eq!(request.emit[0].types, vec![EmitType::Text, EmitType::Pixel]);
    }

    #[test]
    fn test_emit_type_parse() {
        assert_eq!(EmitType::parse("TEXT"), Some(EmitType::Text));
        assert_eq!(EmitType::parse("html"), Some(EmitType::Markup));
        assert_eq!(EmitType::parse("nope"), None);
    }

    #[test]
    fn test_retarget_keeps_directives() {
        let request = ScrapeRequest::new("https://example.com/page/1")
            .rendered(RenderDirectives::default())
            .with_emit(EmitSpec::new(FragmentSpec::root(), vec![EmitType::Text]));
        let next = request.retarget("https://example.com/page/2");
        assert_eq!(next.url, "https://example.com/page/2");
        assert!(next.is_rendered());
        assert_eq!(next.emit, request.emit);
    }
}
