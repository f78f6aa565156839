//! Content renderer for embedded blocks.
//!
//! A block interior is a JSON object `{"type": ..., "content": ...}`.
//! [`render`] never fails: anything malformed turns into a visible notice.

mod markdown;
mod markup;

pub use markdown::{markdown_to_html, markdown_to_text};
pub use markup::{InertScript, Markup};

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("{kind} content must be a string")]
    NotText { kind: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Image,
    Video,
    Markdown,
    RawMarkup,
    Json,
    Other(String),
}

impl BlockKind {
    fn from_wire(name: &str) -> Self {
        match name {
            "image" => Self::Image,
            "video" => Self::Video,
            "markdown" => Self::Markdown,
            "html" => Self::RawMarkup,
            "json" => Self::Json,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Markdown => "markdown",
            Self::RawMarkup => "html",
            Self::Json => "json",
            Self::Other(name) => name,
        }
    }
}

/// A parsed block, alive only until it is rendered.
#[derive(Debug, Clone)]
pub struct TypedContentBlock {
    pub kind: BlockKind,
    pub payload: Value,
}

#[derive(Deserialize)]
struct WireBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
}

impl TypedContentBlock {
    /// Parse the text between the sentinels.
    pub fn parse(interior: &str) -> Result<Self, BlockError> {
        let wire: WireBlock = serde_json::from_str(interior.trim())?;
        Ok(Self {
            kind: BlockKind::from_wire(&wire.kind),
            payload: wire.content,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub src: String,
    pub alt: Option<String>,
    pub additional: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Presentable output for one block.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Media { kind: MediaKind, media: Media },
    Markdown { html: String, text: String },
    RawMarkup(Markup),
    /// Pretty-printed JSON, shown preformatted.
    Json(String),
    /// Required field missing (e.g. media without `src`).
    Invalid { kind: String, reason: String },
    /// Interior could not be parsed or transformed.
    Error(String),
    Unsupported(String),
}

impl Rendered {
    /// True for the notice variants that replace a broken block.
    #[must_use]
    pub fn is_notice(&self) -> bool {
        matches!(
            self,
            Self::Invalid { .. } | Self::Error(_) | Self::Unsupported(_)
        )
    }

    /// Markup for surfaces that display HTML: the markdown transform, or raw
    /// markup exactly as received.
    #[must_use]
    pub fn html(&self) -> Option<&str> {
        match self {
            Self::Markdown { html, .. } => Some(html),
            Self::RawMarkup(markup) => Some(&markup.html),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Media {
                kind: MediaKind::Image,
                ..
            } => "image",
            Self::Media {
                kind: MediaKind::Video,
                ..
            } => "video",
            Self::Markdown { .. } => "markdown",
            Self::RawMarkup(_) => "html",
            Self::Json(_) => "json",
            Self::Invalid { .. } => "invalid",
            Self::Error(_) => "error",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

impl fmt::Display for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Media { kind, media } => {
                let label = match kind {
                    MediaKind::Image => "image",
                    MediaKind::Video => "video",
                };
                match &media.alt {
                    Some(alt) if !alt.is_empty() => write!(f, "[{label}: {alt}] {}", media.src),
                    _ => write!(f, "[{label}] {}", media.src),
                }
            }
            Self::Markdown { text, .. } => f.write_str(text),
            Self::RawMarkup(markup) => f.write_str(&markup.to_text()),
            Self::Json(pretty) => f.write_str(pretty),
            Self::Invalid { kind, reason } => write!(f, "⚠ Invalid {kind} block: {reason}"),
            Self::Error(msg) => write!(f, "⚠ Block error: {msg}"),
            Self::Unsupported(kind) => write!(f, "⚠ Unsupported block type: {kind}"),
        }
    }
}

/// Render a block interior straight from its source text.
pub fn render_interior(interior: &str) -> Rendered {
    match TypedContentBlock::parse(interior) {
        Ok(block) => render(&block),
        Err(e) => {
            tracing::warn!("Malformed block: {e}");
            Rendered::Error(e.to_string())
        }
    }
}

pub fn render(block: &TypedContentBlock) -> Rendered {
    match &block.kind {
        BlockKind::Image => render_media(MediaKind::Image, &block.payload),
        BlockKind::Video => render_media(MediaKind::Video, &block.payload),
        BlockKind::Markdown => match text_content(&block.payload, "markdown") {
            Ok(source) => Rendered::Markdown {
                html: markdown_to_html(source),
                text: markdown_to_text(source),
            },
            Err(e) => Rendered::Error(format!("markdown render failed: {e}")),
        },
        BlockKind::RawMarkup => match text_content(&block.payload, "html") {
            Ok(source) => Rendered::RawMarkup(Markup::new(source)),
            Err(e) => Rendered::Error(format!("html render failed: {e}")),
        },
        BlockKind::Json => match serde_json::to_string_pretty(&block.payload) {
            Ok(pretty) => Rendered::Json(pretty),
            Err(e) => Rendered::Error(format!("json render failed: {e}")),
        },
        BlockKind::Other(kind) => {
            tracing::warn!(kind = %kind, "Unsupported block type");
            Rendered::Unsupported(kind.clone())
        }
    }
}

fn text_content<'a>(payload: &'a Value, kind: &'static str) -> Result<&'a str, BlockError> {
    payload.as_str().ok_or(BlockError::NotText { kind })
}

fn render_media(kind: MediaKind, payload: &Value) -> Rendered {
    let label = match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
    };
    let src = payload
        .get("src")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let Some(src) = src else {
        return Rendered::Invalid {
            kind: label.to_string(),
            reason: "missing src".to_string(),
        };
    };

    Rendered::Media {
        kind,
        media: Media {
            src: src.to_string(),
            alt: payload.get("alt").and_then(Value::as_str).map(String::from),
            additional: payload.get("additional").cloned(),
        },
    }
}
