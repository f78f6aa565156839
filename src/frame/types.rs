//! Decoded frame types and their payloads.

use super::decoder::RawFrame;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Payload that marks logical end of stream.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid frame payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Status,
    ToolStatus,
    Token,
    AuxCaption,
    Metrics,
    /// Producer-reported error.
    Error,
    Unknown(String),
}

impl FrameKind {
    /// Map an `event:` name. Frames without one default to `message`.
    #[must_use]
    pub fn from_event(event: Option<&str>) -> Self {
        match event.unwrap_or("message") {
            "status" => Self::Status,
            "tool_status" => Self::ToolStatus,
            "token" => Self::Token,
            "aux_caption" | "vlm_response" => Self::AuxCaption,
            "metrics" => Self::Metrics,
            "error" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Status => "status",
            Self::ToolStatus => "tool_status",
            Self::Token => "token",
            Self::AuxCaption => "aux_caption",
            Self::Metrics => "metrics",
            Self::Error => "error",
            Self::Unknown(name) => name,
        }
    }
}

/// One decoded frame. Consumed immediately by the dispatcher.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub enum Decoded {
    Frame(Frame),
    /// `[DONE]`: the producer has nothing more to say.
    Done,
}

impl RawFrame {
    pub fn decode(self) -> Result<Decoded, FrameError> {
        if self.data.trim() == DONE_MARKER {
            return Ok(Decoded::Done);
        }
        let payload = serde_json::from_str(&self.data)?;
        Ok(Decoded::Frame(Frame {
            kind: FrameKind::from_event(self.event.as_deref()),
            payload,
        }))
    }
}

/// `status` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    pub status: String,
    #[serde(default)]
    pub final_answer: Option<String>,
}

/// `token` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TokenPayload {
    Object { token: String },
    Bare(String),
}

impl TokenPayload {
    pub fn into_text(self) -> String {
        match self {
            Self::Object { token } | Self::Bare(token) => token,
        }
    }
}

/// `aux_caption` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionPayload {
    pub caption: String,
}

/// `tool_status` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolStatusPayload {
    pub tool_name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(deserialize_with = "flag")]
    pub is_start: bool,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
}

/// `metrics` payload. Missing fields read as zero.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricsPayload {
    #[serde(alias = "model_init_time")]
    pub model_init_seconds: f64,
    #[serde(alias = "agent_init_time")]
    pub agent_init_seconds: f64,
    #[serde(alias = "response_time")]
    pub response_seconds: f64,
    #[serde(alias = "recursion_limit_used", deserialize_with = "count")]
    pub recursion_count: u32,
}

/// `error` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    #[serde(alias = "message")]
    pub error: String,
}

/// Accept `1`/`0` as well as `true`/`false`.
fn flag<'de, D: serde::Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match Value::deserialize(d)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64().is_some_and(|n| n != 0)),
        other => Err(serde::de::Error::custom(format!(
            "expected bool or 0/1, got {other}"
        ))),
    }
}

/// Accept any JSON number; fractions truncate, negatives clamp to zero.
fn count<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(0),
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or(0.0);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let count = n.clamp(0.0, f64::from(u32::MAX)) as u32;
            Ok(count)
        }
        other => Err(serde::de::Error::custom(format!(
            "expected a number, got {other}"
        ))),
    }
}
