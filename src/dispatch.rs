//! Frame dispatch.
//!
//! Status, tool and metrics frames update their display slots directly;
//! token and caption frames are handed back for the pacing queue.

use crate::frame::{
    CaptionPayload, ErrorPayload, Frame, FrameKind, MetricsPayload, StatusPayload, TokenPayload,
    ToolStatusPayload,
};
use crate::pacing::PacedItem;
use crate::present::PresentEvent;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPhase {
    Start,
    End,
}

/// One tool-status log entry. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationEvent {
    pub tool_name: String,
    pub phase: ToolPhase,
    pub input: Option<Value>,
    pub output: Option<Value>,
}

impl ToolInvocationEvent {
    /// Log line with a marker, the tool name and a capped preview of the
    /// input (start) or output (end).
    #[must_use]
    pub fn log_line(&self, preview_chars: usize) -> String {
        let (marker, detail) = match self.phase {
            ToolPhase::Start => ("▶", self.input.as_ref()),
            ToolPhase::End => ("■", self.output.as_ref()),
        };
        match detail.map(|v| preview(v, preview_chars)) {
            Some(text) if !text.is_empty() => format!("{marker} {} · {text}", self.tool_name),
            _ => format!("{marker} {}", self.tool_name),
        }
    }
}

/// Per-invocation timing sample. The latest one wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSample {
    pub model_init_seconds: f64,
    pub agent_init_seconds: f64,
    pub response_seconds: f64,
    pub recursion_count: u32,
}

impl From<MetricsPayload> for MetricsSample {
    fn from(p: MetricsPayload) -> Self {
        Self {
            model_init_seconds: p.model_init_seconds,
            agent_init_seconds: p.agent_init_seconds,
            response_seconds: p.response_seconds,
            recursion_count: p.recursion_count,
        }
    }
}

/// Dispatcher-owned half of a stream session.
///
/// The other half (visible text, pending block) belongs to the reassembler
/// inside the pacing drain task.
#[derive(Debug, Default)]
pub struct StreamSession {
    /// Every token fragment received, shown or not. Append-only.
    pub raw_text: String,
    pub caption_received: bool,
    pub caption: Option<String>,
    /// Diagnostic only; the token stream is authoritative.
    pub final_answer: Option<String>,
    pub status: Option<String>,
    pub tool_log: Vec<ToolInvocationEvent>,
    pub metrics: Option<MetricsSample>,
    pub suppressed_tokens: usize,
}

pub struct Dispatcher {
    session: StreamSession,
    events: mpsc::UnboundedSender<PresentEvent>,
}

impl Dispatcher {
    pub fn new(events: mpsc::UnboundedSender<PresentEvent>) -> Self {
        Self {
            session: StreamSession::default(),
            events,
        }
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn into_session(self) -> StreamSession {
        self.session
    }

    /// Route one frame. Returns the item to enqueue for pacing, if any.
    pub fn dispatch(&mut self, frame: Frame) -> Option<PacedItem> {
        let Frame { kind, payload: value } = frame;
        match &kind {
            FrameKind::Status => {
                let status: StatusPayload = payload(&kind, value)?;
                if let Some(answer) = status.final_answer {
                    debug!(chars = answer.chars().count(), "Final answer reported");
                    self.session.final_answer = Some(answer);
                }
                self.session.status = Some(status.status.clone());
                self.present(PresentEvent::Status(status.status));
                None
            }
            FrameKind::ToolStatus => {
                let tool: ToolStatusPayload = payload(&kind, value)?;
                let event = ToolInvocationEvent {
                    tool_name: tool.tool_name,
                    phase: if tool.is_start {
                        ToolPhase::Start
                    } else {
                        ToolPhase::End
                    },
                    input: tool.input,
                    output: tool.output,
                };
                debug!(tool = %event.tool_name, phase = ?event.phase, "Tool status");
                self.session.tool_log.push(event.clone());
                self.present(PresentEvent::Tool(event));
                None
            }
            FrameKind::Metrics => {
                let metrics: MetricsPayload = payload(&kind, value)?;
                let sample = MetricsSample::from(metrics);
                self.session.metrics = Some(sample.clone());
                self.present(PresentEvent::Metrics(sample));
                None
            }
            FrameKind::Token => {
                let token: TokenPayload = payload(&kind, value)?;
                let text = token.into_text();
                self.session.raw_text.push_str(&text);
                if self.session.caption_received {
                    self.session.suppressed_tokens += 1;
                    debug!(
                        suppressed = self.session.suppressed_tokens,
                        "Token ignored after auxiliary caption"
                    );
                    return None;
                }
                if text.is_empty() {
                    return None;
                }
                Some(PacedItem::Fragment(text))
            }
            FrameKind::AuxCaption => {
                let caption: CaptionPayload = payload(&kind, value)?;
                if self.session.caption_received {
                    debug!("Ignoring repeated auxiliary caption");
                    return None;
                }
                self.session.caption_received = true;
                self.session.caption = Some(caption.caption.clone());
                Some(PacedItem::Caption(caption.caption))
            }
            FrameKind::Error => {
                let error: ErrorPayload = payload(&kind, value)?;
                warn!("Producer reported error: {}", error.error);
                self.present(PresentEvent::ProducerError(error.error));
                None
            }
            FrameKind::Unknown(name) => {
                debug!(event = %name, "Ignoring unknown frame type");
                None
            }
        }
    }

    fn present(&self, event: PresentEvent) {
        if self.events.send(event).is_err() {
            debug!("Presentation channel closed");
        }
    }
}

/// Deserialize a frame payload, logging and dropping it on mismatch.
fn payload<T: DeserializeOwned>(kind: &FrameKind, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(event = kind.name(), "Dropping frame with malformed payload: {e}");
            None
        }
    }
}

/// First line of a value, capped at `max` chars.
fn preview(value: &Value, max: usize) -> String {
    let text = match value {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate_line(text.trim().lines().next().unwrap_or(""), max)
}

/// Truncate a line to max chars.
fn truncate_line(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    if max == 1 {
        return "…".to_string();
    }
    format!("{}…", s.chars().take(max - 1).collect::<String>())
}
