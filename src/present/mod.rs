//! Presentation surface.
//!
//! Everything visible flows through one `PresentEvent` channel so a single
//! consumer owns the output.

mod terminal;

pub use terminal::TerminalSurface;

use crate::dispatch::{MetricsSample, ToolInvocationEvent};
use crate::reassemble::Segment;
use std::io;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum PresentEvent {
    Started { agent_id: String, thread_id: String },
    /// Current status slot.
    Status(String),
    /// Tool log entry.
    Tool(ToolInvocationEvent),
    /// Metrics slot.
    Metrics(MetricsSample),
    /// Auxiliary caption, shown once ahead of later output.
    Caption(String),
    /// Paced text or a rendered block.
    Segment(Segment),
    /// Producer-reported error; the stream continues.
    ProducerError(String),
    /// Transport fault; the invocation is over.
    Failed(String),
    Finished,
}

pub trait Surface {
    fn present(&mut self, event: PresentEvent) -> io::Result<()>;
}

/// Feed events to `surface` until every sender is gone.
pub async fn run_surface<S: Surface>(
    mut rx: mpsc::UnboundedReceiver<PresentEvent>,
    mut surface: S,
) -> io::Result<S> {
    while let Some(event) = rx.recv().await {
        surface.present(event)?;
    }
    Ok(surface)
}
