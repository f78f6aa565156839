use super::{PresentEvent, Surface};
use crate::config::DisplayConfig;
use crate::dispatch::MetricsSample;
use crate::reassemble::Segment;
use crate::render::Rendered;
use crossterm::style::Stylize;
use std::io::{self, Write};

/// Writes streamed output inline and slot updates on their own dim lines.
pub struct TerminalSurface<W: Write> {
    out: W,
    display: DisplayConfig,
    at_line_start: bool,
    last_status: Option<String>,
}

impl TerminalSurface<io::Stdout> {
    pub fn stdout(display: DisplayConfig) -> Self {
        Self::new(io::stdout(), display)
    }
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W, display: DisplayConfig) -> Self {
        Self {
            out,
            display,
            at_line_start: true,
            last_status: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn break_line(&mut self) -> io::Result<()> {
        if !self.at_line_start {
            writeln!(self.out)?;
            self.at_line_start = true;
        }
        Ok(())
    }

    fn line(&mut self, text: impl std::fmt::Display) -> io::Result<()> {
        self.break_line()?;
        writeln!(self.out, "{text}")?;
        self.at_line_start = true;
        Ok(())
    }

    fn segment(&mut self, segment: &Segment) -> io::Result<()> {
        match segment {
            Segment::Text(text) => {
                write!(self.out, "{text}")?;
                if !text.is_empty() {
                    self.at_line_start = text.ends_with('\n');
                }
                Ok(())
            }
            Segment::Block(rendered) => {
                let text = rendered.to_string();
                match rendered {
                    Rendered::Invalid { .. } | Rendered::Error(_) | Rendered::Unsupported(_) => {
                        self.line(text.yellow())
                    }
                    Rendered::Media { .. } => self.line(text.cyan()),
                    Rendered::RawMarkup(markup) => {
                        if markup.inert_script_count() > 0 {
                            tracing::debug!(
                                scripts = markup.inert_script_count(),
                                "Markup scripts left inert"
                            );
                        }
                        self.line(text)
                    }
                    _ => self.line(text),
                }
            }
        }
    }
}

fn format_metrics(m: &MetricsSample) -> String {
    format!(
        "model init {:.2}s · agent init {:.2}s · response {:.2}s · recursion {}",
        m.model_init_seconds, m.agent_init_seconds, m.response_seconds, m.recursion_count
    )
}

impl<W: Write> Surface for TerminalSurface<W> {
    fn present(&mut self, event: PresentEvent) -> io::Result<()> {
        match event {
            PresentEvent::Started {
                agent_id,
                thread_id,
            } => {
                self.last_status = None;
                self.line(format!("agent {agent_id} · thread {thread_id}").dim())?;
            }
            PresentEvent::Status(status) => {
                if self.last_status.as_deref() != Some(status.as_str()) {
                    self.line(format!("· {status}").dim())?;
                    self.last_status = Some(status);
                }
            }
            PresentEvent::Tool(tool) => {
                let line = tool.log_line(self.display.tool_preview_chars);
                self.line(line.dark_grey())?;
            }
            PresentEvent::Metrics(metrics) => self.line(format_metrics(&metrics).dim())?,
            PresentEvent::Caption(caption) => {
                self.line(format!("[image analysis] {caption}").italic())?;
            }
            PresentEvent::Segment(segment) => self.segment(&segment)?,
            PresentEvent::ProducerError(msg) => self.line(format!("⚠ {msg}").yellow())?,
            PresentEvent::Failed(msg) => self.line(format!("✗ {msg}").red())?,
            PresentEvent::Finished => self.break_line()?,
        }
        self.out.flush()
    }
}
