//! Block-aware reassembly of streamed token text.
//!
//! Token text may carry embedded blocks written as
//! `!#block#!{"type":...,"content":...}!#/block#!`. Characters are fed one at
//! a time; plain text comes out immediately, block spans come out rendered
//! once their end sentinel arrives. Every input character ends up in the
//! visible output, rendered or verbatim.

#[cfg(test)]
mod tests;

use crate::render::{Rendered, render_interior};
use std::fmt;

pub const START_SENTINEL: &str = "!#block#!";
pub const END_SENTINEL: &str = "!#/block#!";

/// One unit of visible output.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Block(Rendered),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Block(rendered) => write!(f, "{rendered}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Outside any block.
    Plain,
    /// Accumulating a candidate block.
    Buffering,
}

#[derive(Debug)]
pub struct Reassembler {
    state: State,
    /// Plain-state tail that is still a prefix of the start sentinel.
    held: String,
    /// Candidate block, start sentinel included.
    pending: String,
    pending_chars: usize,
    max_block_chars: usize,
    visible: Vec<Segment>,
}

impl Reassembler {
    pub fn new(max_block_chars: usize) -> Self {
        Self {
            state: State::Plain,
            held: String::new(),
            pending: String::new(),
            pending_chars: 0,
            max_block_chars,
            visible: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_buffering(&self) -> bool {
        self.state == State::Buffering
    }

    /// Text held back but not yet visible: sentinel prefix or open block.
    pub fn pending(&self) -> &str {
        match self.state {
            State::Plain => &self.held,
            State::Buffering => &self.pending,
        }
    }

    /// Everything emitted so far, adjacent text coalesced.
    pub fn visible(&self) -> &[Segment] {
        &self.visible
    }

    pub fn into_visible(self) -> Vec<Segment> {
        self.visible
    }

    /// Visible output flattened to terminal text.
    pub fn visible_text(&self) -> String {
        self.visible.iter().map(ToString::to_string).collect()
    }

    /// Feed a whole fragment. Equivalent to feeding its chars one by one.
    pub fn push_str(&mut self, fragment: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        for c in fragment.chars() {
            self.push_char(c, &mut out);
        }
        out
    }

    pub fn push_char(&mut self, c: char, out: &mut Vec<Segment>) {
        match self.state {
            State::Plain => self.plain_char(c, out),
            State::Buffering => self.buffering_char(c, out),
        }
    }

    fn plain_char(&mut self, c: char, out: &mut Vec<Segment>) {
        self.held.push(c);

        if self.held == START_SENTINEL {
            self.held.clear();
            self.pending.push_str(START_SENTINEL);
            self.pending_chars = START_SENTINEL.chars().count();
            self.state = State::Buffering;
            tracing::trace!("Block start sentinel");
            self.check_overflow(out);
            return;
        }

        let keep = partial_start_len(&self.held);
        if keep < self.held.len() {
            let released: String = self.held.drain(..self.held.len() - keep).collect();
            self.emit(Segment::Text(released), out);
        }
    }

    fn buffering_char(&mut self, c: char, out: &mut Vec<Segment>) {
        self.pending.push(c);
        self.pending_chars += 1;

        // The end sentinel must not reuse characters of the start sentinel.
        if self.pending.len() >= START_SENTINEL.len() + END_SENTINEL.len()
            && self.pending.ends_with(END_SENTINEL)
        {
            let interior =
                &self.pending[START_SENTINEL.len()..self.pending.len() - END_SENTINEL.len()];
            let rendered = render_interior(interior);
            tracing::debug!(
                block_chars = self.pending_chars,
                notice = rendered.is_notice(),
                "Block complete"
            );
            self.reset_pending();
            self.emit(Segment::Block(rendered), out);
            return;
        }

        self.check_overflow(out);
    }

    fn check_overflow(&mut self, out: &mut Vec<Segment>) {
        if self.pending_chars > self.max_block_chars {
            tracing::warn!(
                limit = self.max_block_chars,
                "Unterminated block exceeded limit, flushing verbatim"
            );
            let flushed = std::mem::take(&mut self.pending);
            self.reset_pending();
            self.emit(Segment::Text(flushed), out);
        }
    }

    /// End of input: flush held-back text and any open block verbatim.
    pub fn finish(&mut self, out: &mut Vec<Segment>) {
        if !self.held.is_empty() {
            let held = std::mem::take(&mut self.held);
            self.emit(Segment::Text(held), out);
        }
        if self.state == State::Buffering {
            tracing::debug!(
                pending_chars = self.pending_chars,
                "Stream ended inside a block, flushing verbatim"
            );
            let flushed = std::mem::take(&mut self.pending);
            self.reset_pending();
            self.emit(Segment::Text(flushed), out);
        }
    }

    fn reset_pending(&mut self) {
        self.pending.clear();
        self.pending_chars = 0;
        self.state = State::Plain;
    }

    fn emit(&mut self, segment: Segment, out: &mut Vec<Segment>) {
        match (&segment, self.visible.last_mut()) {
            (Segment::Text(text), Some(Segment::Text(last))) => last.push_str(text),
            _ => self.visible.push(segment.clone()),
        }
        out.push(segment);
    }
}

/// Length in bytes of the longest suffix of `s` that is a proper prefix of
/// the start sentinel.
fn partial_start_len(s: &str) -> usize {
    (0..s.len())
        .filter(|&i| s.is_char_boundary(i))
        .find(|&i| START_SENTINEL.starts_with(&s[i..]))
        .map_or(0, |i| s.len() - i)
}
