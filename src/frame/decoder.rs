//! Incremental event-stream frame splitter.
//!
//! Frames are blocks of `field:value` lines terminated by a blank line.
//! Input arrives in arbitrary byte increments; nothing is decoded until its
//! terminator has been seen.

/// One undecoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Event type (last `event:` line), if present.
    pub event: Option<String>,
    /// Payload (last `data:` line).
    pub data: String,
}

/// Incremental frame parser.
///
/// Buffers partial frames and partial UTF-8 sequences between calls.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    utf8_tail: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every frame it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.push_bytes(chunk);
        self.drain_frames()
    }

    fn push_bytes(&mut self, chunk: &[u8]) {
        self.utf8_tail.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.utf8_tail);

        match std::str::from_utf8(&bytes) {
            Ok(text) => self.buffer.push_str(text),
            Err(e) if e.error_len().is_none() => {
                // Truncated sequence at the end: keep it for the next chunk.
                let valid = e.valid_up_to();
                self.buffer
                    .push_str(&String::from_utf8_lossy(&bytes[..valid]));
                self.utf8_tail = bytes[valid..].to_vec();
            }
            Err(_) => {
                let valid = bytes.len() - incomplete_suffix_len(&bytes);
                self.buffer
                    .push_str(&String::from_utf8_lossy(&bytes[..valid]));
                self.utf8_tail = bytes[valid..].to_vec();
            }
        }
    }

    fn drain_frames(&mut self) -> Vec<RawFrame> {
        let mut frames = Vec::new();

        while let Some((pos, len)) = find_terminator(&self.buffer) {
            let frame_text: String = self.buffer.drain(..pos + len).collect();

            if let Some(frame) = Self::parse_frame(&frame_text[..pos]) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Parse the lines of one frame. Last `event:` and last `data:` win.
    fn parse_frame(text: &str) -> Option<RawFrame> {
        let mut event = None;
        let mut data = None;

        for line in text.lines() {
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                data = Some(value.trim_start().to_string());
            }
        }

        Some(RawFrame { event, data: data? })
    }

    /// Discard buffered state, returning true if an unterminated frame was
    /// left behind.
    pub fn finish(&mut self) -> bool {
        let had_pending = self.has_pending();
        if had_pending {
            tracing::debug!(
                pending_chars = self.buffer.chars().count(),
                "Discarding unterminated trailing frame"
            );
        }
        self.buffer.clear();
        self.utf8_tail.clear();
        had_pending
    }

    /// Check if there's pending data in the buffer.
    pub fn has_pending(&self) -> bool {
        !self.buffer.trim().is_empty() || !self.utf8_tail.is_empty()
    }
}

/// Earliest blank-line terminator: (offset, terminator length).
fn find_terminator(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|p| (p, 2));
    let crlf = buffer.find("\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// Length of a trailing, possibly incomplete, UTF-8 sequence (0..=3).
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    for back in 1..=3.min(bytes.len()) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        return if needed > back { back } else { 0 };
    }
    0
}
