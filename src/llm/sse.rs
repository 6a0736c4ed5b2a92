//! Incremental decoder for `text/event-stream` response bodies
//!
//! Network reads split lines (and multi-byte characters) arbitrarily, so
//! bytes are buffered until a full line is available.

use std::collections::VecDeque;

/// A decoded `data:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    /// The `[DONE]` sentinel used by OpenAI-compatible servers
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every frame completed by them
    pub fn push(&mut self, bytes: &[u8]) -> VecDeque<SseFrame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = VecDeque::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(frame) = parse_line(&line) {
                frames.push_back(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Option<SseFrame> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    // Comments (": keep-alive"), event names and ids carry nothing we use
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        None
    } else if data == "[DONE]" {
        Some(SseFrame::Done)
    } else {
        Some(SseFrame::Data(data.to_string()))
    }
}
