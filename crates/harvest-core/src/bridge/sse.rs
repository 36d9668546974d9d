//! Server-sent events framing for the bridge's `/events` stream.
//!
//! Events are separated by blank lines. Each event can contain `id:`,
//! `event:`, `data:` and `retry:` fields; multiple `data:` lines are joined
//! with `\n`. Lines starting with `:` are comments. Lines may end in
//! `\n`, `\r\n` or a bare `\r`.

/// A parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `id:` field.
    pub id: Option<String>,
    /// The `event:` field (event type).
    pub event: Option<String>,
    /// The `data:` field (accumulated across multiple `data:` lines).
    pub data: String,
}

impl SseEvent {
    /// Events with no explicit type default to `message`.
    pub fn is_message(&self) -> bool {
        self.event.as_deref().is_none_or(|e| e == "message")
    }
}

/// Parse one blank-line-delimited event block. `None` when it has no data.
fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut has_data = false;

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.find(':') {
            Some(colon) => {
                let raw = &line[colon + 1..];
                (&line[..colon], raw.strip_prefix(' ').unwrap_or(raw))
            }
            None => (line, ""),
        };

        match field {
            "id" => event.id = Some(value.to_string()),
            "event" => event.event = Some(value.to_string()),
            "data" => {
                if has_data {
                    event.data.push('\n');
                }
                event.data.push_str(value);
                has_data = true;
            }
            // `retry` and unknown fields are ignored.
            _ => {}
        }
    }

    has_data.then_some(event)
}

/// Parse a complete SSE text into events.
pub fn parse_sse_events(text: &str) -> Vec<SseEvent> {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split("\n\n")
        .filter_map(parse_block)
        .collect()
}

/// Incremental decoder for a chunked SSE body.
///
/// Chunk boundaries may fall anywhere, including inside a UTF-8 sequence
/// or between the two bytes of a `\r\n`. Line endings are normalised to
/// `\n` on the way in and bytes are buffered until a full event block is
/// available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already searched for a block boundary.
    scanned: usize,
    /// The previous byte was a `\r`, so a leading `\n` is part of it.
    pending_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.reserve(chunk.len());
        for &byte in chunk {
            match byte {
                b'\r' => {
                    self.buf.push(b'\n');
                    self.pending_cr = true;
                }
                b'\n' if self.pending_cr => self.pending_cr = false,
                _ => {
                    self.buf.push(byte);
                    self.pending_cr = false;
                }
            }
        }

        let mut events = Vec::new();
        while let Some(end) = self.next_boundary() {
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            self.scanned = 0;
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        // The last byte may be the first half of a boundary.
        self.scanned = self.buf.len().saturating_sub(1);
        events
    }

    fn next_boundary(&self) -> Option<usize> {
        self.buf[self.scanned..]
            .windows(2)
            .position(|w| w == b"\n\n")
            .map(|pos| self.scanned + pos)
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        self.pending_cr = false;
        parse_block(&String::from_utf8_lossy(&rest))
    }
}
