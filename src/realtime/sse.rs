//! Incremental server-sent-events decoder
//!
//! Feeds on raw body chunks and yields complete events at blank-line
//! boundaries. Chunks may split lines anywhere, so the decoder buffers
//! partial lines across calls. Only the `event:` and `data:` fields are
//! interpreted; `id:`, `retry:` and comment lines are skipped.

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if the server named the event
    pub event: Option<String>,
    /// The `data:` field; multi-line data is joined with `\n`
    pub data: String,
}

/// Stateful decoder over a byte stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one body chunk and return any events it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else {
                self.field(line);
            }
        }
        events
    }

    /// Blank line: dispatch the accumulated event, if any.
    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.event_name.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: self.event_name.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(event)
    }

    fn field(&mut self, line: &str) {
        // Comment line
        if line.starts_with(':') {
            return;
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match name {
            "event" => self.event_name = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
    }
}
