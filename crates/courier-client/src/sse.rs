//! Incremental SSE parsing.
//!
//! The broker frames each event as `id:`, `data:` and an advisory
//! `partition:` line followed by a blank line. Chunks arrive at arbitrary
//! byte boundaries, so the parser buffers raw bytes and only converts
//! complete lines; a multi-byte character split across chunks is never
//! decoded early.

/// One parsed event. `data` carries the message JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub id: String,
    pub data: String,
}

/// Stateful parser fed with response-body chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    current_id: Option<String>,
    current_data: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            self.handle_line(line, &mut events);
        }
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            // blank line terminates the event; emit only if complete
            if let (Some(id), Some(data)) = (self.current_id.take(), self.current_data.take()) {
                events.push(SseEvent { id, data });
            }
            self.current_id = None;
            self.current_data = None;
            return;
        }
        if let Some(value) = line.strip_prefix("id: ") {
            self.current_id = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("data: ") {
            self.current_data = Some(value.to_string());
        }
        // `partition:` and any unknown fields are advisory; skip them
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = "id: abc123\ndata: {\"payload\":\"hi\"}\npartition: 0\n\n";

    #[test]
    fn test_single_event_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.feed(FRAME.as_bytes());
        assert_eq!(
            events,
            vec![SseEvent {
                id: "abc123".to_string(),
                data: "{\"payload\":\"hi\"}".to_string(),
            }]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        let bytes = FRAME.as_bytes();
        let mut events = Vec::new();
        // two-byte chunks exercise every split point, including mid-line
        for chunk in bytes.chunks(2) {
            events.extend(parser.feed(chunk));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "abc123");
    }

    #[test]
    fn test_multibyte_payload_split_mid_character() {
        let frame = "id: x\ndata: {\"payload\":\"héllo wörld ✓\"}\n\n";
        let bytes = frame.as_bytes();
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for chunk in bytes.chunks(3) {
            events.extend(parser.feed(chunk));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"payload\":\"héllo wörld ✓\"}");
    }

    #[test]
    fn test_multiple_events_one_chunk() {
        let two = format!("{}{}", FRAME, "id: def456\ndata: {}\npartition: 1\n\n");
        let mut parser = SseParser::new();
        let events = parser.feed(two.as_bytes());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "abc123");
        assert_eq!(events[1].id, "def456");
    }

    #[test]
    fn test_incomplete_event_not_emitted() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"id: abc\ndata: {}\n").is_empty());
        // terminator arrives later
        let events = parser.feed(b"\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_blank_line_without_fields_is_noise() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"\n\n\n").is_empty());
    }

    #[test]
    fn test_data_without_id_discarded() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {}\n\n").is_empty());
        // parser state reset; the next full event still parses
        let events = parser.feed(FRAME.as_bytes());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_crlf_tolerated() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"id: a\r\ndata: {}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "a");
        assert_eq!(events[0].data, "{}");
    }
}
