//! Generic Server-Sent-Events framing (spec §4.9: "two distinct framings,
//! SSE `data:` lines and a Gemini-style JSON array").
//!
//! This is a line-oriented incremental parser: push raw upstream bytes in
//! with [`SseParser::push`], drain complete [`SseEvent`]s as they become
//! available. It does not know about any particular dialect's JSON payload
//! shape — that is layered on top by the Stream Processor.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
    pending_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed in a raw chunk and return any events completed by it. Partial
    /// lines at the end of `chunk` are retained for the next call.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        loop {
            let Some(newline_at) = self.buffer.find('\n') else {
                break;
            };
            let line: String = self.buffer.drain(..=newline_at).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.pending_data.is_empty() || self.pending_event.is_some() {
                    events.push(SseEvent {
                        event: self.pending_event.take(),
                        data: self.pending_data.join("\n"),
                        id: self.pending_id.take(),
                    });
                    self.pending_data.clear();
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("data:") {
                self.pending_data.push(rest.trim_start().to_string());
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.pending_event = Some(rest.trim_start().to_string());
            } else if let Some(rest) = line.strip_prefix("id:") {
                self.pending_id = Some(rest.trim_start().to_string());
            }
            // Comment lines (`:`) and unknown fields are ignored per the SSE spec.
        }

        events
    }

    /// Whether a terminal `data: [DONE]` sentinel (OpenAI's convention) has
    /// ever been observed; callers check this after each `push`.
    pub fn is_done_marker(event: &SseEvent) -> bool {
        event.data.trim() == "[DONE]"
    }
}

pub fn format_event(event: &SseEvent) -> String {
    let mut out = String::new();
    if let Some(name) = &event.event {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    for line in event.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push("event: message_start\ndata: {\"id\"").is_empty());
        let events = parser.push(":\"1\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{\"id\":\"1\"}");
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut parser = SseParser::new();
        let events = parser.push("data: [DONE]\n\n");
        assert!(SseParser::is_done_marker(&events[0]));
    }

    #[test]
    fn multiline_data_fields_join_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.push("data: line one\ndata: line two\n\n");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn format_event_round_trips_through_parser() {
        let event = SseEvent {
            event: Some("content_delta".into()),
            data: "{\"text\":\"hi\"}".into(),
            id: None,
        };
        let wire = format_event(&event);
        let mut parser = SseParser::new();
        let parsed = parser.push(&wire);
        assert_eq!(parsed[0], event);
    }
}
