//! Incremental parser for Gemini's non-SSE streaming framing: a single JSON
//! array of response objects, written progressively as
//! `[obj1,\nobj2,\n...obj3]` with no per-chunk delimiter guarantee (spec
//! §4.9's "two distinct framings").
//!
//! Because the array isn't newline-delimited in any guaranteed way, this
//! parser tracks bracket/string/escape state character-by-character and
//! yields each top-level array element as soon as its closing brace is seen.

use serde_json::Value;

#[derive(Debug, Default)]
pub struct JsonArrayStreamParser {
    buffer: String,
    depth: i32,
    in_string: bool,
    escape_next: bool,
    started: bool,
    element_start: Option<usize>,
}

impl JsonArrayStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk; returns fully-buffered top-level JSON objects found
    /// within it. Unparseable trailing fragments stay buffered.
    pub fn push(&mut self, chunk: &str) -> Vec<Value> {
        self.buffer.push_str(chunk);
        let mut completed = Vec::new();

        let chars: Vec<char> = self.buffer.chars().collect();
        let mut cursor = 0usize;

        while cursor < chars.len() {
            let c = chars[cursor];

            if self.escape_next {
                self.escape_next = false;
                cursor += 1;
                continue;
            }

            match c {
                '\\' if self.in_string => self.escape_next = true,
                '"' => self.in_string = !self.in_string,
                '[' if !self.in_string && !self.started => {
                    self.started = true;
                }
                '{' if !self.in_string => {
                    if self.depth == 0 {
                        self.element_start = Some(cursor);
                    }
                    self.depth += 1;
                }
                '}' if !self.in_string => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        if let Some(start) = self.element_start.take() {
                            let text: String = chars[start..=cursor].iter().collect();
                            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                completed.push(value);
                            }
                        }
                    }
                }
                ']' if !self.in_string && self.depth == 0 => {
                    // end of the top-level array; nothing left to parse
                }
                _ => {}
            }
            cursor += 1;
        }

        // retain only the unconsumed tail (from the last incomplete element
        // start, or nothing if we are between elements) to bound memory use.
        if let Some(start) = self.element_start {
            let retained: String = chars[start..].iter().collect();
            self.buffer = retained;
            self.element_start = Some(0);
        } else {
            self.buffer.clear();
        }

        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_objects_split_across_chunks() {
        let mut parser = JsonArrayStreamParser::new();
        let first = parser.push("[{\"a\":1},");
        assert_eq!(first, vec![serde_json::json!({"a": 1})]);
        let values = parser.push("{\"b\":2}]");
        assert_eq!(values, vec![serde_json::json!({"b": 2})]);
    }

    #[test]
    fn handles_string_values_containing_braces() {
        let mut parser = JsonArrayStreamParser::new();
        let values = parser.push(r#"[{"text":"a } brace"}]"#);
        assert_eq!(values, vec![serde_json::json!({"text": "a } brace"})]);
    }

    #[test]
    fn splits_mid_object_then_resumes() {
        let mut parser = JsonArrayStreamParser::new();
        assert!(parser.push(r#"[{"text":"hel"#).is_empty());
        let values = parser.push(r#"lo"}]"#);
        assert_eq!(values, vec![serde_json::json!({"text": "hello"})]);
    }
}
