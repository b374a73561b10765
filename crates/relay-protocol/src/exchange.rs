//! Canonical intermediate representation every wire dialect converts
//! through. The Protocol Converter Registry (spec §4.10) pivots
//! `WireFormat -> Exchange -> WireFormat` instead of writing one bespoke
//! transform per ordered pair of dialects; this is the "universal" layer
//! pattern used by multi-provider LLM gateways generally (see e.g. the
//! `universal` module in the agentgateway example), adapted to this
//! workspace's four dialects.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of message content. Spec §4.10 requires round-tripping
/// text/image/tool_use/tool_result/function_call/function_response across
/// dialects; `ToolCall`/`ToolResult` here are the dialect-neutral names for
/// the OpenAI `function_call`/`function_response` pair and the Gemini
/// `functionCall`/`functionResponse` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// `data:<mime>;base64,<...>` or a remote URL — dialects differ on
        /// which they accept; the converter for the target dialect decides.
        source: ImageSource,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
    Thinking {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// A single requested tool invocation, surfaced separately from
/// `ContentPart::ToolCall` for callers that want the flat list (mirrors how
/// OpenAI's `tool_calls` array and Gemini's repeated `functionCall` parts
/// both get flattened the same way by every dialect's converter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl Usage {
    /// "Defensive update" (spec §4.9 / testable property 3): a later value of
    /// zero (or a missing field, modeled here as zero) never overwrites a
    /// previously non-zero counter.
    pub fn defensive_merge(&mut self, update: Usage) {
        merge_counter(&mut self.input_tokens, update.input_tokens);
        merge_counter(&mut self.output_tokens, update.output_tokens);
        merge_counter(&mut self.cache_read_tokens, update.cache_read_tokens);
        merge_counter(&mut self.cache_creation_tokens, update.cache_creation_tokens);
    }
}

fn merge_counter(current: &mut u64, update: u64) {
    if update > 0 {
        *current = update;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDef>,
    pub stop_sequences: Vec<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentPart>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
}

/// A parsed, dialect-neutral streaming event. The Stream Processor (§4.9)
/// produces these from raw upstream frames; the registry's
/// `convert_stream_chunk` operates on them before final dialect re-encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExchangeStreamEvent {
    MessageStart { id: String, model: String },
    ContentDelta { index: usize, part: ContentPartDelta },
    MessageDelta { finish_reason: Option<FinishReason> },
    Usage { usage: Usage },
    MessageStop,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentPartDelta {
    TextDelta(String),
    ToolCallDelta {
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    ThinkingDelta(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defensive_merge_never_clobbers_with_zero() {
        let mut usage = Usage {
            input_tokens: 42,
            output_tokens: 10,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
        };
        usage.defensive_merge(Usage {
            input_tokens: 0,
            output_tokens: 15,
            cache_read_tokens: 7,
            cache_creation_tokens: 0,
        });
        assert_eq!(usage.input_tokens, 42, "zero update must not clobber non-zero");
        assert_eq!(usage.output_tokens, 15, "positive update overwrites");
        assert_eq!(usage.cache_read_tokens, 7);
        assert_eq!(usage.cache_creation_tokens, 0);
    }

    #[test]
    fn text_content_concatenates_text_parts_only() {
        let message = Message {
            role: Role::Assistant,
            content: vec![
                ContentPart::Text { text: "hello ".into() },
                ContentPart::ToolCall {
                    id: "1".into(),
                    name: "f".into(),
                    arguments: serde_json::json!({}),
                },
                ContentPart::Text { text: "world".into() },
            ],
        };
        assert_eq!(message.text_content(), "hello world");
    }
}
