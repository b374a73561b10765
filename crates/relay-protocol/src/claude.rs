//! Anthropic Messages API wire shapes and their conversion to/from the
//! canonical `Exchange`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchange::{
    ContentPart, Exchange, ExchangeResponse, FinishReason, ImageSource, Message, Role, ToolDef,
    Usage,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeRequest {
    pub model: String,
    #[serde(default)]
    pub system: Option<ClaudeSystem>,
    pub messages: Vec<ClaudeMessage>,
    #[serde(default)]
    pub tools: Vec<ClaudeTool>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaudeSystem {
    Text(String),
    Blocks(Vec<ClaudeContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeMessage {
    pub role: ClaudeRole,
    pub content: ClaudeContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaudeRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaudeContent {
    Text(String),
    Blocks(Vec<ClaudeContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ClaudeImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeResponse {
    pub id: String,
    pub model: String,
    pub role: ClaudeRole,
    pub content: Vec<ClaudeContentBlock>,
    pub stop_reason: Option<ClaudeStopReason>,
    pub usage: ClaudeUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaudeStopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClaudeUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl From<ClaudeUsage> for Usage {
    fn from(u: ClaudeUsage) -> Self {
        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_input_tokens,
            cache_creation_tokens: u.cache_creation_input_tokens,
        }
    }
}

impl From<Usage> for ClaudeUsage {
    fn from(u: Usage) -> Self {
        ClaudeUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_input_tokens: u.cache_read_tokens,
            cache_creation_input_tokens: u.cache_creation_tokens,
        }
    }
}

fn block_to_part(block: ClaudeContentBlock) -> ContentPart {
    match block {
        ClaudeContentBlock::Text { text } => ContentPart::Text { text },
        ClaudeContentBlock::Image { source } => ContentPart::Image {
            source: match source {
                ClaudeImageSource::Base64 { media_type, data } => {
                    ImageSource::Base64 { media_type, data }
                }
                ClaudeImageSource::Url { url } => ImageSource::Url { url },
            },
        },
        ClaudeContentBlock::ToolUse { id, name, input } => ContentPart::ToolCall {
            id,
            name,
            arguments: input,
        },
        ClaudeContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentPart::ToolResult {
            tool_call_id: tool_use_id,
            content,
            is_error,
        },
        ClaudeContentBlock::Thinking { thinking } => ContentPart::Thinking { text: thinking },
    }
}

fn part_to_block(part: ContentPart) -> ClaudeContentBlock {
    match part {
        ContentPart::Text { text } => ClaudeContentBlock::Text { text },
        ContentPart::Image { source } => ClaudeContentBlock::Image {
            source: match source {
                ImageSource::Base64 { media_type, data } => {
                    ClaudeImageSource::Base64 { media_type, data }
                }
                ImageSource::Url { url } => ClaudeImageSource::Url { url },
            },
        },
        ContentPart::ToolCall { id, name, arguments } => ClaudeContentBlock::ToolUse {
            id,
            name,
            input: arguments,
        },
        ContentPart::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => ClaudeContentBlock::ToolResult {
            tool_use_id: tool_call_id,
            content,
            is_error,
        },
        ContentPart::Thinking { text } => ClaudeContentBlock::Thinking { thinking: text },
    }
}

fn blocks_of(content: ClaudeContent) -> Vec<ClaudeContentBlock> {
    match content {
        ClaudeContent::Text(text) => vec![ClaudeContentBlock::Text { text }],
        ClaudeContent::Blocks(blocks) => blocks,
    }
}

impl From<ClaudeRequest> for Exchange {
    fn from(req: ClaudeRequest) -> Self {
        let system = req.system.map(|s| match s {
            ClaudeSystem::Text(text) => text,
            ClaudeSystem::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|b| match b {
                    ClaudeContentBlock::Text { text } => Some(text),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        });

        let messages = req
            .messages
            .into_iter()
            .map(|m| Message {
                role: match m.role {
                    ClaudeRole::User => Role::User,
                    ClaudeRole::Assistant => Role::Assistant,
                },
                content: blocks_of(m.content).into_iter().map(block_to_part).collect(),
            })
            .collect();

        let tools = req
            .tools
            .into_iter()
            .map(|t| ToolDef {
                name: t.name,
                description: t.description,
                parameters: t.input_schema,
            })
            .collect();

        Exchange {
            model: req.model,
            system,
            messages,
            tools,
            stop_sequences: req.stop_sequences,
            max_tokens: Some(req.max_tokens),
            temperature: req.temperature,
            stream: req.stream,
        }
    }
}

impl From<Exchange> for ClaudeRequest {
    fn from(ex: Exchange) -> Self {
        ClaudeRequest {
            model: ex.model,
            system: ex.system.map(ClaudeSystem::Text),
            messages: ex
                .messages
                .into_iter()
                .map(|m| ClaudeMessage {
                    role: match m.role {
                        Role::Assistant => ClaudeRole::Assistant,
                        _ => ClaudeRole::User,
                    },
                    content: ClaudeContent::Blocks(
                        m.content.into_iter().map(part_to_block).collect(),
                    ),
                })
                .collect(),
            tools: ex
                .tools
                .into_iter()
                .map(|t| ClaudeTool {
                    name: t.name,
                    description: t.description,
                    input_schema: t.parameters,
                })
                .collect(),
            stop_sequences: ex.stop_sequences,
            max_tokens: ex.max_tokens.unwrap_or(4096),
            temperature: ex.temperature,
            stream: ex.stream,
        }
    }
}

impl From<FinishReason> for ClaudeStopReason {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => ClaudeStopReason::EndTurn,
            FinishReason::Length => ClaudeStopReason::MaxTokens,
            FinishReason::ToolCalls => ClaudeStopReason::ToolUse,
            FinishReason::ContentFilter | FinishReason::Other => ClaudeStopReason::EndTurn,
        }
    }
}

impl From<ClaudeStopReason> for FinishReason {
    fn from(reason: ClaudeStopReason) -> Self {
        match reason {
            ClaudeStopReason::EndTurn => FinishReason::Stop,
            ClaudeStopReason::MaxTokens => FinishReason::Length,
            ClaudeStopReason::ToolUse => FinishReason::ToolCalls,
            ClaudeStopReason::StopSequence => FinishReason::Stop,
        }
    }
}

impl From<ExchangeResponse> for ClaudeResponse {
    fn from(resp: ExchangeResponse) -> Self {
        ClaudeResponse {
            id: resp.id,
            model: resp.model,
            role: ClaudeRole::Assistant,
            content: resp.content.into_iter().map(part_to_block).collect(),
            stop_reason: resp.finish_reason.map(Into::into),
            usage: resp.usage.into(),
        }
    }
}

impl From<ClaudeResponse> for ExchangeResponse {
    fn from(resp: ClaudeResponse) -> Self {
        ExchangeResponse {
            id: resp.id,
            model: resp.model,
            content: resp.content.into_iter().map(block_to_part).collect(),
            finish_reason: resp.stop_reason.map(Into::into),
            usage: resp.usage.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_tool_use_and_image() {
        let request = ClaudeRequest {
            model: "claude-opus".into(),
            system: Some(ClaudeSystem::Text("be terse".into())),
            messages: vec![ClaudeMessage {
                role: ClaudeRole::User,
                content: ClaudeContent::Blocks(vec![
                    ClaudeContentBlock::Text {
                        text: "what's in this image?".into(),
                    },
                    ClaudeContentBlock::Image {
                        source: ClaudeImageSource::Base64 {
                            media_type: "image/png".into(),
                            data: "Zm9v".into(),
                        },
                    },
                ]),
            }],
            tools: vec![ClaudeTool {
                name: "lookup".into(),
                description: None,
                input_schema: serde_json::json!({"type": "object"}),
            }],
            stop_sequences: vec![],
            max_tokens: 1024,
            temperature: None,
            stream: false,
        };

        let exchange: Exchange = request.into();
        assert_eq!(exchange.system.as_deref(), Some("be terse"));
        assert_eq!(exchange.messages[0].content.len(), 2);
        assert_eq!(exchange.tools.len(), 1);

        let back: ClaudeRequest = exchange.into();
        assert_eq!(back.max_tokens, 1024);
        assert_eq!(back.messages.len(), 1);
    }

    #[test]
    fn stop_reason_maps_tool_use_both_ways() {
        let canonical: FinishReason = ClaudeStopReason::ToolUse.into();
        assert_eq!(canonical, FinishReason::ToolCalls);
        let back: ClaudeStopReason = canonical.into();
        assert_eq!(back, ClaudeStopReason::ToolUse);
    }
}
