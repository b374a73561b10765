//! OpenAI Chat Completions `chat.completion.chunk` streaming shape, and its
//! bridge to [`ExchangeStreamEvent`]. Grounded in the teacher's
//! `create_chat_completions::stream` chunk/delta types.

use relay_protocol::{ContentPartDelta, ExchangeStreamEvent, FinishReason, Usage};
use serde::{Deserialize, Serialize};

use crate::registry::TransformError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    #[serde(default = "default_object")]
    pub object: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatCompletionUsage>,
}

fn default_object() -> String {
    "chat.completion.chunk".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChatChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCallDelta>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub function: ChatToolCallFunctionDelta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatToolCallFunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_tokens_details: ChatPromptTokensDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatPromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

impl From<ChatCompletionUsage> for Usage {
    fn from(u: ChatCompletionUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_read_tokens: u.prompt_tokens_details.cached_tokens,
            cache_creation_tokens: 0,
        }
    }
}

impl From<Usage> for ChatCompletionUsage {
    fn from(u: Usage) -> Self {
        ChatCompletionUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            prompt_tokens_details: ChatPromptTokensDetails {
                cached_tokens: u.cache_read_tokens,
            },
        }
    }
}

fn finish_reason_to_wire(reason: FinishReason) -> String {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::Other => "stop",
    }
    .to_string()
}

fn finish_reason_from_wire(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

pub fn decode(chunk: ChatCompletionChunk) -> Vec<ExchangeStreamEvent> {
    let mut out = Vec::new();
    if !chunk.id.is_empty() {
        out.push(ExchangeStreamEvent::MessageStart {
            id: chunk.id,
            model: chunk.model,
        });
    }
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            out.push(ExchangeStreamEvent::ContentDelta {
                index: choice.index as usize,
                part: ContentPartDelta::TextDelta(content),
            });
        }
        for tool_call in choice.delta.tool_calls.into_iter().flatten() {
            out.push(ExchangeStreamEvent::ContentDelta {
                index: tool_call.index,
                part: ContentPartDelta::ToolCallDelta {
                    id: tool_call.id,
                    name: tool_call.function.name,
                    arguments_delta: tool_call.function.arguments,
                },
            });
        }
        if let Some(reason) = choice.finish_reason {
            out.push(ExchangeStreamEvent::MessageDelta {
                finish_reason: Some(finish_reason_from_wire(&reason)),
            });
        }
    }
    if let Some(usage) = chunk.usage {
        out.push(ExchangeStreamEvent::Usage {
            usage: usage.into(),
        });
    }
    out
}

pub fn decode_json(value: serde_json::Value) -> Result<Vec<ExchangeStreamEvent>, TransformError> {
    let chunk: ChatCompletionChunk =
        serde_json::from_value(value).map_err(|e| TransformError::Decode(e.to_string()))?;
    Ok(decode(chunk))
}

/// Stateful: OpenAI chunk `id`/`model` and the tool-call `type` field are
/// only known once, at `MessageStart` / the first delta for an index.
#[derive(Debug, Default)]
pub struct OpenAiChatStreamEncoder {
    id: String,
    model: String,
    role_sent: bool,
    seen_tool_index: std::collections::HashSet<usize>,
}

impl OpenAiChatStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, event: &ExchangeStreamEvent) -> Vec<ChatCompletionChunk> {
        match event {
            ExchangeStreamEvent::MessageStart { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
                self.role_sent = true;
                vec![self.chunk(ChatChunkDelta {
                    role: Some("assistant".to_string()),
                    ..Default::default()
                })]
            }
            ExchangeStreamEvent::ContentDelta { index, part } => match part {
                ContentPartDelta::TextDelta(text) => vec![self.chunk(ChatChunkDelta {
                    content: Some(text.clone()),
                    ..Default::default()
                })],
                ContentPartDelta::ToolCallDelta {
                    id,
                    name,
                    arguments_delta,
                } => {
                    let first = self.seen_tool_index.insert(*index);
                    vec![self.chunk(ChatChunkDelta {
                        tool_calls: Some(vec![ChatToolCallDelta {
                            index: *index,
                            id: if first { id.clone() } else { None },
                            kind: if first { Some("function".to_string()) } else { None },
                            function: ChatToolCallFunctionDelta {
                                name: if first { name.clone() } else { None },
                                arguments: arguments_delta.clone(),
                            },
                        }]),
                        ..Default::default()
                    })]
                }
                ContentPartDelta::ThinkingDelta(_) => Vec::new(),
            },
            ExchangeStreamEvent::MessageDelta { finish_reason } => {
                vec![self.chunk_with_finish(finish_reason.map(finish_reason_to_wire))]
            }
            ExchangeStreamEvent::Usage { usage } => {
                let mut chunk = self.chunk_with_finish(None);
                chunk.choices.clear();
                chunk.usage = Some((*usage).into());
                vec![chunk]
            }
            ExchangeStreamEvent::MessageStop => Vec::new(),
            ExchangeStreamEvent::Error { .. } => Vec::new(),
        }
    }

    fn chunk(&self, delta: ChatChunkDelta) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: default_object(),
            model: self.model.clone(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }

    fn chunk_with_finish(&self, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: default_object(),
            model: self.model.clone(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatChunkDelta::default(),
                finish_reason,
            }],
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_text_delta_chunk() {
        let chunk = ChatCompletionChunk {
            id: "chatcmpl_1".into(),
            object: default_object(),
            model: "gpt-4o-mini".into(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatChunkDelta {
                    content: Some("hi".into()),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let events = decode(chunk);
        assert!(events.iter().any(|e| matches!(
            e,
            ExchangeStreamEvent::ContentDelta {
                part: ContentPartDelta::TextDelta(t),
                ..
            } if t == "hi"
        )));
    }

    #[test]
    fn encoder_only_sends_tool_name_on_first_delta() {
        let mut encoder = OpenAiChatStreamEncoder::new();
        encoder.encode(&ExchangeStreamEvent::MessageStart {
            id: "chatcmpl_1".into(),
            model: "gpt-4o-mini".into(),
        });
        let first = encoder.encode(&ExchangeStreamEvent::ContentDelta {
            index: 0,
            part: ContentPartDelta::ToolCallDelta {
                id: Some("call_1".into()),
                name: Some("get_weather".into()),
                arguments_delta: "{\"a\":".into(),
            },
        });
        let second = encoder.encode(&ExchangeStreamEvent::ContentDelta {
            index: 0,
            part: ContentPartDelta::ToolCallDelta {
                id: None,
                name: None,
                arguments_delta: "1}".into(),
            },
        });
        assert_eq!(
            first[0].choices[0].delta.tool_calls.as_ref().unwrap()[0]
                .function
                .name,
            Some("get_weather".to_string())
        );
        assert_eq!(
            second[0].choices[0].delta.tool_calls.as_ref().unwrap()[0].id,
            None
        );
    }
}
