//! Gemini `streamGenerateContent` chunk shape: each element of the streamed
//! JSON array is a `GenerateContentResponse`-shaped object (spec §4.9:
//! "Gemini's JSON-array-of-objects form... final Gemini chunk with
//! `usageMetadata.totalTokenCount`").

use relay_protocol::{ContentPartDelta, ExchangeStreamEvent, FinishReason, Usage};
use serde::{Deserialize, Serialize};

use crate::registry::TransformError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiStreamChunk {
    #[serde(default)]
    pub candidates: Vec<GeminiStreamCandidate>,
    #[serde(default, rename = "modelVersion")]
    pub model_version: Option<String>,
    #[serde(default)]
    pub usage_metadata: Option<GeminiStreamUsage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiStreamCandidate {
    #[serde(default)]
    pub content: GeminiStreamContent,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub index: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiStreamContent {
    #[serde(default)]
    pub parts: Vec<GeminiStreamPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiStreamPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, rename = "functionCall", skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GeminiStreamFunctionCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiStreamFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiStreamUsage {
    #[serde(default, rename = "promptTokenCount")]
    pub prompt_token_count: u64,
    #[serde(default, rename = "candidatesTokenCount")]
    pub candidates_token_count: u64,
    #[serde(default, rename = "thoughtsTokenCount")]
    pub thoughts_token_count: u64,
    #[serde(default, rename = "cachedContentTokenCount")]
    pub cached_content_token_count: u64,
}

impl From<GeminiStreamUsage> for Usage {
    fn from(u: GeminiStreamUsage) -> Self {
        Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count + u.thoughts_token_count,
            cache_read_tokens: u.cached_content_token_count,
            cache_creation_tokens: 0,
        }
    }
}

impl From<Usage> for GeminiStreamUsage {
    fn from(u: Usage) -> Self {
        GeminiStreamUsage {
            prompt_token_count: u.input_tokens,
            candidates_token_count: u.output_tokens,
            thoughts_token_count: 0,
            cached_content_token_count: u.cache_read_tokens,
        }
    }
}

fn finish_reason_to_wire(reason: FinishReason) -> String {
    match reason {
        FinishReason::Stop => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ToolCalls => "STOP",
        FinishReason::ContentFilter => "SAFETY",
        FinishReason::Other => "OTHER",
    }
    .to_string()
}

fn finish_reason_from_wire(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

pub fn decode(chunk: GeminiStreamChunk) -> Vec<ExchangeStreamEvent> {
    let mut out = Vec::new();
    if let Some(model) = &chunk.model_version {
        out.push(ExchangeStreamEvent::MessageStart {
            id: String::new(),
            model: model.clone(),
        });
    }
    for candidate in &chunk.candidates {
        for (index, part) in candidate.content.parts.iter().enumerate() {
            if let Some(text) = &part.text {
                out.push(ExchangeStreamEvent::ContentDelta {
                    index,
                    part: ContentPartDelta::TextDelta(text.clone()),
                });
            }
            if let Some(call) = &part.function_call {
                out.push(ExchangeStreamEvent::ContentDelta {
                    index,
                    part: ContentPartDelta::ToolCallDelta {
                        id: None,
                        name: Some(call.name.clone()),
                        arguments_delta: call.args.to_string(),
                    },
                });
            }
        }
        if let Some(reason) = &candidate.finish_reason {
            out.push(ExchangeStreamEvent::MessageDelta {
                finish_reason: Some(finish_reason_from_wire(reason)),
            });
        }
    }
    if let Some(usage) = chunk.usage_metadata {
        out.push(ExchangeStreamEvent::Usage {
            usage: usage.into(),
        });
        out.push(ExchangeStreamEvent::MessageStop);
    }
    out
}

pub fn decode_json(value: serde_json::Value) -> Result<Vec<ExchangeStreamEvent>, TransformError> {
    let chunk: GeminiStreamChunk =
        serde_json::from_value(value).map_err(|e| TransformError::Decode(e.to_string()))?;
    Ok(decode(chunk))
}

#[derive(Debug, Default)]
pub struct GeminiStreamEncoder {
    model: String,
}

impl GeminiStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, event: &ExchangeStreamEvent) -> Vec<GeminiStreamChunk> {
        match event {
            ExchangeStreamEvent::MessageStart { model, .. } => {
                self.model = model.clone();
                Vec::new()
            }
            ExchangeStreamEvent::ContentDelta { index, part } => {
                let gemini_part = match part {
                    ContentPartDelta::TextDelta(text) => GeminiStreamPart {
                        text: Some(text.clone()),
                        function_call: None,
                    },
                    ContentPartDelta::ToolCallDelta {
                        name,
                        arguments_delta,
                        ..
                    } => GeminiStreamPart {
                        text: None,
                        function_call: Some(GeminiStreamFunctionCall {
                            name: name.clone().unwrap_or_default(),
                            args: serde_json::from_str(arguments_delta)
                                .unwrap_or(serde_json::Value::Null),
                        }),
                    },
                    ContentPartDelta::ThinkingDelta(_) => return Vec::new(),
                };
                vec![GeminiStreamChunk {
                    candidates: vec![GeminiStreamCandidate {
                        content: GeminiStreamContent {
                            parts: vec![gemini_part],
                        },
                        finish_reason: None,
                        index: *index,
                    }],
                    model_version: Some(self.model.clone()),
                    usage_metadata: None,
                }]
            }
            ExchangeStreamEvent::MessageDelta { finish_reason } => {
                vec![GeminiStreamChunk {
                    candidates: vec![GeminiStreamCandidate {
                        content: GeminiStreamContent::default(),
                        finish_reason: finish_reason.map(|r| finish_reason_to_wire(r)),
                        index: 0,
                    }],
                    model_version: Some(self.model.clone()),
                    usage_metadata: None,
                }]
            }
            ExchangeStreamEvent::Usage { usage } => vec![GeminiStreamChunk {
                candidates: vec![],
                model_version: Some(self.model.clone()),
                usage_metadata: Some((*usage).into()),
            }],
            ExchangeStreamEvent::MessageStop => Vec::new(),
            ExchangeStreamEvent::Error { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_chunk_usage_computes_output_from_candidates_plus_thoughts() {
        let chunk = GeminiStreamChunk {
            candidates: vec![],
            model_version: None,
            usage_metadata: Some(GeminiStreamUsage {
                prompt_token_count: 10,
                candidates_token_count: 4,
                thoughts_token_count: 2,
                cached_content_token_count: 0,
            }),
        };
        let events = decode(chunk);
        let usage = events
            .iter()
            .find_map(|e| match e {
                ExchangeStreamEvent::Usage { usage } => Some(*usage),
                _ => None,
            })
            .unwrap();
        assert_eq!(usage.output_tokens, 6);
        assert!(matches!(events.last(), Some(ExchangeStreamEvent::MessageStop)));
    }

    #[test]
    fn text_part_decodes_to_content_delta() {
        let chunk = GeminiStreamChunk {
            candidates: vec![GeminiStreamCandidate {
                content: GeminiStreamContent {
                    parts: vec![GeminiStreamPart {
                        text: Some("hello".into()),
                        function_call: None,
                    }],
                },
                finish_reason: None,
                index: 0,
            }],
            model_version: Some("gemini-1.5-pro".into()),
            usage_metadata: None,
        };
        let events = decode(chunk);
        assert!(events.iter().any(|e| matches!(
            e,
            ExchangeStreamEvent::ContentDelta { part: ContentPartDelta::TextDelta(t), .. } if t == "hello"
        )));
    }
}
