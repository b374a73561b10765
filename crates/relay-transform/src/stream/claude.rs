//! Claude (Anthropic Messages) SSE streaming event shapes, and the
//! decode/encode pair that bridges them to the dialect-neutral
//! [`ExchangeStreamEvent`] pivot (spec §4.9 "peer-format parser").
//!
//! Grounded in the teacher's `create_message::stream` event shapes
//! (`message_start`/`content_block_delta`/`message_delta`/`message_stop`),
//! generalized from one struct-per-field to the neutral event algebra.

use relay_protocol::{ContentPartDelta, ExchangeStreamEvent, FinishReason, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::TransformError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeStreamEvent {
    MessageStart {
        message: ClaudeStreamMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: ClaudeContentBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: ClaudeStreamDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: ClaudeMessageDelta,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<ClaudeStreamUsage>,
    },
    MessageStop,
    Error {
        error: ClaudeStreamError,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeStreamMessage {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub usage: ClaudeStreamUsage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaudeStreamUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl From<ClaudeStreamUsage> for Usage {
    fn from(u: ClaudeStreamUsage) -> Self {
        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_input_tokens,
            cache_creation_tokens: u.cache_creation_input_tokens,
        }
    }
}

impl From<Usage> for ClaudeStreamUsage {
    fn from(u: Usage) -> Self {
        ClaudeStreamUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_input_tokens: u.cache_read_tokens,
            cache_creation_input_tokens: u.cache_creation_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeContentBlockStart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {
        thinking: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeStreamDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaudeMessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeStreamError {
    #[serde(default)]
    pub message: String,
}

fn stop_reason_to_wire(reason: FinishReason) -> String {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::ContentFilter => "refusal",
        FinishReason::Other => "end_turn",
    }
    .to_string()
}

fn stop_reason_from_wire(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

/// Decodes one wire event into zero or more neutral events. Stateless: every
/// field the neutral representation needs (block kind, tool id/name) is
/// already present on the wire event that introduces it.
pub fn decode(event: ClaudeStreamEvent) -> Vec<ExchangeStreamEvent> {
    match event {
        ClaudeStreamEvent::MessageStart { message } => {
            let mut out = vec![ExchangeStreamEvent::MessageStart {
                id: message.id,
                model: message.model,
            }];
            if message.usage.input_tokens > 0 {
                out.push(ExchangeStreamEvent::Usage {
                    usage: message.usage.into(),
                });
            }
            out
        }
        ClaudeStreamEvent::ContentBlockStart { index, content_block } => match content_block {
            ClaudeContentBlockStart::ToolUse { id, name, .. } => {
                vec![ExchangeStreamEvent::ContentDelta {
                    index,
                    part: ContentPartDelta::ToolCallDelta {
                        id: Some(id),
                        name: Some(name),
                        arguments_delta: String::new(),
                    },
                }]
            }
            ClaudeContentBlockStart::Text { .. } | ClaudeContentBlockStart::Thinking { .. } => {
                vec![]
            }
        },
        ClaudeStreamEvent::ContentBlockDelta { index, delta } => match delta {
            ClaudeStreamDelta::TextDelta { text } => vec![ExchangeStreamEvent::ContentDelta {
                index,
                part: ContentPartDelta::TextDelta(text),
            }],
            ClaudeStreamDelta::InputJsonDelta { partial_json } => {
                vec![ExchangeStreamEvent::ContentDelta {
                    index,
                    part: ContentPartDelta::ToolCallDelta {
                        id: None,
                        name: None,
                        arguments_delta: partial_json,
                    },
                }]
            }
            ClaudeStreamDelta::ThinkingDelta { thinking } => {
                vec![ExchangeStreamEvent::ContentDelta {
                    index,
                    part: ContentPartDelta::ThinkingDelta(thinking),
                }]
            }
        },
        ClaudeStreamEvent::ContentBlockStop { .. } | ClaudeStreamEvent::Ping => vec![],
        ClaudeStreamEvent::MessageDelta { delta, usage } => {
            let mut out = Vec::new();
            if let Some(usage) = usage {
                out.push(ExchangeStreamEvent::Usage {
                    usage: usage.into(),
                });
            }
            out.push(ExchangeStreamEvent::MessageDelta {
                finish_reason: delta.stop_reason.as_deref().map(stop_reason_from_wire),
            });
            out
        }
        ClaudeStreamEvent::MessageStop => vec![ExchangeStreamEvent::MessageStop],
        ClaudeStreamEvent::Error { error } => vec![ExchangeStreamEvent::Error {
            message: error.message,
        }],
    }
}

pub fn decode_json(value: Value) -> Result<Vec<ExchangeStreamEvent>, TransformError> {
    let event: ClaudeStreamEvent = serde_json::from_value(value)
        .map_err(|e| TransformError::Decode(e.to_string()))?;
    Ok(decode(event))
}

/// Stateful encoder: tracks which content-block index is currently open so
/// that block-start/stop framing is emitted correctly around deltas, the
/// way the teacher's native Claude stream writer does.
#[derive(Debug, Default)]
pub struct ClaudeStreamEncoder {
    open_block: Option<usize>,
}

impl ClaudeStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, event: &ExchangeStreamEvent) -> Vec<ClaudeStreamEvent> {
        match event {
            ExchangeStreamEvent::MessageStart { id, model } => {
                vec![ClaudeStreamEvent::MessageStart {
                    message: ClaudeStreamMessage {
                        id: id.clone(),
                        model: model.clone(),
                        role: "assistant".to_string(),
                        usage: ClaudeStreamUsage::default(),
                    },
                }]
            }
            ExchangeStreamEvent::ContentDelta { index, part } => {
                let mut out = self.maybe_open(*index, part);
                let delta = match part {
                    ContentPartDelta::TextDelta(text) => {
                        ClaudeStreamDelta::TextDelta { text: text.clone() }
                    }
                    ContentPartDelta::ToolCallDelta { arguments_delta, .. } => {
                        ClaudeStreamDelta::InputJsonDelta {
                            partial_json: arguments_delta.clone(),
                        }
                    }
                    ContentPartDelta::ThinkingDelta(text) => {
                        ClaudeStreamDelta::ThinkingDelta { thinking: text.clone() }
                    }
                };
                out.push(ClaudeStreamEvent::ContentBlockDelta {
                    index: *index,
                    delta,
                });
                out
            }
            ExchangeStreamEvent::MessageDelta { finish_reason } => {
                let mut out = self.close_open();
                out.push(ClaudeStreamEvent::MessageDelta {
                    delta: ClaudeMessageDelta {
                        stop_reason: finish_reason.map(stop_reason_to_wire),
                    },
                    usage: None,
                });
                out
            }
            ExchangeStreamEvent::Usage { usage } => vec![ClaudeStreamEvent::MessageDelta {
                delta: ClaudeMessageDelta::default(),
                usage: Some((*usage).into()),
            }],
            ExchangeStreamEvent::MessageStop => {
                let mut out = self.close_open();
                out.push(ClaudeStreamEvent::MessageStop);
                out
            }
            ExchangeStreamEvent::Error { message } => vec![ClaudeStreamEvent::Error {
                error: ClaudeStreamError {
                    message: message.clone(),
                },
            }],
        }
    }

    fn maybe_open(&mut self, index: usize, part: &ContentPartDelta) -> Vec<ClaudeStreamEvent> {
        if self.open_block == Some(index) {
            return Vec::new();
        }
        let mut out = self.close_open();
        let block = match part {
            ContentPartDelta::TextDelta(_) => {
                ClaudeContentBlockStart::Text { text: String::new() }
            }
            ContentPartDelta::ToolCallDelta { id, name, .. } => ClaudeContentBlockStart::ToolUse {
                id: id.clone().unwrap_or_default(),
                name: name.clone().unwrap_or_default(),
                input: Value::Object(Default::default()),
            },
            ContentPartDelta::ThinkingDelta(_) => ClaudeContentBlockStart::Thinking {
                thinking: String::new(),
            },
        };
        out.push(ClaudeStreamEvent::ContentBlockStart {
            index,
            content_block: block,
        });
        self.open_block = Some(index);
        out
    }

    fn close_open(&mut self) -> Vec<ClaudeStreamEvent> {
        match self.open_block.take() {
            Some(index) => vec![ClaudeStreamEvent::ContentBlockStop { index }],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_text_delta_round_trips_through_encoder() {
        let neutral = decode(ClaudeStreamEvent::ContentBlockDelta {
            index: 0,
            delta: ClaudeStreamDelta::TextDelta {
                text: "hi".to_string(),
            },
        });
        assert_eq!(neutral.len(), 1);

        let mut encoder = ClaudeStreamEncoder::new();
        let wire = encoder.encode(&neutral[0]);
        assert_eq!(wire.len(), 2, "expects a block-start then a delta");
        assert!(matches!(wire[0], ClaudeStreamEvent::ContentBlockStart { .. }));
        assert!(matches!(wire[1], ClaudeStreamEvent::ContentBlockDelta { .. }));
    }

    #[test]
    fn encoder_closes_open_block_before_message_stop() {
        let mut encoder = ClaudeStreamEncoder::new();
        encoder.encode(&ExchangeStreamEvent::ContentDelta {
            index: 0,
            part: ContentPartDelta::TextDelta("hi".to_string()),
        });
        let wire = encoder.encode(&ExchangeStreamEvent::MessageStop);
        assert!(matches!(wire[0], ClaudeStreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(wire[1], ClaudeStreamEvent::MessageStop));
    }

    #[test]
    fn message_start_usage_defensive_merge_not_clobbered_by_zero_delta() {
        let events = decode(ClaudeStreamEvent::MessageStart {
            message: ClaudeStreamMessage {
                id: "msg_1".into(),
                model: "claude-3-5-sonnet".into(),
                role: "assistant".into(),
                usage: ClaudeStreamUsage {
                    input_tokens: 12,
                    ..Default::default()
                },
            },
        });
        let mut usage = Usage::default();
        for event in events {
            if let ExchangeStreamEvent::Usage { usage: u } = event {
                usage.defensive_merge(u);
            }
        }
        assert_eq!(usage.input_tokens, 12);
    }
}
