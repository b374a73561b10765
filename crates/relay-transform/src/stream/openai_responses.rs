//! OpenAI Responses API `response.*` typed SSE event stream, and its bridge
//! to [`ExchangeStreamEvent`] (spec §6: "OpenAI Responses... SSE stream with
//! `response.*` event types").

use relay_protocol::{ContentPartDelta, ExchangeStreamEvent, FinishReason, Usage};
use serde::{Deserialize, Serialize};

use crate::registry::TransformError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesStreamEvent {
    #[serde(rename = "response.created")]
    Created { response: ResponsesStub },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        output_index: usize,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        output_index: usize,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.completed")]
    Completed { response: ResponsesStub },
    #[serde(rename = "response.failed")]
    Failed { response: ResponsesStub },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesStub {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub usage: Option<ResponsesStreamUsage>,
    #[serde(default)]
    pub error: Option<ResponsesStreamError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesStreamUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: ResponsesInputTokensDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesInputTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesStreamError {
    pub message: String,
}

impl From<ResponsesStreamUsage> for Usage {
    fn from(u: ResponsesStreamUsage) -> Self {
        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.input_tokens_details.cached_tokens,
            cache_creation_tokens: 0,
        }
    }
}

impl From<Usage> for ResponsesStreamUsage {
    fn from(u: Usage) -> Self {
        ResponsesStreamUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            input_tokens_details: ResponsesInputTokensDetails {
                cached_tokens: u.cache_read_tokens,
            },
        }
    }
}

fn status_to_finish_reason(status: &str) -> FinishReason {
    match status {
        "completed" => FinishReason::Stop,
        "incomplete" => FinishReason::Length,
        "failed" => FinishReason::Other,
        _ => FinishReason::Other,
    }
}

pub fn decode(event: ResponsesStreamEvent) -> Vec<ExchangeStreamEvent> {
    match event {
        ResponsesStreamEvent::Created { response } => vec![ExchangeStreamEvent::MessageStart {
            id: response.id,
            model: response.model,
        }],
        ResponsesStreamEvent::OutputTextDelta { output_index, delta } => {
            vec![ExchangeStreamEvent::ContentDelta {
                index: output_index,
                part: ContentPartDelta::TextDelta(delta),
            }]
        }
        ResponsesStreamEvent::FunctionCallArgumentsDelta {
            output_index,
            item_id,
            name,
            delta,
        } => vec![ExchangeStreamEvent::ContentDelta {
            index: output_index,
            part: ContentPartDelta::ToolCallDelta {
                id: item_id,
                name,
                arguments_delta: delta,
            },
        }],
        ResponsesStreamEvent::Completed { response } => {
            let mut out = Vec::new();
            if let Some(usage) = response.usage {
                out.push(ExchangeStreamEvent::Usage {
                    usage: usage.into(),
                });
            }
            let reason = response.status.as_deref().map(status_to_finish_reason);
            out.push(ExchangeStreamEvent::MessageDelta {
                finish_reason: reason.or(Some(FinishReason::Stop)),
            });
            out.push(ExchangeStreamEvent::MessageStop);
            out
        }
        ResponsesStreamEvent::Failed { response } => vec![ExchangeStreamEvent::Error {
            message: response
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "response.failed".to_string()),
        }],
    }
}

pub fn decode_json(value: serde_json::Value) -> Result<Vec<ExchangeStreamEvent>, TransformError> {
    let event: ResponsesStreamEvent =
        serde_json::from_value(value).map_err(|e| TransformError::Decode(e.to_string()))?;
    Ok(decode(event))
}

#[derive(Debug, Default)]
pub struct ResponsesStreamEncoder {
    id: String,
    model: String,
}

impl ResponsesStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, event: &ExchangeStreamEvent) -> Vec<ResponsesStreamEvent> {
        match event {
            ExchangeStreamEvent::MessageStart { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
                vec![ResponsesStreamEvent::Created {
                    response: ResponsesStub {
                        id: self.id.clone(),
                        model: self.model.clone(),
                        ..Default::default()
                    },
                }]
            }
            ExchangeStreamEvent::ContentDelta { index, part } => match part {
                ContentPartDelta::TextDelta(text) => {
                    vec![ResponsesStreamEvent::OutputTextDelta {
                        output_index: *index,
                        delta: text.clone(),
                    }]
                }
                ContentPartDelta::ToolCallDelta {
                    id,
                    name,
                    arguments_delta,
                } => vec![ResponsesStreamEvent::FunctionCallArgumentsDelta {
                    output_index: *index,
                    item_id: id.clone(),
                    name: name.clone(),
                    delta: arguments_delta.clone(),
                }],
                ContentPartDelta::ThinkingDelta(_) => Vec::new(),
            },
            ExchangeStreamEvent::Usage { usage } => vec![ResponsesStreamEvent::Completed {
                response: ResponsesStub {
                    id: self.id.clone(),
                    model: self.model.clone(),
                    status: Some("completed".to_string()),
                    usage: Some((*usage).into()),
                    error: None,
                },
            }],
            ExchangeStreamEvent::MessageDelta { .. } | ExchangeStreamEvent::MessageStop => {
                Vec::new()
            }
            ExchangeStreamEvent::Error { message } => vec![ResponsesStreamEvent::Failed {
                response: ResponsesStub {
                    id: self.id.clone(),
                    model: self.model.clone(),
                    status: Some("failed".to_string()),
                    error: Some(ResponsesStreamError {
                        message: message.clone(),
                    }),
                    ..Default::default()
                },
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_event_carries_usage_and_stop() {
        let events = decode(ResponsesStreamEvent::Completed {
            response: ResponsesStub {
                id: "resp_1".into(),
                model: "gpt-5".into(),
                status: Some("completed".into()),
                usage: Some(ResponsesStreamUsage {
                    input_tokens: 5,
                    output_tokens: 7,
                    ..Default::default()
                }),
                error: None,
            },
        });
        assert!(matches!(events[0], ExchangeStreamEvent::Usage { .. }));
        assert!(matches!(events[2], ExchangeStreamEvent::MessageStop));
    }
}
