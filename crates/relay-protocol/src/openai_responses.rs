//! OpenAI Responses API wire shapes and their conversion to/from the
//! canonical `Exchange`. The Responses API represents a conversation as a
//! flat `input` array of typed items rather than Chat Completions' nested
//! `messages[].content`; this module's conversions collapse that
//! representation into the same canonical `Message`/`ContentPart` shape the
//! other dialects use.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchange::{
    ContentPart, Exchange, ExchangeResponse, FinishReason, ImageSource, Message, Role, ToolDef,
    Usage,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    pub input: Vec<ResponsesItem>,
    #[serde(default)]
    pub tools: Vec<ResponsesTool>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesItem {
    Message {
        role: ResponsesRole,
        content: Vec<ResponsesContentPart>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsesRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesContentPart {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub id: String,
    pub model: String,
    pub output: Vec<ResponsesItem>,
    #[serde(default)]
    pub status: Option<ResponsesStatus>,
    pub usage: ResponsesUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsesStatus {
    Completed,
    Incomplete,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponsesUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub input_tokens_cached: u64,
}

impl From<ResponsesUsage> for Usage {
    fn from(u: ResponsesUsage) -> Self {
        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.input_tokens_cached,
            cache_creation_tokens: 0,
        }
    }
}

impl From<Usage> for ResponsesUsage {
    fn from(u: Usage) -> Self {
        ResponsesUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            input_tokens_cached: u.cache_read_tokens,
        }
    }
}

impl From<ResponsesStatus> for FinishReason {
    fn from(status: ResponsesStatus) -> Self {
        match status {
            ResponsesStatus::Completed => FinishReason::Stop,
            ResponsesStatus::Incomplete => FinishReason::Length,
            ResponsesStatus::Failed => FinishReason::Other,
        }
    }
}

impl From<FinishReason> for ResponsesStatus {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop | FinishReason::ToolCalls | FinishReason::ContentFilter => {
                ResponsesStatus::Completed
            }
            FinishReason::Length => ResponsesStatus::Incomplete,
            FinishReason::Other => ResponsesStatus::Failed,
        }
    }
}

fn item_to_messages(item: ResponsesItem) -> Vec<Message> {
    match item {
        ResponsesItem::Message { role, content } => vec![Message {
            role: match role {
                ResponsesRole::User => Role::User,
                ResponsesRole::Assistant => Role::Assistant,
            },
            content: content
                .into_iter()
                .map(|p| match p {
                    ResponsesContentPart::InputText { text }
                    | ResponsesContentPart::OutputText { text } => ContentPart::Text { text },
                    ResponsesContentPart::InputImage { image_url } => ContentPart::Image {
                        source: ImageSource::Url { url: image_url },
                    },
                })
                .collect(),
        }],
        ResponsesItem::FunctionCall {
            call_id,
            name,
            arguments,
        } => vec![Message {
            role: Role::Assistant,
            content: vec![ContentPart::ToolCall {
                id: call_id,
                name,
                arguments: serde_json::from_str(&arguments)
                    .unwrap_or(Value::Object(Default::default())),
            }],
        }],
        ResponsesItem::FunctionCallOutput { call_id, output } => vec![Message {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult {
                tool_call_id: call_id,
                content: output,
                is_error: false,
            }],
        }],
    }
}

fn message_to_items(message: Message) -> Vec<ResponsesItem> {
    let mut function_calls = Vec::new();
    let mut function_outputs = Vec::new();
    let mut content_parts = Vec::new();

    for part in message.content {
        match (message.role, part) {
            (Role::Tool, ContentPart::ToolResult { tool_call_id, content, .. }) => {
                function_outputs.push(ResponsesItem::FunctionCallOutput {
                    call_id: tool_call_id,
                    output: content,
                });
            }
            (_, ContentPart::ToolCall { id, name, arguments }) => {
                function_calls.push(ResponsesItem::FunctionCall {
                    call_id: id,
                    name,
                    arguments: arguments.to_string(),
                });
            }
            (Role::Assistant, ContentPart::Text { text }) => {
                content_parts.push(ResponsesContentPart::OutputText { text });
            }
            (_, ContentPart::Text { text }) => {
                content_parts.push(ResponsesContentPart::InputText { text });
            }
            (_, ContentPart::Image { source }) => {
                content_parts.push(ResponsesContentPart::InputImage {
                    image_url: match source {
                        ImageSource::Url { url } => url,
                        ImageSource::Base64 { media_type, data } => {
                            format!("data:{media_type};base64,{data}")
                        }
                    },
                });
            }
            _ => {}
        }
    }

    let mut items = function_outputs;
    if !content_parts.is_empty() {
        items.push(ResponsesItem::Message {
            role: match message.role {
                Role::Assistant => ResponsesRole::Assistant,
                _ => ResponsesRole::User,
            },
            content: content_parts,
        });
    }
    items.extend(function_calls);
    items
}

impl From<ResponsesRequest> for Exchange {
    fn from(req: ResponsesRequest) -> Self {
        let messages = req.input.into_iter().flat_map(item_to_messages).collect();
        let tools = req
            .tools
            .into_iter()
            .map(|t| ToolDef {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            })
            .collect();

        Exchange {
            model: req.model,
            system: req.instructions,
            messages,
            tools,
            stop_sequences: vec![],
            max_tokens: req.max_output_tokens,
            temperature: req.temperature,
            stream: req.stream,
        }
    }
}

impl From<Exchange> for ResponsesRequest {
    fn from(ex: Exchange) -> Self {
        ResponsesRequest {
            model: ex.model,
            instructions: ex.system,
            input: ex.messages.into_iter().flat_map(message_to_items).collect(),
            tools: ex
                .tools
                .into_iter()
                .map(|t| ResponsesTool {
                    kind: "function".into(),
                    name: t.name,
                    description: t.description,
                    parameters: t.parameters,
                })
                .collect(),
            max_output_tokens: ex.max_tokens,
            temperature: ex.temperature,
            stream: ex.stream,
        }
    }
}

impl From<ExchangeResponse> for ResponsesResponse {
    fn from(resp: ExchangeResponse) -> Self {
        let message = Message {
            role: Role::Assistant,
            content: resp.content,
        };
        ResponsesResponse {
            id: resp.id,
            model: resp.model,
            output: message_to_items(message),
            status: resp.finish_reason.map(Into::into),
            usage: resp.usage.into(),
        }
    }
}

impl From<ResponsesResponse> for ExchangeResponse {
    fn from(resp: ResponsesResponse) -> Self {
        let content = resp
            .output
            .into_iter()
            .flat_map(item_to_messages)
            .flat_map(|m| m.content)
            .collect();

        ExchangeResponse {
            id: resp.id,
            model: resp.model,
            content,
            finish_reason: resp.status.map(Into::into),
            usage: resp.usage.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_call_and_output_round_trip() {
        let req = ResponsesRequest {
            model: "gpt-5".into(),
            instructions: None,
            input: vec![
                ResponsesItem::Message {
                    role: ResponsesRole::User,
                    content: vec![ResponsesContentPart::InputText {
                        text: "what's the weather?".into(),
                    }],
                },
                ResponsesItem::FunctionCall {
                    call_id: "call_1".into(),
                    name: "get_weather".into(),
                    arguments: r#"{"city":"nyc"}"#.into(),
                },
                ResponsesItem::FunctionCallOutput {
                    call_id: "call_1".into(),
                    output: "72F".into(),
                },
            ],
            tools: vec![],
            max_output_tokens: None,
            temperature: None,
            stream: false,
        };

        let exchange: Exchange = req.into();
        assert_eq!(exchange.messages.len(), 3);
        assert_eq!(exchange.messages[1].role, Role::Assistant);
        assert_eq!(exchange.messages[2].role, Role::Tool);
    }

    #[test]
    fn status_maps_incomplete_to_length() {
        let reason: FinishReason = ResponsesStatus::Incomplete.into();
        assert_eq!(reason, FinishReason::Length);
    }
}
