//! OpenAI Chat Completions wire shapes and their conversion to/from the
//! canonical `Exchange`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchange::{
    ContentPart, Exchange, ExchangeResponse, FinishReason, ImageSource, Message, Role, ToolDef,
    Usage,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiChatMessage>,
    #[serde(default)]
    pub tools: Vec<OpenAiChatTool>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatMessage {
    pub role: OpenAiChatRole,
    #[serde(default)]
    pub content: Option<OpenAiChatContent>,
    #[serde(default)]
    pub tool_calls: Vec<OpenAiToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenAiChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiChatContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    /// OpenAI encodes arguments as a JSON string, not a nested object.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<OpenAiChoice>,
    pub usage: OpenAiUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChoice {
    pub message: OpenAiChatMessage,
    pub finish_reason: Option<OpenAiFinishReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenAiFinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_tokens_cached: u64,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_read_tokens: u.prompt_tokens_cached,
            cache_creation_tokens: 0,
        }
    }
}

impl From<Usage> for OpenAiUsage {
    fn from(u: Usage) -> Self {
        OpenAiUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            prompt_tokens_cached: u.cache_read_tokens,
        }
    }
}

impl From<FinishReason> for OpenAiFinishReason {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => OpenAiFinishReason::Stop,
            FinishReason::Length => OpenAiFinishReason::Length,
            FinishReason::ToolCalls => OpenAiFinishReason::ToolCalls,
            FinishReason::ContentFilter => OpenAiFinishReason::ContentFilter,
            FinishReason::Other => OpenAiFinishReason::Stop,
        }
    }
}

impl From<OpenAiFinishReason> for FinishReason {
    fn from(reason: OpenAiFinishReason) -> Self {
        match reason {
            OpenAiFinishReason::Stop => FinishReason::Stop,
            OpenAiFinishReason::Length => FinishReason::Length,
            OpenAiFinishReason::ToolCalls => FinishReason::ToolCalls,
            OpenAiFinishReason::ContentFilter => FinishReason::ContentFilter,
        }
    }
}

fn content_to_parts(content: Option<OpenAiChatContent>) -> Vec<ContentPart> {
    match content {
        None => vec![],
        Some(OpenAiChatContent::Text(text)) => vec![ContentPart::Text { text }],
        Some(OpenAiChatContent::Parts(parts)) => parts
            .into_iter()
            .map(|p| match p {
                OpenAiContentPart::Text { text } => ContentPart::Text { text },
                OpenAiContentPart::ImageUrl { image_url } => ContentPart::Image {
                    source: ImageSource::Url { url: image_url.url },
                },
            })
            .collect(),
    }
}

fn tool_calls_to_parts(calls: Vec<OpenAiToolCall>) -> Vec<ContentPart> {
    calls
        .into_iter()
        .map(|call| ContentPart::ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::Object(Default::default())),
        })
        .collect()
}

impl From<OpenAiChatRequest> for Exchange {
    fn from(req: OpenAiChatRequest) -> Self {
        let mut system = None;
        let mut messages = Vec::new();

        for m in req.messages {
            match m.role {
                OpenAiChatRole::System => {
                    let text = content_to_parts(m.content)
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } => Some(text.clone()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    system = Some(text);
                }
                OpenAiChatRole::Tool => {
                    let content = content_to_parts(m.content)
                        .into_iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } => Some(text),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("");
                    messages.push(Message {
                        role: Role::Tool,
                        content: vec![ContentPart::ToolResult {
                            tool_call_id: m.tool_call_id.unwrap_or_default(),
                            content,
                            is_error: false,
                        }],
                    });
                }
                OpenAiChatRole::User => messages.push(Message {
                    role: Role::User,
                    content: content_to_parts(m.content),
                }),
                OpenAiChatRole::Assistant => {
                    let mut content = content_to_parts(m.content);
                    content.extend(tool_calls_to_parts(m.tool_calls));
                    messages.push(Message {
                        role: Role::Assistant,
                        content,
                    });
                }
            }
        }

        let tools = req
            .tools
            .into_iter()
            .map(|t| ToolDef {
                name: t.function.name,
                description: t.function.description,
                parameters: t.function.parameters,
            })
            .collect();

        Exchange {
            model: req.model,
            system,
            messages,
            tools,
            stop_sequences: req.stop,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            stream: req.stream,
        }
    }
}

impl From<Exchange> for OpenAiChatRequest {
    fn from(ex: Exchange) -> Self {
        let mut messages = Vec::new();
        if let Some(system) = ex.system {
            messages.push(OpenAiChatMessage {
                role: OpenAiChatRole::System,
                content: Some(OpenAiChatContent::Text(system)),
                tool_calls: vec![],
                tool_call_id: None,
            });
        }

        for m in ex.messages {
            match m.role {
                Role::Tool => {
                    let (tool_call_id, content) = m
                        .content
                        .into_iter()
                        .find_map(|p| match p {
                            ContentPart::ToolResult {
                                tool_call_id,
                                content,
                                ..
                            } => Some((tool_call_id, content)),
                            _ => None,
                        })
                        .unwrap_or_default();
                    messages.push(OpenAiChatMessage {
                        role: OpenAiChatRole::Tool,
                        content: Some(OpenAiChatContent::Text(content)),
                        tool_calls: vec![],
                        tool_call_id: Some(tool_call_id),
                    });
                }
                role => {
                    let mut text_parts = Vec::new();
                    let mut tool_calls = Vec::new();
                    for part in m.content {
                        match part {
                            ContentPart::Text { text } => {
                                text_parts.push(OpenAiContentPart::Text { text })
                            }
                            ContentPart::Image { source } => {
                                text_parts.push(OpenAiContentPart::ImageUrl {
                                    image_url: OpenAiImageUrl {
                                        url: match source {
                                            ImageSource::Url { url } => url,
                                            ImageSource::Base64 { media_type, data } => {
                                                format!("data:{media_type};base64,{data}")
                                            }
                                        },
                                    },
                                })
                            }
                            ContentPart::ToolCall { id, name, arguments } => {
                                tool_calls.push(OpenAiToolCall {
                                    id,
                                    kind: "function".into(),
                                    function: OpenAiFunctionCall {
                                        name,
                                        arguments: arguments.to_string(),
                                    },
                                })
                            }
                            ContentPart::ToolResult { .. } | ContentPart::Thinking { .. } => {}
                        }
                    }
                    messages.push(OpenAiChatMessage {
                        role: match role {
                            Role::User => OpenAiChatRole::User,
                            Role::Assistant => OpenAiChatRole::Assistant,
                            _ => OpenAiChatRole::User,
                        },
                        content: if text_parts.is_empty() {
                            None
                        } else {
                            Some(OpenAiChatContent::Parts(text_parts))
                        },
                        tool_calls,
                        tool_call_id: None,
                    });
                }
            }
        }

        OpenAiChatRequest {
            model: ex.model,
            messages,
            tools: ex
                .tools
                .into_iter()
                .map(|t| OpenAiChatTool {
                    kind: "function".into(),
                    function: OpenAiFunctionDef {
                        name: t.name,
                        description: t.description,
                        parameters: t.parameters,
                    },
                })
                .collect(),
            stop: ex.stop_sequences,
            max_tokens: ex.max_tokens,
            temperature: ex.temperature,
            stream: ex.stream,
        }
    }
}

impl From<ExchangeResponse> for OpenAiChatResponse {
    fn from(resp: ExchangeResponse) -> Self {
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for part in resp.content {
            match part {
                ContentPart::Text { text } => text_parts.push(OpenAiContentPart::Text { text }),
                ContentPart::ToolCall { id, name, arguments } => tool_calls.push(OpenAiToolCall {
                    id,
                    kind: "function".into(),
                    function: OpenAiFunctionCall {
                        name,
                        arguments: arguments.to_string(),
                    },
                }),
                _ => {}
            }
        }

        OpenAiChatResponse {
            id: resp.id,
            model: resp.model,
            choices: vec![OpenAiChoice {
                message: OpenAiChatMessage {
                    role: OpenAiChatRole::Assistant,
                    content: if text_parts.is_empty() {
                        None
                    } else {
                        Some(OpenAiChatContent::Parts(text_parts))
                    },
                    tool_calls,
                    tool_call_id: None,
                },
                finish_reason: resp.finish_reason.map(Into::into),
            }],
            usage: resp.usage.into(),
        }
    }
}

impl From<OpenAiChatResponse> for ExchangeResponse {
    fn from(resp: OpenAiChatResponse) -> Self {
        let choice = resp.choices.into_iter().next();
        let (content, finish_reason) = match choice {
            Some(choice) => {
                let mut parts = content_to_parts(choice.message.content);
                parts.extend(tool_calls_to_parts(choice.message.tool_calls));
                (parts, choice.finish_reason.map(Into::into))
            }
            None => (vec![], None),
        };

        ExchangeResponse {
            id: resp.id,
            model: resp.model,
            content,
            finish_reason,
            usage: resp.usage.into(),
        }
    }
}
