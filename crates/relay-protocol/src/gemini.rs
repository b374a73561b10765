//! Gemini `generateContent` wire shapes and their conversion to/from the
//! canonical `Exchange`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchange::{
    ContentPart, Exchange, ExchangeResponse, FinishReason, ImageSource, Message, Role, ToolDef,
    Usage,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiRequest {
    #[serde(default)]
    pub system_instruction: Option<GeminiContent>,
    pub contents: Vec<GeminiContent>,
    #[serde(default)]
    pub tools: Vec<GeminiTool>,
    #[serde(default)]
    pub generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    pub role: Option<GeminiRole>,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeminiRole {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "inlineData")]
    pub inline_data: Option<GeminiInlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "functionCall")]
    pub function_call: Option<GeminiFunctionCall>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "functionResponse"
    )]
    pub function_response: Option<GeminiFunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiInlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiTool {
    pub function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiGenerationConfig {
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiResponse {
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub usage_metadata: GeminiUsageMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiCandidate {
    pub content: GeminiContent,
    #[serde(default)]
    pub finish_reason: Option<GeminiFinishReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeminiFinishReason {
    Stop,
    MaxTokens,
    SafetyBlocked,
    Other,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GeminiUsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
    #[serde(default)]
    pub cached_content_token_count: u64,
}

impl From<GeminiUsageMetadata> for Usage {
    fn from(u: GeminiUsageMetadata) -> Self {
        Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            cache_read_tokens: u.cached_content_token_count,
            cache_creation_tokens: 0,
        }
    }
}

impl From<Usage> for GeminiUsageMetadata {
    fn from(u: Usage) -> Self {
        GeminiUsageMetadata {
            prompt_token_count: u.input_tokens,
            candidates_token_count: u.output_tokens,
            cached_content_token_count: u.cache_read_tokens,
        }
    }
}

impl From<GeminiFinishReason> for FinishReason {
    fn from(reason: GeminiFinishReason) -> Self {
        match reason {
            GeminiFinishReason::Stop => FinishReason::Stop,
            GeminiFinishReason::MaxTokens => FinishReason::Length,
            GeminiFinishReason::SafetyBlocked => FinishReason::ContentFilter,
            GeminiFinishReason::Other => FinishReason::Other,
        }
    }
}

impl From<FinishReason> for GeminiFinishReason {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => GeminiFinishReason::Stop,
            FinishReason::Length => GeminiFinishReason::MaxTokens,
            FinishReason::ContentFilter => GeminiFinishReason::SafetyBlocked,
            FinishReason::ToolCalls => GeminiFinishReason::Stop,
            FinishReason::Other => GeminiFinishReason::Other,
        }
    }
}

fn part_to_content(part: GeminiPart) -> Option<ContentPart> {
    if let Some(text) = part.text {
        return Some(ContentPart::Text { text });
    }
    if let Some(inline) = part.inline_data {
        return Some(ContentPart::Image {
            source: ImageSource::Base64 {
                media_type: inline.mime_type,
                data: inline.data,
            },
        });
    }
    if let Some(call) = part.function_call {
        return Some(ContentPart::ToolCall {
            id: call.name.clone(),
            name: call.name,
            arguments: call.args,
        });
    }
    if let Some(response) = part.function_response {
        return Some(ContentPart::ToolResult {
            tool_call_id: response.name,
            content: response.response.to_string(),
            is_error: false,
        });
    }
    None
}

fn content_to_part(part: ContentPart) -> GeminiPart {
    match part {
        ContentPart::Text { text } => GeminiPart {
            text: Some(text),
            inline_data: None,
            function_call: None,
            function_response: None,
        },
        ContentPart::Image { source } => GeminiPart {
            text: None,
            inline_data: Some(match source {
                ImageSource::Base64 { media_type, data } => GeminiInlineData {
                    mime_type: media_type,
                    data,
                },
                ImageSource::Url { url } => GeminiInlineData {
                    mime_type: "text/uri".into(),
                    data: url,
                },
            }),
            function_call: None,
            function_response: None,
        },
        ContentPart::ToolCall { name, arguments, .. } => GeminiPart {
            text: None,
            inline_data: None,
            function_call: Some(GeminiFunctionCall { name, args: arguments }),
            function_response: None,
        },
        ContentPart::ToolResult {
            tool_call_id,
            content,
            ..
        } => GeminiPart {
            text: None,
            inline_data: None,
            function_call: None,
            function_response: Some(GeminiFunctionResponse {
                name: tool_call_id,
                response: serde_json::json!({ "result": content }),
            }),
        },
        ContentPart::Thinking { text } => GeminiPart {
            text: Some(text),
            inline_data: None,
            function_call: None,
            function_response: None,
        },
    }
}

impl From<GeminiRequest> for Exchange {
    fn from(req: GeminiRequest) -> Self {
        let system = req.system_instruction.map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n")
        });

        let messages = req
            .contents
            .into_iter()
            .map(|c| Message {
                role: match c.role {
                    Some(GeminiRole::Model) => Role::Assistant,
                    _ => Role::User,
                },
                content: c.parts.into_iter().filter_map(part_to_content).collect(),
            })
            .collect();

        let tools = req
            .tools
            .into_iter()
            .flat_map(|t| t.function_declarations)
            .map(|f| ToolDef {
                name: f.name,
                description: f.description,
                parameters: f.parameters,
            })
            .collect();

        let (max_tokens, temperature, stop_sequences) = match req.generation_config {
            Some(cfg) => (cfg.max_output_tokens, cfg.temperature, cfg.stop_sequences),
            None => (None, None, vec![]),
        };

        Exchange {
            model: String::new(),
            system,
            messages,
            tools,
            stop_sequences,
            max_tokens,
            temperature,
            stream: false,
        }
    }
}

impl From<Exchange> for GeminiRequest {
    fn from(ex: Exchange) -> Self {
        GeminiRequest {
            system_instruction: ex.system.map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(text),
                    inline_data: None,
                    function_call: None,
                    function_response: None,
                }],
            }),
            contents: ex
                .messages
                .into_iter()
                .map(|m| GeminiContent {
                    role: Some(match m.role {
                        Role::Assistant => GeminiRole::Model,
                        _ => GeminiRole::User,
                    }),
                    parts: m.content.into_iter().map(content_to_part).collect(),
                })
                .collect(),
            tools: if ex.tools.is_empty() {
                vec![]
            } else {
                vec![GeminiTool {
                    function_declarations: ex
                        .tools
                        .into_iter()
                        .map(|t| GeminiFunctionDeclaration {
                            name: t.name,
                            description: t.description,
                            parameters: t.parameters,
                        })
                        .collect(),
                }]
            },
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: ex.max_tokens,
                temperature: ex.temperature,
                stop_sequences: ex.stop_sequences,
            }),
        }
    }
}

impl From<ExchangeResponse> for GeminiResponse {
    fn from(resp: ExchangeResponse) -> Self {
        GeminiResponse {
            candidates: vec![GeminiCandidate {
                content: GeminiContent {
                    role: Some(GeminiRole::Model),
                    parts: resp.content.into_iter().map(content_to_part).collect(),
                },
                finish_reason: resp.finish_reason.map(Into::into),
            }],
            usage_metadata: resp.usage.into(),
        }
    }
}

impl From<GeminiResponse> for ExchangeResponse {
    fn from(resp: GeminiResponse) -> Self {
        let candidate = resp.candidates.into_iter().next();
        let (content, finish_reason) = match candidate {
            Some(candidate) => (
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(part_to_content)
                    .collect(),
                candidate.finish_reason.map(Into::into),
            ),
            None => (vec![], None),
        };

        ExchangeResponse {
            id: String::new(),
            model: String::new(),
            content,
            finish_reason,
            usage: resp.usage_metadata.into(),
        }
    }
}
