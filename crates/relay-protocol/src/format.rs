use serde::{Deserialize, Serialize};

/// The body dialect spoken on one side of a connection (spec glossary:
/// "Client format / Upstream format").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    Anthropic,
    OpenAiChat,
    OpenAiResponses,
    Gemini,
}

impl WireFormat {
    pub const ALL: [WireFormat; 4] = [
        WireFormat::Anthropic,
        WireFormat::OpenAiChat,
        WireFormat::OpenAiResponses,
        WireFormat::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Anthropic => "anthropic",
            WireFormat::OpenAiChat => "openai_chat",
            WireFormat::OpenAiResponses => "openai_responses",
            WireFormat::Gemini => "gemini",
        }
    }
}

/// The eight client-facing surfaces from spec §6: four dialects, each with a
/// "native" and a "CLI" auth variant. The CLI variants share the same body
/// shape as their native counterpart; only inbound auth extraction differs
/// (spec §6's auth table), which is why `wire()` collapses each pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientFormat {
    Anthropic,
    AnthropicCli,
    OpenAiChat,
    OpenAiChatCli,
    OpenAiResponses,
    OpenAiResponsesCli,
    Gemini,
    GeminiCli,
}

impl ClientFormat {
    pub fn wire(&self) -> WireFormat {
        match self {
            ClientFormat::Anthropic | ClientFormat::AnthropicCli => WireFormat::Anthropic,
            ClientFormat::OpenAiChat | ClientFormat::OpenAiChatCli => WireFormat::OpenAiChat,
            ClientFormat::OpenAiResponses | ClientFormat::OpenAiResponsesCli => {
                WireFormat::OpenAiResponses
            }
            ClientFormat::Gemini | ClientFormat::GeminiCli => WireFormat::Gemini,
        }
    }

    pub fn is_cli(&self) -> bool {
        matches!(
            self,
            ClientFormat::AnthropicCli
                | ClientFormat::OpenAiChatCli
                | ClientFormat::OpenAiResponsesCli
                | ClientFormat::GeminiCli
        )
    }
}

/// Operations the gateway routes (spec §6 inbound wire protocols).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    GenerateContent,
    StreamGenerateContent,
    CountTokens,
    ModelList,
    ModelGet,
}

impl Op {
    pub fn is_stream(&self) -> bool {
        matches!(self, Op::StreamGenerateContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_variants_share_wire_format_with_native() {
        assert_eq!(ClientFormat::Anthropic.wire(), ClientFormat::AnthropicCli.wire());
        assert_eq!(ClientFormat::Gemini.wire(), ClientFormat::GeminiCli.wire());
        assert!(ClientFormat::GeminiCli.is_cli());
        assert!(!ClientFormat::Gemini.is_cli());
    }
}
