//! Wire-level types for the chat/completion dialects the gateway speaks on
//! its downstream and upstream sides.
//!
//! Per spec §1 ("Wire-protocol converters themselves... are specified, not
//! their implementations") and §1's external-collaborator carve-out for
//! request parsing, this crate does not attempt bit-exact HTTP body schemas
//! for every vendor field. It defines the subset of each dialect's shape
//! (messages, roles, content parts, tool calls, stop reasons, usage, and
//! streaming event shapes) that the Protocol Converter Registry (§4.10) and
//! Stream Processor (§4.9) need to round-trip a single exchange, plus the
//! canonical intermediate representation (`exchange`) the converters pivot
//! through.

pub mod claude;
pub mod exchange;
pub mod format;
pub mod gemini;
pub mod json_stream;
pub mod openai_chat;
pub mod openai_responses;
pub mod sse;

pub use exchange::{
    ContentPart, Exchange, ExchangeStreamEvent, FinishReason, Message, Role, ToolCall, ToolDef,
    Usage,
};
pub use format::{ClientFormat, Op, WireFormat};
