//! Per-dialect stream wire shapes and the stateful decode/encode pairs that
//! bridge each to relay-protocol's [`relay_protocol::ExchangeStreamEvent`]
//! pivot. The registry in [`crate::registry`] composes a source decoder with
//! a target encoder to implement `convert_stream_chunk` for any ordered pair
//! without one bespoke transform per pair (spec §4.10).

pub mod claude;
pub mod gemini;
pub mod openai_chat;
pub mod openai_responses;
