//! Protocol Converter Registry (spec §4.10): dialect A <-> dialect B
//! translation for requests, responses, and stream chunks, built once at
//! startup and handed down as a plain value (spec §9 design note — no
//! global singleton).

pub mod registry;
pub mod stream;

pub use registry::{
    ConverterRegistry, ProtocolConverter, StreamChunkConverter, TransformError, WireFrame,
    build_registry, decode_response, format_acceptable,
};
