//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Payload codecs applied between publish and delivery."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::{BrokerError, CodecKind, Result};

/// Serialization boundary between publishers and handlers.
///
/// Every publish is encoded and decoded again before delivery, so handlers see
/// exactly what survives the wire format.
pub trait Codec: Send + Sync {
    /// MIME type reported in the delivery context.
    fn content_type(&self) -> &'static str;
    /// Encode a payload into wire bytes.
    fn encode(&self, value: &JsonValue) -> Result<Vec<u8>>;
    /// Decode wire bytes back into a payload.
    fn decode(&self, bytes: &[u8]) -> Result<JsonValue>;
}

/// JSON wire format.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, value: &JsonValue) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<JsonValue> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// CBOR wire format.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn content_type(&self) -> &'static str {
        "application/cbor"
    }

    fn encode(&self, value: &JsonValue) -> Result<Vec<u8>> {
        serde_cbor::to_vec(value).map_err(|err| BrokerError::Codec(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<JsonValue> {
        serde_cbor::from_slice(bytes).map_err(|err| BrokerError::Codec(err.to_string()))
    }
}

/// Codec implementation for a configured kind.
pub fn codec_for(kind: CodecKind) -> Arc<dyn Codec> {
    match kind {
        CodecKind::Json => Arc::new(JsonCodec),
        CodecKind::Cbor => Arc::new(CborCodec),
    }
}
