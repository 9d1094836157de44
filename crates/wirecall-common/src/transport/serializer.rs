use serde::Serialize;

use crate::protocol::error::{Result, WirecallError};
use crate::protocol::message::RpcValue;

/// Wire format for message payloads.
///
/// Both formats are self-describing so dynamic `Value` payloads survive the
/// round trip. JSON is the default; CBOR is the compact alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    #[default]
    Json,
    Cbor,
}

impl Serializer {
    pub fn name(&self) -> &'static str {
        match self {
            Serializer::Json => "json",
            Serializer::Cbor => "cbor",
        }
    }

    /// Encodes a message into payload bytes.
    pub fn dump<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Serializer::Json => serde_json::to_vec(value)
                .map_err(|e| WirecallError::Decode(format!("failed to encode json payload: {e}"))),
            Serializer::Cbor => {
                let mut buf = Vec::new();
                ciborium::ser::into_writer(value, &mut buf).map_err(|e| {
                    WirecallError::Decode(format!("failed to encode cbor payload: {e}"))
                })?;
                Ok(buf)
            }
        }
    }

    /// Decodes payload bytes into a dynamic value.
    pub fn load(&self, bytes: &[u8]) -> Result<RpcValue> {
        match self {
            Serializer::Json => serde_json::from_slice(bytes)
                .map_err(|e| WirecallError::Decode(format!("invalid json payload: {e}"))),
            Serializer::Cbor => ciborium::de::from_reader(bytes)
                .map_err(|e| WirecallError::Decode(format!("invalid cbor payload: {e}"))),
        }
    }
}

/// Per-connection serializer negotiation.
///
/// Decoding attempts the active serializer first. On a parse failure, or a
/// payload whose shape is not the expected mapping, the configured fallback
/// is tried once; if it parses, it becomes the active serializer for every
/// later load AND dump on this connection. The choice is sticky: serializers
/// are negotiated per connection, never per message.
///
/// When the fallback also fails to produce a mapping (or none is configured)
/// the failure is a [`WirecallError::Decode`], whatever the underlying
/// serializer reported.
#[derive(Debug, Clone)]
pub struct SerializerStack {
    primary: Serializer,
    fallback: Option<Serializer>,
    resolved: Option<Serializer>,
}

impl SerializerStack {
    pub fn new(primary: Serializer, fallback: Option<Serializer>) -> Self {
        Self {
            primary,
            fallback,
            resolved: None,
        }
    }

    /// The serializer currently in effect for this connection.
    pub fn active(&self) -> Serializer {
        self.resolved.unwrap_or(self.primary)
    }

    pub fn dump<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        self.active().dump(value)
    }

    pub fn load(&mut self, bytes: &[u8]) -> Result<RpcValue> {
        let active = self.active();

        let first_failure = match active.load(bytes) {
            Ok(value) if value.is_object() => return Ok(value),
            Ok(_) => WirecallError::Decode(format!(
                "{} payload decoded to a non-mapping value",
                active.name()
            )),
            Err(e) => e,
        };

        let fallback = match self.fallback.filter(|fb| *fb != active) {
            Some(fb) => fb,
            None => return Err(first_failure),
        };

        match fallback.load(bytes) {
            Ok(value) if value.is_object() => {
                tracing::debug!(serializer = fallback.name(), "switched to fallback serializer");
                self.resolved = Some(fallback);
                Ok(value)
            }
            Ok(_) => Err(WirecallError::Decode(format!(
                "{} fallback payload decoded to a non-mapping value",
                fallback.name()
            ))),
            Err(e) => Err(WirecallError::Decode(format!(
                "no configured serializer could parse the payload: {e}"
            ))),
        }
    }
}
