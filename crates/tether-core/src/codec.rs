//! Type-keyed payload decoding.
//!
//! A [`DecoderRegistry`] maps numeric object type ids to decoders that turn
//! raw bytes into JSON values. Decoding a batch never stops at a bad item:
//! each failure becomes a [`Decoded::Diagnostic`] next to the good values.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Failure to turn bytes into a structured value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub type_id: Option<u32>,
    pub message: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.type_id {
            Some(id) => write!(f, "Decode error for type {}: {}", id, self.message),
            None => write!(f, "Decode error: {}", self.message),
        }
    }
}

impl std::error::Error for DecodeError {}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            type_id: None,
            message: message.into(),
        }
    }

    pub fn for_type(type_id: u32, message: impl Into<String>) -> Self {
        Self {
            type_id: Some(type_id),
            message: message.into(),
        }
    }
}

/// Outcome of decoding one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Value(Value),
    /// Human-readable description of why the item could not be decoded.
    Diagnostic(String),
}

impl Decoded {
    pub fn is_value(&self) -> bool {
        matches!(self, Decoded::Value(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Decoded::Value(value) => Some(value),
            Decoded::Diagnostic(_) => None,
        }
    }
}

type DecoderFn = dyn Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync;

/// Registry of decoders keyed by object type id.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<u32, Arc<DecoderFn>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the decoder for a type id.
    pub fn register<F>(&mut self, type_id: u32, decoder: F) -> &mut Self
    where
        F: Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        if self.decoders.insert(type_id, Arc::new(decoder)).is_some() {
            debug!("Replaced decoder for type {}", type_id);
        }
        self
    }

    /// Register a decoder that parses the bytes as JSON into `T`.
    pub fn register_json<T>(&mut self, type_id: u32) -> &mut Self
    where
        T: DeserializeOwned + Serialize + 'static,
    {
        self.register(type_id, move |bytes| {
            let typed: T = serde_json::from_slice(bytes)
                .map_err(|e| DecodeError::for_type(type_id, e.to_string()))?;
            serde_json::to_value(typed).map_err(|e| DecodeError::for_type(type_id, e.to_string()))
        })
    }

    pub fn contains(&self, type_id: u32) -> bool {
        self.decoders.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode one item. `None` when no decoder is registered for `type_id`.
    pub fn decode(&self, type_id: u32, bytes: &[u8]) -> Option<Decoded> {
        let decoder = self.decoders.get(&type_id)?;
        Some(match decoder(bytes) {
            Ok(value) => Decoded::Value(value),
            Err(e) => {
                warn!("Failed to decode object of type {}: {}", type_id, e.message);
                Decoded::Diagnostic(format!("Error parsing object data: {}", e.message))
            }
        })
    }

    /// Decode every item in order, one result per input.
    pub fn decode_batch<'a, I>(&self, items: I) -> Vec<Option<Decoded>>
    where
        I: IntoIterator<Item = (u32, &'a [u8])>,
    {
        items
            .into_iter()
            .map(|(type_id, bytes)| self.decode(type_id, bytes))
            .collect()
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.decoders.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("DecoderRegistry").field("types", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Item {
        def_index: u32,
        quality: u8,
    }

    fn registry() -> DecoderRegistry {
        let mut registry = DecoderRegistry::new();
        registry.register_json::<Item>(1);
        registry.register(2, |bytes| {
            std::str::from_utf8(bytes)
                .map(|s| Value::String(s.to_string()))
                .map_err(|e| DecodeError::for_type(2, e.to_string()))
        });
        registry
    }

    #[test]
    fn test_unknown_type_is_none() {
        assert!(registry().decode(99, b"{}").is_none());
    }

    #[test]
    fn test_decodes_registered_types() {
        let registry = registry();
        let item = registry
            .decode(1, br#"{"def_index": 5, "quality": 3}"#)
            .unwrap();
        assert_eq!(
            item.value().unwrap(),
            &serde_json::json!({"def_index": 5, "quality": 3})
        );

        let text = registry.decode(2, b"hello").unwrap();
        assert_eq!(text, Decoded::Value(Value::String("hello".into())));
    }

    #[test]
    fn test_bad_item_becomes_diagnostic() {
        let decoded = registry().decode(1, b"not json").unwrap();
        match decoded {
            Decoded::Diagnostic(message) => {
                assert!(message.starts_with("Error parsing object data: "))
            }
            other => panic!("expected diagnostic, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_keeps_going_past_failures() {
        let registry = registry();
        let good = br#"{"def_index": 1, "quality": 0}"#.as_slice();
        let results = registry.decode_batch(vec![
            (1, good),
            (1, b"{".as_slice()),
            (7, b"".as_slice()),
            (2, b"tail".as_slice()),
        ]);

        assert_eq!(results.len(), 4);
        assert!(results[0].as_ref().unwrap().is_value());
        assert!(!results[1].as_ref().unwrap().is_value());
        assert!(results[2].is_none());
        assert!(results[3].as_ref().unwrap().is_value());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(DecodeError::new("bad").to_string(), "Decode error: bad");
        assert_eq!(
            DecodeError::for_type(4, "bad").to_string(),
            "Decode error for type 4: bad"
        );
    }
}
