//! Message parser and taxonomy (spec §4.3).
//!
//! Decoding is deliberately not a plain `serde` derive on [`Message`]: an
//! extensible, keyed-by-`type` registry lets host code register parsers for
//! experimental message types without forking this crate, and lets unknown
//! types surface as [`Message::Unknown`] rather than a hard decode failure.
//! The framer supplies line numbers; this module is pure and stateless.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::RwLock;

use crate::error::ClaudeAgentError;
use crate::types::{
    AssistantMessage, ControlRequestMessage, ControlResponseMessage, Message, ResultMessage,
    StreamEventMessage, SystemMessage, UnknownMessage, UserMessage,
};

/// A registered decoder for one top-level `type` value.
pub type VariantParser = Arc<dyn Fn(serde_json::Value) -> Result<Message, ClaudeAgentError> + Send + Sync>;

/// Registry of `type` → decoder. Host code or higher-level adapters may
/// register parsers for experimental types (spec §4.3); a default instance
/// covering the built-in variants is available via [`default_registry`].
pub struct MessageRegistry {
    parsers: RwLock<HashMap<String, VariantParser>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        let registry = Self {
            parsers: RwLock::new(HashMap::new()),
        };
        registry.register_builtins_sync();
        registry
    }

    fn register_builtins_sync(&self) {
        let mut parsers = self.parsers.blocking_write_or_panic();
        parsers.insert("user".into(), variant_parser::<UserMessage>("user", Message::User));
        parsers.insert(
            "assistant".into(),
            variant_parser::<AssistantMessage>("assistant", Message::Assistant),
        );
        parsers.insert("system".into(), variant_parser::<SystemMessage>("system", Message::System));
        parsers.insert("result".into(), variant_parser::<ResultMessage>("result", Message::Result));
        parsers.insert(
            "stream_event".into(),
            variant_parser::<StreamEventMessage>("stream_event", Message::StreamEvent),
        );
        parsers.insert(
            "control_request".into(),
            variant_parser::<ControlRequestMessage>("control_request", Message::ControlRequest),
        );
        parsers.insert(
            "control_response".into(),
            variant_parser::<ControlResponseMessage>("control_response", Message::ControlResponse),
        );
    }

    /// Register (or override) the decoder for a `type` string.
    pub async fn register(&self, type_name: impl Into<String>, parser: VariantParser) {
        self.parsers.write().await.insert(type_name.into(), parser);
    }

    /// Decode one framed JSON object into a [`Message`].
    ///
    /// A JSON value lacking a non-empty `type` field is a [`ClaudeAgentError::MessageParse`].
    /// A `type` the registry doesn't know about decodes to [`Message::Unknown`]
    /// rather than failing, per spec §3's "surfaced as a typed unknown
    /// message" invariant.
    pub async fn decode(&self, value: serde_json::Value) -> Result<Message, ClaudeAgentError> {
        let type_name = value
            .get("type")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClaudeAgentError::MessageParse {
                expected_type: "<missing>".into(),
                data: value.clone(),
                reason: "message has no non-empty `type` field".into(),
            })?
            .to_string();

        let parser = self.parsers.read().await.get(&type_name).cloned();
        match parser {
            Some(parser) => parser(value),
            None => Ok(Message::Unknown(UnknownMessage {
                type_name,
                raw: value,
            })),
        }
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `blocking_write` doesn't exist on `tokio::sync::RwLock`; construction
/// happens before any task contends for the lock, so a best-effort
/// `try_write` is always available. Centralised here so the panic message
/// only needs to explain itself once.
trait RwLockBlockingInit<T> {
    fn blocking_write_or_panic(&self) -> tokio::sync::RwLockWriteGuard<'_, T>;
}

impl<T> RwLockBlockingInit<T> for RwLock<T> {
    fn blocking_write_or_panic(&self) -> tokio::sync::RwLockWriteGuard<'_, T> {
        self.try_write()
            .expect("MessageRegistry::new() is uncontended at construction time")
    }
}

fn variant_parser<T>(
    type_name: &'static str,
    wrap: fn(T) -> Message,
) -> VariantParser
where
    T: serde::de::DeserializeOwned + 'static,
{
    Arc::new(move |value| {
        serde_json::from_value::<T>(value.clone())
            .map(wrap)
            .map_err(|e| ClaudeAgentError::MessageParse {
                expected_type: type_name.to_string(),
                data: value,
                reason: e.to_string(),
            })
    })
}

/// Process-wide default registry, built once and shared by
/// [`crate::transport::Transport`] unless a caller constructs its own (spec
/// §9: "keep a convenience default for trivial use").
static DEFAULT_REGISTRY: Lazy<Arc<MessageRegistry>> = Lazy::new(|| Arc::new(MessageRegistry::new()));

pub fn default_registry() -> Arc<MessageRegistry> {
    DEFAULT_REGISTRY.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decodes_known_result_message() {
        let registry = MessageRegistry::new();
        let value = serde_json::json!({
            "type": "result",
            "subtype": "success",
            "session_id": "s1",
            "result": "done",
            "duration_ms": 1,
            "duration_api_ms": 1,
            "num_turns": 1
        });
        let msg = registry.decode(value).await.unwrap();
        assert!(matches!(msg, Message::Result(_)));
    }

    #[tokio::test]
    async fn unknown_type_surfaces_as_unknown_message() {
        let registry = MessageRegistry::new();
        let value = serde_json::json!({"type": "future_thing", "session_id": "s1"});
        let msg = registry.decode(value).await.unwrap();
        match msg {
            Message::Unknown(u) => assert_eq!(u.type_name, "future_thing"),
            _ => panic!("expected Unknown"),
        }
    }

    #[tokio::test]
    async fn missing_type_field_is_message_parse_error() {
        let registry = MessageRegistry::new();
        let value = serde_json::json!({"session_id": "s1"});
        let err = registry.decode(value).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MessageParse);
    }

    #[tokio::test]
    async fn malformed_shape_for_known_type_is_message_parse_error() {
        let registry = MessageRegistry::new();
        // `result` with subtype missing entirely — valid JSON, wrong shape.
        let value = serde_json::json!({"type": "result", "session_id": "s1"});
        let err = registry.decode(value).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MessageParse);
    }

    #[tokio::test]
    async fn host_can_register_experimental_type() {
        let registry = MessageRegistry::new();
        registry
            .register(
                "future_thing",
                variant_parser::<crate::types::SystemMessage>("future_thing", Message::System),
            )
            .await;
        let value = serde_json::json!({"type": "future_thing", "session_id": "s1", "subtype": "status", "status": "ok"});
        let msg = registry.decode(value).await.unwrap();
        assert!(matches!(msg, Message::System(_)));
    }
}
