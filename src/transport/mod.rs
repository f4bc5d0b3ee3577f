//! Transport capability - pluggable provider I/O.
//!
//! # Purpose
//!
//! All network I/O to LLM providers goes through the [`Transport`] trait.
//! The orchestration core never embeds a provider SDK; the host supplies one
//! `Transport` implementation per provider family and registers it under the
//! catalog's `provider_id`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              TransportRegistry                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─ openai:    Arc<dyn Transport>   (host-supplied)         │
//! │  ├─ anthropic: Arc<dyn Transport>   (host-supplied)         │
//! │  ├─ ollama:    Arc<dyn Transport>   (host-supplied)         │
//! │  └─ mock:      Arc<dyn Transport>   (built-in, tests)       │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Why a capability interface?
//!
//! Instead of a central enum dispatching on provider type:
//! - **Extensibility**: new providers need no change to the coordinator
//! - **Pluggability**: hosts register custom transports at runtime
//! - **Decoupling**: the core depends on one trait, not on vendor crates
//! - **Testing**: [`MockTransport`] scripts outcomes deterministically
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use llm_conductor::transport::{MockTransport, TransportRegistry};
//!
//! let mut registry = TransportRegistry::new();
//! registry.register("mock", Arc::new(MockTransport::new("mock")));
//! assert!(registry.has("mock"));
//! assert_eq!(registry.count(), 1);
//! ```

pub mod mock;

pub use mock::{MockOutcome, MockTransport};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

// ============================================================================
// Chat Messages
// ============================================================================

/// Role of a chat message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System message for setting context.
    System,
    /// User input message.
    User,
    /// Assistant response message.
    Assistant,
}

impl ChatRole {
    /// Convert role to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: ChatRole,

    /// Content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    /// Same role, new content. Used by the optimizer's rewriting passes.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            role: self.role,
            content: content.into(),
        }
    }
}

// ============================================================================
// Request / Reply
// ============================================================================

/// Token counts reported for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One attempt's worth of input handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Catalog id of the provider to call.
    pub provider_id: String,

    /// Model name as the provider knows it.
    pub model_name: String,

    /// Messages to send, already optimized against the token budget.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature.
    pub temperature: f32,

    /// Output token allowance for this attempt.
    pub max_tokens: usize,
}

impl TransportRequest {
    pub fn new(
        provider_id: impl Into<String>,
        model_name: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_name: model_name.into(),
            messages,
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Successful completion returned by a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// Generated content.
    pub content: String,

    /// Token accounting, as reported by the provider.
    pub usage: TokenUsage,

    /// Provider-specific extras (finish reason, system fingerprint, ...),
    /// passed through to the caller untouched.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TransportReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            metadata: HashMap::new(),
        }
    }

    /// Set token usage.
    pub fn with_usage(mut self, prompt_tokens: usize, completion_tokens: usize) -> Self {
        self.usage = TokenUsage::new(prompt_tokens, completion_tokens);
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Capability interface for sending one completion request to one provider.
///
/// Implementations live in the host application, one per provider family.
/// They translate [`TransportRequest`] into the vendor's wire format and map
/// failures into [`ProviderError`] so classification stays uniform
/// (`ProviderError::from_status` and the `From<reqwest::Error>` impl cover
/// the common HTTP cases).
///
/// Implementations must be cancel-safe: the coordinator may drop the future
/// mid-flight on timeout or caller disconnect.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name of the provider family, for logs.
    fn name(&self) -> &str;

    /// Send one request and return the completion or a classified failure.
    async fn send(&self, request: &TransportRequest) -> Result<TransportReply, ProviderError>;
}

// ============================================================================
// Transport Registry
// ============================================================================

/// Transports keyed by `provider_id` for O(1) lookup at dispatch time.
///
/// A catalog provider without a registered transport is skipped during
/// dispatch and reported in the exhaustion error, so a missing registration
/// shows up in diagnostics instead of silently shrinking the chain.
#[derive(Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport for a provider id.
    ///
    /// If a transport with the same id exists, it is replaced.
    pub fn register(&mut self, provider_id: impl Into<String>, transport: Arc<dyn Transport>) {
        self.transports.insert(provider_id.into(), transport);
    }

    /// Get the transport for a provider id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(provider_id).cloned()
    }

    /// Check whether a provider id has a transport.
    pub fn has(&self, provider_id: &str) -> bool {
        self.transports.contains_key(provider_id)
    }

    /// List all registered provider ids, in arbitrary order.
    pub fn list(&self) -> Vec<String> {
        self.transports.keys().cloned().collect()
    }

    /// Remove a transport, returning it if present.
    pub fn remove(&mut self, provider_id: &str) -> Option<Arc<dyn Transport>> {
        self.transports.remove(provider_id)
    }

    /// Number of registered transports.
    pub fn count(&self) -> usize {
        self.transports.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let msg = ChatMessage::system("You are terse.");
        assert_eq!(msg.role, ChatRole::System);
        assert_eq!(msg.content, "You are terse.");

        let msg = ChatMessage::user("Hello");
        assert_eq!(msg.role, ChatRole::User);

        let msg = ChatMessage::assistant("Hi");
        assert_eq!(msg.role, ChatRole::Assistant);
    }

    #[test]
    fn test_with_content_preserves_role() {
        let msg = ChatMessage::system("original").with_content("rewritten");
        assert_eq!(msg.role, ChatRole::System);
        assert_eq!(msg.content, "rewritten");
    }

    #[test]
    fn test_chat_role_as_str() {
        assert_eq!(ChatRole::System.as_str(), "system");
        assert_eq!(ChatRole::User.as_str(), "user");
        assert_eq!(ChatRole::Assistant.as_str(), "assistant");
    }

    #[test]
    fn test_chat_role_serde_lowercase() {
        let json = serde_json::to_string(&ChatRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: ChatRole = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, ChatRole::System);
    }

    #[test]
    fn test_token_usage_totals() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total_tokens, 150);

        let empty = TokenUsage::default();
        assert_eq!(empty.total_tokens, 0);
    }

    #[test]
    fn test_request_builder() {
        let request = TransportRequest::new("openai", "gpt-4o", vec![ChatMessage::user("hi")])
            .with_temperature(0.2)
            .with_max_tokens(256);
        assert_eq!(request.provider_id, "openai");
        assert_eq!(request.model_name, "gpt-4o");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, 256);
    }

    #[test]
    fn test_reply_builder() {
        let reply = TransportReply::new("answer")
            .with_usage(10, 5)
            .with_metadata("finish_reason", serde_json::json!("stop"));
        assert_eq!(reply.content, "answer");
        assert_eq!(reply.usage.total_tokens, 15);
        assert_eq!(
            reply.metadata.get("finish_reason"),
            Some(&serde_json::json!("stop"))
        );
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = TransportRegistry::new();
        assert!(registry.is_empty());

        registry.register("mock", Arc::new(MockTransport::new("mock")));
        assert!(registry.has("mock"));
        assert!(registry.get("mock").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_registry_list_and_remove() {
        let mut registry = TransportRegistry::new();
        registry.register("a", Arc::new(MockTransport::new("a")));
        registry.register("b", Arc::new(MockTransport::new("b")));

        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        assert!(registry.remove("a").is_some());
        assert!(!registry.has("a"));
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_registry_overwrite() {
        let mut registry = TransportRegistry::new();
        registry.register("mock", Arc::new(MockTransport::new("first")));
        registry.register("mock", Arc::new(MockTransport::new("second")));
        assert_eq!(registry.count(), 1);
        let transport = registry.get("mock").unwrap();
        assert_eq!(transport.name(), "second");
    }

    #[test]
    fn test_registry_get_returns_cloned_arc() {
        let mut registry = TransportRegistry::new();
        registry.register("mock", Arc::new(MockTransport::new("mock")));
        let t1 = registry.get("mock").unwrap();
        let t2 = registry.get("mock").unwrap();
        assert!(Arc::ptr_eq(&t1, &t2));
    }
}
