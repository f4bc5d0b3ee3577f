//! Token counting and truncation.
//!
//! Budget decisions in the optimizer and throughput accounting in the rate
//! governor both run on token counts, so estimation uses real BPE encoders
//! rather than byte heuristics. Unknown models fall back to `cl100k_base`,
//! which over- or under-counts by a few percent at worst; budget checks
//! treat counts as estimates, never as exact provider-side accounting.

use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

use crate::transport::ChatMessage;

/// Fixed token overhead per chat message for role markers and separators.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Token counter bound to one model family's encoding.
pub struct Tokenizer {
    encoder: CoreBPE,
    model: String,
}

impl Tokenizer {
    /// Create a tokenizer for a specific model.
    ///
    /// Falls back to cl100k_base (GPT-4/3.5 tokenizer) if model is unknown.
    pub fn for_model(model: &str) -> Self {
        let encoder = match model {
            // GPT-4o and newer use o200k.
            m if m.contains("gpt-4o") || m.contains("o1") || m.contains("o3") => {
                o200k_base().expect("Failed to load o200k tokenizer")
            }
            // Everything else, including unknown models, uses cl100k.
            _ => cl100k_base().expect("Failed to load cl100k tokenizer"),
        };

        Self {
            encoder,
            model: model.to_string(),
        }
    }

    /// Create a default tokenizer using cl100k_base.
    pub fn default_tokenizer() -> Self {
        Self {
            encoder: cl100k_base().expect("Failed to load cl100k tokenizer"),
            model: "default".to_string(),
        }
    }

    /// Count the number of tokens in the text.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.encoder.encode_with_special_tokens(text).len()
    }

    /// Count the tokens of a whole message set, including the fixed
    /// per-message overhead.
    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        messages
            .iter()
            .map(|m| self.count_tokens(&m.content) + MESSAGE_OVERHEAD_TOKENS)
            .sum()
    }

    /// Encode text to token IDs.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.encoder.encode_with_special_tokens(text)
    }

    /// Decode token IDs back to text.
    pub fn decode(&self, tokens: &[u32]) -> String {
        self.encoder.decode(tokens.to_vec()).unwrap_or_default()
    }

    /// Truncate text to fit within a token limit.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.encode(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        self.decode(&tokens[..max_tokens])
    }

    /// Get the model this tokenizer is configured for.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::default_tokenizer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_counting() {
        let tokenizer = Tokenizer::default_tokenizer();
        let text = "Hello, world!";
        let count = tokenizer.count_tokens(text);
        assert!(count > 0);
        assert!(count < text.len()); // Tokens are typically longer than bytes
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let tokenizer = Tokenizer::default_tokenizer();
        let text = "This is a test sentence.";
        let tokens = tokenizer.encode(text);
        let decoded = tokenizer.decode(&tokens);
        assert_eq!(decoded, text);
    }

    #[test]
    fn test_truncate() {
        let tokenizer = Tokenizer::default_tokenizer();
        let text = "This is a longer sentence that should be truncated.";
        let truncated = tokenizer.truncate(text, 5);
        let token_count = tokenizer.count_tokens(&truncated);
        assert!(token_count <= 5);
    }

    #[test]
    fn test_truncate_within_limit() {
        let tokenizer = Tokenizer::default_tokenizer();
        let text = "Hello";
        let truncated = tokenizer.truncate(text, 100);
        assert_eq!(truncated, text);
    }

    #[test]
    fn test_count_messages_adds_fixed_overhead() {
        let tokenizer = Tokenizer::default_tokenizer();
        let messages = vec![
            ChatMessage::system("You are helpful."),
            ChatMessage::user("Summarize this paragraph."),
        ];
        let content_only: usize = messages
            .iter()
            .map(|m| tokenizer.count_tokens(&m.content))
            .sum();
        assert_eq!(
            tokenizer.count_messages(&messages),
            content_only + 2 * MESSAGE_OVERHEAD_TOKENS
        );
    }

    #[test]
    fn test_count_messages_empty() {
        let tokenizer = Tokenizer::default_tokenizer();
        assert_eq!(tokenizer.count_messages(&[]), 0);
    }

    #[test]
    fn test_model_specific_tokenizer() {
        let gpt4 = Tokenizer::for_model("gpt-4");
        let gpt4o = Tokenizer::for_model("gpt-4o");

        // Both should be able to tokenize
        let text = "Hello, world!";
        assert!(gpt4.count_tokens(text) > 0);
        assert!(gpt4o.count_tokens(text) > 0);
    }

    #[test]
    fn test_for_model_unknown_falls_back() {
        let t = Tokenizer::for_model("some-unknown-model");
        assert_eq!(t.model(), "some-unknown-model");
        assert!(t.count_tokens("Hello") > 0);
    }

    #[test]
    fn test_default_impl() {
        let t = Tokenizer::default();
        assert_eq!(t.model(), "default");
        assert!(t.count_tokens("Hello") > 0);
    }

    #[test]
    fn test_empty_string() {
        let tokenizer = Tokenizer::default_tokenizer();
        assert_eq!(tokenizer.count_tokens(""), 0);
        assert!(tokenizer.encode("").is_empty());
    }

    #[test]
    fn test_decode_empty() {
        let tokenizer = Tokenizer::default_tokenizer();
        let decoded = tokenizer.decode(&[]);
        assert_eq!(decoded, "");
    }
}
