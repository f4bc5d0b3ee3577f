//! Token budget optimization - compress a message set to fit a budget.
//!
//! # Overview
//!
//! ```text
//! messages ──> utilization check ──> strategy ──> techniques ──> (fit?) ──> out
//!                tokens/budget         │                            │
//!                                      │                            └─ hard
//!              CONSERVATIVE  <= 0.80   │                               truncation
//!              BALANCED      >  0.80   │                               (degraded)
//!              AGGRESSIVE    >  0.90 ──┘
//! ```
//!
//! Strategy picks how many techniques run, in a fixed order of increasing
//! fidelity loss:
//!
//! 1. Whitespace normalization (free)
//! 2. Redundancy elimination (quality cost 0.05)
//! 3. Abbreviation substitution (quality cost 0.10)
//! 4. Stop-word removal (quality cost 0.10)
//!
//! CONSERVATIVE applies only the first, BALANCED the first three, AGGRESSIVE
//! all four. A `complex` task never runs AGGRESSIVE; it is downgraded to
//! BALANCED so correctness-critical prompts keep their wording.
//!
//! The optimizer never fails. If the chosen techniques still leave the set
//! over budget it hard-truncates to the token limit, keeps the most recent
//! messages, and flags the result as degraded. The quality score is advisory
//! metadata for the caller, not a gate.
//!
//! # Example
//!
//! ```rust
//! use llm_conductor::catalog::ComplexityTier;
//! use llm_conductor::optimizer::{TokenBudget, TokenBudgetOptimizer};
//! use llm_conductor::tokenizer::Tokenizer;
//! use llm_conductor::transport::ChatMessage;
//!
//! let optimizer = TokenBudgetOptimizer::new();
//! let tokenizer = Tokenizer::default_tokenizer();
//! let messages = vec![ChatMessage::user("Summarize   this    text")];
//!
//! let (optimized, report) = optimizer.optimize(
//!     &messages,
//!     &TokenBudget::new(1000),
//!     ComplexityTier::Simple,
//!     &tokenizer,
//! );
//! assert_eq!(report.quality_score, 1.0);
//! assert_eq!(optimized[0].content, "Summarize this text");
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::ComplexityTier;
use crate::tokenizer::{Tokenizer, MESSAGE_OVERHEAD_TOKENS};
use crate::transport::ChatMessage;

// ============================================================================
// Budget
// ============================================================================

/// Token ceiling for one request, input and expected output combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Maximum total tokens the optimized message set may occupy.
    pub max_total_tokens: usize,
}

impl TokenBudget {
    pub fn new(max_total_tokens: usize) -> Self {
        Self { max_total_tokens }
    }
}

// ============================================================================
// Strategy & Techniques
// ============================================================================

/// How aggressively to compress, derived from budget utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    Conservative,
    Balanced,
    Aggressive,
}

impl OptimizationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStrategy::Conservative => "conservative",
            OptimizationStrategy::Balanced => "balanced",
            OptimizationStrategy::Aggressive => "aggressive",
        }
    }

    /// Techniques this strategy runs, in application order.
    pub fn techniques(&self) -> &'static [CompressionTechnique] {
        match self {
            OptimizationStrategy::Conservative => &TECHNIQUE_ORDER[..1],
            OptimizationStrategy::Balanced => &TECHNIQUE_ORDER[..3],
            OptimizationStrategy::Aggressive => &TECHNIQUE_ORDER[..],
        }
    }
}

impl std::fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lossy (or lossless) transformation of the message set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionTechnique {
    /// Collapse whitespace runs. Lossless for model purposes.
    WhitespaceNormalization,
    /// Drop sentences repeated across the message set.
    RedundancyElimination,
    /// Replace known long phrases with shorter canonical forms.
    AbbreviationSubstitution,
    /// Remove filler words. The bluntest technique, AGGRESSIVE only.
    StopWordRemoval,
}

/// Application order, least to most destructive.
pub const TECHNIQUE_ORDER: [CompressionTechnique; 4] = [
    CompressionTechnique::WhitespaceNormalization,
    CompressionTechnique::RedundancyElimination,
    CompressionTechnique::AbbreviationSubstitution,
    CompressionTechnique::StopWordRemoval,
];

impl CompressionTechnique {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionTechnique::WhitespaceNormalization => "whitespace_normalization",
            CompressionTechnique::RedundancyElimination => "redundancy_elimination",
            CompressionTechnique::AbbreviationSubstitution => "abbreviation_substitution",
            CompressionTechnique::StopWordRemoval => "stop_word_removal",
        }
    }

    fn apply(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        match self {
            CompressionTechnique::WhitespaceNormalization => messages
                .iter()
                .map(|m| m.with_content(normalize_whitespace(&m.content)))
                .collect(),
            CompressionTechnique::RedundancyElimination => eliminate_redundancy(messages),
            CompressionTechnique::AbbreviationSubstitution => messages
                .iter()
                .map(|m| m.with_content(substitute_abbreviations(&m.content)))
                .collect(),
            CompressionTechnique::StopWordRemoval => messages
                .iter()
                .map(|m| m.with_content(remove_stop_words(&m.content)))
                .collect(),
        }
    }
}

impl std::fmt::Display for CompressionTechnique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Tunable thresholds and quality costs.
///
/// The deductions are heuristic constants, not derived quantities, so they
/// live in configuration rather than in the code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Utilization above which strategy becomes AGGRESSIVE.
    pub emergency_threshold: f64,

    /// Utilization above which strategy becomes BALANCED.
    pub balanced_threshold: f64,

    /// Quality cost of whitespace normalization.
    pub whitespace_cost: f64,

    /// Quality cost of redundancy elimination.
    pub redundancy_cost: f64,

    /// Quality cost of abbreviation substitution.
    pub abbreviation_cost: f64,

    /// Quality cost of stop-word removal.
    pub stop_word_cost: f64,

    /// Compression ratio below which the extra `ratio_penalty` applies.
    pub ratio_floor: f64,

    /// Extra quality deduction for compressing past `ratio_floor`.
    pub ratio_penalty: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            emergency_threshold: 0.90,
            balanced_threshold: 0.80,
            whitespace_cost: 0.0,
            redundancy_cost: 0.05,
            abbreviation_cost: 0.10,
            stop_word_cost: 0.10,
            ratio_floor: 0.5,
            ratio_penalty: 0.20,
        }
    }
}

impl OptimizerConfig {
    /// Quality cost charged for one technique.
    pub fn quality_cost(&self, technique: CompressionTechnique) -> f64 {
        match technique {
            CompressionTechnique::WhitespaceNormalization => self.whitespace_cost,
            CompressionTechnique::RedundancyElimination => self.redundancy_cost,
            CompressionTechnique::AbbreviationSubstitution => self.abbreviation_cost,
            CompressionTechnique::StopWordRemoval => self.stop_word_cost,
        }
    }
}

// ============================================================================
// Result
// ============================================================================

/// What one optimization pass did and what it is expected to have cost in
/// fidelity. Advisory metadata; the orchestrator forwards it to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Token count of the input message set.
    pub original_token_count: usize,

    /// Token count after all techniques (and any truncation).
    pub optimized_token_count: usize,

    /// Techniques run, in application order.
    pub techniques_applied: Vec<CompressionTechnique>,

    /// Estimated remaining fidelity in `[0, 1]`, 1.0 = untouched meaning.
    pub quality_score: f64,

    /// Strategy chosen for this pass.
    pub strategy: OptimizationStrategy,

    /// True when hard truncation was needed to meet the budget.
    pub degraded: bool,
}

impl OptimizationResult {
    /// optimized / original token ratio; 1.0 for empty input.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_token_count == 0 {
            1.0
        } else {
            self.optimized_token_count as f64 / self.original_token_count as f64
        }
    }
}

// ============================================================================
// Optimizer
// ============================================================================

/// Stateless compression pipeline over chat message sets.
#[derive(Debug, Clone, Default)]
pub struct TokenBudgetOptimizer {
    config: OptimizerConfig,
}

impl TokenBudgetOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Strategy for a given budget utilization and task tier.
    ///
    /// `complex` tasks cap out at BALANCED regardless of pressure.
    pub fn strategy_for(
        &self,
        utilization: f64,
        complexity_tier: ComplexityTier,
    ) -> OptimizationStrategy {
        let computed = if utilization > self.config.emergency_threshold {
            OptimizationStrategy::Aggressive
        } else if utilization > self.config.balanced_threshold {
            OptimizationStrategy::Balanced
        } else {
            OptimizationStrategy::Conservative
        };

        if complexity_tier == ComplexityTier::Complex
            && computed == OptimizationStrategy::Aggressive
        {
            OptimizationStrategy::Balanced
        } else {
            computed
        }
    }

    /// Compress `messages` toward `budget` and report the expected quality.
    ///
    /// Never fails: a set that still exceeds the budget after every
    /// technique is hard-truncated (most recent messages kept) and the
    /// result is marked degraded.
    pub fn optimize(
        &self,
        messages: &[ChatMessage],
        budget: &TokenBudget,
        complexity_tier: ComplexityTier,
        tokenizer: &Tokenizer,
    ) -> (Vec<ChatMessage>, OptimizationResult) {
        let original_token_count = tokenizer.count_messages(messages);
        let utilization = original_token_count as f64 / budget.max_total_tokens.max(1) as f64;
        let strategy = self.strategy_for(utilization, complexity_tier);

        let mut optimized: Vec<ChatMessage> = messages.to_vec();
        let mut techniques_applied = Vec::new();
        for technique in strategy.techniques() {
            optimized = technique.apply(&optimized);
            techniques_applied.push(*technique);
        }

        let mut degraded = false;
        let mut optimized_token_count = tokenizer.count_messages(&optimized);
        if optimized_token_count > budget.max_total_tokens {
            optimized = truncate_to_budget(optimized, budget.max_total_tokens, tokenizer);
            optimized_token_count = tokenizer.count_messages(&optimized);
            degraded = true;
        }

        let technique_cost: f64 = techniques_applied
            .iter()
            .map(|t| self.config.quality_cost(*t))
            .sum();
        let ratio = if original_token_count == 0 {
            1.0
        } else {
            optimized_token_count as f64 / original_token_count as f64
        };
        let mut quality_score = 1.0 - technique_cost;
        if ratio < self.config.ratio_floor {
            quality_score -= self.config.ratio_penalty;
        }
        let quality_score = quality_score.clamp(0.0, 1.0);

        debug!(
            strategy = %strategy,
            original = original_token_count,
            optimized = optimized_token_count,
            quality = quality_score,
            degraded,
            "token budget optimization complete"
        );

        (
            optimized,
            OptimizationResult {
                original_token_count,
                optimized_token_count,
                techniques_applied,
                quality_score,
                strategy,
                degraded,
            },
        )
    }
}

// ============================================================================
// Techniques: implementations
// ============================================================================

/// Collapse runs of spaces and tabs; cap blank-line runs at one.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(collapsed);
    }
    // Trim leading/trailing blank lines.
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Drop sentences already seen earlier in the message set.
fn eliminate_redundancy(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut seen: HashSet<String> = HashSet::new();
    messages
        .iter()
        .map(|message| {
            let kept: Vec<String> = split_sentences(&message.content)
                .into_iter()
                .filter(|sentence| {
                    let key = sentence
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .to_lowercase();
                    key.is_empty() || seen.insert(key)
                })
                .collect();
            message.with_content(kept.join(" "))
        })
        .collect()
}

/// Split on sentence terminators, keeping the terminator with its sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Long-phrase to short-form dictionary, matched case-insensitively on word
/// boundaries.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("as soon as possible", "ASAP"),
    ("due to the fact that", "because"),
    ("in the event that", "if"),
    ("at this point in time", "now"),
    ("it is important to note that", "note that"),
    ("in order to", "to"),
    ("with the exception of", "except"),
    ("a large number of", "many"),
    ("the majority of", "most"),
    ("in addition to", "besides"),
    ("with regard to", "regarding"),
    ("for example", "e.g."),
    ("that is to say", "i.e."),
    ("approximately", "about"),
];

fn substitute_abbreviations(text: &str) -> String {
    let mut result = text.to_string();
    for (phrase, replacement) in ABBREVIATIONS {
        result = replace_phrase(&result, phrase, replacement);
    }
    result
}

/// Case-insensitive whole-phrase replacement. The dictionary is ASCII, so
/// byte offsets from the lowercased copy are valid in the original.
fn replace_phrase(text: &str, phrase: &str, replacement: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let needle = phrase.to_ascii_lowercase();
    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(offset) = lower[cursor..].find(&needle) {
        let start = cursor + offset;
        let end = start + needle.len();
        let bounded_before =
            start == 0 || !lower.as_bytes()[start - 1].is_ascii_alphanumeric();
        let bounded_after = end == lower.len() || !lower.as_bytes()[end].is_ascii_alphanumeric();
        if bounded_before && bounded_after {
            result.push_str(&text[cursor..start]);
            result.push_str(replacement);
            cursor = end;
        } else {
            // Matched inside a word; emit one byte of the false match and
            // keep scanning. The needle starts with an ASCII byte, so this
            // stays on a char boundary.
            result.push_str(&text[cursor..start + 1]);
            cursor = start + 1;
        }
    }
    result.push_str(&text[cursor..]);
    result
}

/// Filler words removed by the AGGRESSIVE path.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "very", "really",
    "quite", "rather", "just", "simply", "actually", "basically", "certainly", "definitely",
    "indeed", "perhaps", "somewhat",
];

fn remove_stop_words(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.split_whitespace()
                .filter(|word| {
                    let bare: String = word
                        .trim_matches(|c: char| !c.is_alphanumeric())
                        .to_lowercase();
                    !STOP_WORDS.contains(&bare.as_str())
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep the most recent messages that fit; truncate the first one that does
/// not and drop everything older.
fn truncate_to_budget(
    messages: Vec<ChatMessage>,
    max_total_tokens: usize,
    tokenizer: &Tokenizer,
) -> Vec<ChatMessage> {
    let mut kept: Vec<ChatMessage> = Vec::new();
    let mut remaining = max_total_tokens;

    for message in messages.into_iter().rev() {
        if remaining <= MESSAGE_OVERHEAD_TOKENS {
            break;
        }
        let cost = tokenizer.count_tokens(&message.content) + MESSAGE_OVERHEAD_TOKENS;
        if cost <= remaining {
            remaining -= cost;
            kept.push(message);
        } else {
            let allowance = remaining - MESSAGE_OVERHEAD_TOKENS;
            let content = tokenizer.truncate(&message.content, allowance);
            kept.push(message.with_content(content));
            break;
        }
    }

    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimizer() -> TokenBudgetOptimizer {
        TokenBudgetOptimizer::new()
    }

    fn tokenizer() -> Tokenizer {
        Tokenizer::default_tokenizer()
    }

    /// About two thousand tokens of highly redundant prose.
    fn redundant_messages() -> Vec<ChatMessage> {
        let sentence = "The quick brown fox jumps over the lazy dog near the river bank. ";
        vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user(sentence.repeat(130)),
        ]
    }

    #[test]
    fn test_strategy_thresholds() {
        let opt = optimizer();
        let tier = ComplexityTier::Simple;
        assert_eq!(opt.strategy_for(0.50, tier), OptimizationStrategy::Conservative);
        assert_eq!(opt.strategy_for(0.80, tier), OptimizationStrategy::Conservative);
        assert_eq!(opt.strategy_for(0.85, tier), OptimizationStrategy::Balanced);
        assert_eq!(opt.strategy_for(0.90, tier), OptimizationStrategy::Balanced);
        assert_eq!(opt.strategy_for(0.95, tier), OptimizationStrategy::Aggressive);
        assert_eq!(opt.strategy_for(2.00, tier), OptimizationStrategy::Aggressive);
    }

    #[test]
    fn test_complex_tier_caps_at_balanced() {
        let opt = optimizer();
        assert_eq!(
            opt.strategy_for(0.95, ComplexityTier::Complex),
            OptimizationStrategy::Balanced
        );
        // The cap only touches the AGGRESSIVE case.
        assert_eq!(
            opt.strategy_for(0.85, ComplexityTier::Complex),
            OptimizationStrategy::Balanced
        );
        assert_eq!(
            opt.strategy_for(0.50, ComplexityTier::Complex),
            OptimizationStrategy::Conservative
        );
    }

    #[test]
    fn test_strategy_technique_sets() {
        assert_eq!(OptimizationStrategy::Conservative.techniques().len(), 1);
        assert_eq!(OptimizationStrategy::Balanced.techniques().len(), 3);
        assert_eq!(OptimizationStrategy::Aggressive.techniques().len(), 4);
        assert_eq!(
            OptimizationStrategy::Aggressive.techniques(),
            &TECHNIQUE_ORDER
        );
    }

    #[test]
    fn test_over_budget_simple_task_applies_all_four() {
        let tok = tokenizer();
        let messages = redundant_messages();
        // ~2000 tokens against a 1000-token budget.
        let budget = TokenBudget::new(1000);

        let (_, report) =
            optimizer().optimize(&messages, &budget, ComplexityTier::Simple, &tok);

        assert_eq!(report.strategy, OptimizationStrategy::Aggressive);
        assert_eq!(report.techniques_applied, TECHNIQUE_ORDER.to_vec());
        // 1.0 - 0.05 - 0.10 - 0.10, minus 0.20 more if ratio < 0.5.
        assert!(report.quality_score <= 0.65 + 1e-9);
        assert!(report.optimized_token_count < report.original_token_count);
    }

    #[test]
    fn test_over_budget_complex_task_applies_first_three() {
        let tok = tokenizer();
        let messages = redundant_messages();
        let budget = TokenBudget::new(1000);

        let (_, report) =
            optimizer().optimize(&messages, &budget, ComplexityTier::Complex, &tok);

        assert_eq!(report.strategy, OptimizationStrategy::Balanced);
        assert_eq!(report.techniques_applied, TECHNIQUE_ORDER[..3].to_vec());
        assert!(!report
            .techniques_applied
            .contains(&CompressionTechnique::StopWordRemoval));
    }

    #[test]
    fn test_heavy_redundancy_triggers_ratio_penalty() {
        let tok = tokenizer();
        let messages = redundant_messages();
        let budget = TokenBudget::new(1000);

        let (_, report) =
            optimizer().optimize(&messages, &budget, ComplexityTier::Simple, &tok);

        // 129 duplicate sentences disappear, so the ratio lands far below
        // the floor: 1.0 - 0.25 - 0.20.
        assert!(report.compression_ratio() < 0.5);
        assert!((report.quality_score - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_under_budget_stays_conservative_and_pristine() {
        let tok = tokenizer();
        let messages = vec![ChatMessage::user("A short,   tidy request")];
        let (optimized, report) = optimizer().optimize(
            &messages,
            &TokenBudget::new(10_000),
            ComplexityTier::Simple,
            &tok,
        );

        assert_eq!(report.strategy, OptimizationStrategy::Conservative);
        assert_eq!(
            report.techniques_applied,
            vec![CompressionTechnique::WhitespaceNormalization]
        );
        assert_eq!(report.quality_score, 1.0);
        assert!(!report.degraded);
        assert_eq!(optimized[0].content, "A short, tidy request");
    }

    #[test]
    fn test_quality_non_increasing_with_more_techniques() {
        let tok = tokenizer();
        let messages = redundant_messages();
        let original = tok.count_messages(&messages);

        // Budgets engineered to land in each band for this same input.
        let conservative_budget = TokenBudget::new(original * 2);
        let balanced_budget = TokenBudget::new(original * 100 / 85);
        let aggressive_budget = TokenBudget::new(original * 100 / 120);

        let opt = optimizer();
        let (_, c) = opt.optimize(&messages, &conservative_budget, ComplexityTier::Simple, &tok);
        let (_, b) = opt.optimize(&messages, &balanced_budget, ComplexityTier::Simple, &tok);
        let (_, a) = opt.optimize(&messages, &aggressive_budget, ComplexityTier::Simple, &tok);

        assert_eq!(c.strategy, OptimizationStrategy::Conservative);
        assert_eq!(b.strategy, OptimizationStrategy::Balanced);
        assert_eq!(a.strategy, OptimizationStrategy::Aggressive);
        assert!(c.quality_score >= b.quality_score);
        assert!(b.quality_score >= a.quality_score);
    }

    #[test]
    fn test_hard_truncation_marks_degraded() {
        let tok = tokenizer();
        let messages = vec![
            ChatMessage::system("Keep answers short."),
            ChatMessage::user("word ".repeat(500)),
        ];
        let budget = TokenBudget::new(40);

        let (optimized, report) =
            optimizer().optimize(&messages, &budget, ComplexityTier::Simple, &tok);

        assert!(report.degraded);
        assert!(report.optimized_token_count <= 40);
        assert!(tok.count_messages(&optimized) <= 40);
        // Newest message survives truncation in preference to older ones.
        assert!(!optimized.is_empty());
        assert_eq!(
            optimized.last().map(|m| m.role),
            Some(crate::transport::ChatRole::User)
        );
    }

    #[test]
    fn test_empty_messages_are_a_no_op() {
        let tok = tokenizer();
        let (optimized, report) =
            optimizer().optimize(&[], &TokenBudget::new(100), ComplexityTier::Simple, &tok);
        assert!(optimized.is_empty());
        assert_eq!(report.original_token_count, 0);
        assert_eq!(report.optimized_token_count, 0);
        assert_eq!(report.quality_score, 1.0);
        assert!(!report.degraded);
        assert_eq!(report.compression_ratio(), 1.0);
    }

    #[test]
    fn test_quality_clamps_at_zero() {
        let mut config = OptimizerConfig::default();
        config.redundancy_cost = 0.9;
        config.abbreviation_cost = 0.9;
        let opt = TokenBudgetOptimizer::with_config(config);
        let tok = tokenizer();

        let (_, report) = opt.optimize(
            &redundant_messages(),
            &TokenBudget::new(1000),
            ComplexityTier::Simple,
            &tok,
        );
        assert_eq!(report.quality_score, 0.0);
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("a   b\t\tc"), "a b c");
        assert_eq!(normalize_whitespace("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(normalize_whitespace("  padded  "), "padded");
        assert_eq!(normalize_whitespace(""), "");
    }

    #[test]
    fn test_eliminate_redundancy_across_messages() {
        let messages = vec![
            ChatMessage::user("The sky is blue. Water is wet."),
            ChatMessage::user("The sky is blue. Grass is green."),
        ];
        let deduped = eliminate_redundancy(&messages);
        assert_eq!(deduped[0].content, "The sky is blue. Water is wet.");
        assert_eq!(deduped[1].content, "Grass is green.");
    }

    #[test]
    fn test_substitute_abbreviations() {
        assert_eq!(
            substitute_abbreviations("Reply as soon as possible, please."),
            "Reply ASAP, please."
        );
        assert_eq!(
            substitute_abbreviations("Due to the fact that it rained, we stayed."),
            "because it rained, we stayed."
        );
        // No replacement inside larger words.
        assert_eq!(
            substitute_abbreviations("approximately"),
            "about"
        );
        assert_eq!(
            substitute_abbreviations("disapproximately"),
            "disapproximately"
        );
    }

    #[test]
    fn test_remove_stop_words() {
        assert_eq!(
            remove_stop_words("The answer is really quite simple"),
            "answer simple"
        );
        assert_eq!(remove_stop_words("keep: every, word"), "keep: every, word");
    }

    #[test]
    fn test_truncate_keeps_most_recent_messages() {
        let tok = tokenizer();
        let messages = vec![
            ChatMessage::user("old ".repeat(100)),
            ChatMessage::user("recent message"),
        ];
        let kept = truncate_to_budget(messages, 20, &tok);
        assert_eq!(kept.last().map(|m| m.content.as_str()), Some("recent message"));
        assert!(tok.count_messages(&kept) <= 20);
    }

    #[test]
    fn test_result_serializes_snake_case() {
        let report = OptimizationResult {
            original_token_count: 100,
            optimized_token_count: 60,
            techniques_applied: vec![CompressionTechnique::WhitespaceNormalization],
            quality_score: 1.0,
            strategy: OptimizationStrategy::Conservative,
            degraded: false,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"conservative\""));
        assert!(json.contains("\"whitespace_normalization\""));
    }
}
