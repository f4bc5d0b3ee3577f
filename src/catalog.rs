//! Model catalog - TOML-driven registry of provider and model descriptors.
//!
//! # Overview
//!
//! The catalog document (`models.toml`) defines:
//! - Providers (rate limits, priority, request timeout, fallback chain)
//! - Models per provider (cost per token, token budget, capabilities,
//!   complexity tier)
//!
//! Provider-level values (priority, rate limits) are inherited by each model
//! unless the model entry overrides them.
//!
//! # Configuration File Location
//!
//! The catalog is loaded from (in order of priority):
//! 1. `LLM_CONDUCTOR_CATALOG` environment variable
//! 2. `./models.toml` (current working directory)
//! 3. `~/.llm-conductor/models.toml` (user config)
//! 4. Built-in default catalog
//!
//! A missing file degrades to the built-in defaults; a malformed file fails
//! fast with a parse or validation error.
//!
//! # Example Configuration
//!
//! ```toml
//! [[providers]]
//! name = "openai"
//! priority = 10
//! requests_per_minute = 500
//! tokens_per_minute = 200000
//! timeout_secs = 60
//! fallback = ["anthropic"]
//!
//! [[providers.models]]
//! name = "gpt-4o"
//! cost_per_token = 0.0000025
//! max_tokens = 128000
//! temperature = 0.7
//! capabilities = ["chat", "code", "analysis"]
//! complexity_tier = "complex"
//! ```
//!
//! # Concurrency
//!
//! Readers take an `Arc` of an immutable [`CatalogSnapshot`]; `reload()`
//! builds a fresh snapshot and swaps the `Arc` wholesale, so in-flight
//! selections never observe a partially updated catalog.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming an explicit catalog path.
pub const CATALOG_ENV_VAR: &str = "LLM_CONDUCTOR_CATALOG";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading the catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Failed to read the catalog file.
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the TOML document.
    #[error("failed to parse catalog: {0}")]
    Parse(String),

    /// Document parsed but the contents are unusable.
    #[error("invalid catalog: {0}")]
    Validation(String),
}

// ============================================================================
// Complexity Tiers
// ============================================================================

/// Coarse classification of task difficulty, used both to gate model
/// eligibility and to cap optimization aggressiveness.
///
/// Ordering matters: a model's tier covers every task tier up to its own,
/// so a `complex` model serves `simple` tasks but not the other way around.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    #[default]
    Simple,
    Medium,
    Complex,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityTier::Simple => "simple",
            ComplexityTier::Medium => "medium",
            ComplexityTier::Complex => "complex",
        }
    }

    /// Whether a model of this tier can serve a task of `task_tier`.
    pub fn covers(&self, task_tier: ComplexityTier) -> bool {
        *self >= task_tier
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Model Descriptor
// ============================================================================

/// Fully resolved model entry, provider-level values already inherited.
///
/// Immutable once loaded. Identity is `(provider_id, model_name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// Catalog id of the owning provider.
    pub provider_id: String,

    /// Model name as the provider knows it.
    pub model_name: String,

    /// Cost per token in USD (blended input/output price).
    pub cost_per_token: f64,

    /// Maximum tokens for one request to this model, input and output.
    pub max_tokens: usize,

    /// Default sampling temperature.
    pub temperature: f32,

    /// Task types this model can serve.
    pub capabilities: BTreeSet<String>,

    /// Selection priority; lower value means higher preference.
    pub priority: u32,

    /// Highest task tier this model is trusted with.
    pub complexity_tier: ComplexityTier,

    /// Provider throughput cap, tokens per minute.
    pub tokens_per_minute: u32,

    /// Provider throughput cap, requests per minute.
    pub requests_per_minute: u32,

    /// Per-attempt timeout; the coordinator default applies when absent.
    pub request_timeout: Option<Duration>,
}

impl ModelDescriptor {
    /// Identity tuple for equality and lookups.
    pub fn identity(&self) -> (&str, &str) {
        (&self.provider_id, &self.model_name)
    }

    /// Whether this model declares the given capability.
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Whether this model's tier covers a task of `tier`.
    pub fn covers(&self, tier: ComplexityTier) -> bool {
        self.complexity_tier.covers(tier)
    }
}

impl fmt::Display for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_name)
    }
}

// ============================================================================
// Document Schema
// ============================================================================

/// One `[[providers.models]]` entry as written in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model name (e.g. "gpt-4o").
    pub name: String,

    /// Cost per token in USD.
    #[serde(default)]
    pub cost_per_token: f64,

    /// Token budget for one request.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Default sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Task types this model serves.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Override of the provider priority.
    #[serde(default)]
    pub priority: Option<u32>,

    /// Highest task tier this model is trusted with.
    #[serde(default)]
    pub complexity_tier: ComplexityTier,

    /// Override of the provider requests-per-minute cap.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,

    /// Override of the provider tokens-per-minute cap.
    #[serde(default)]
    pub tokens_per_minute: Option<u32>,
}

/// One `[[providers]]` entry as written in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Unique provider identifier (e.g. "openai").
    pub name: String,

    /// Selection priority inherited by models; lower = higher preference.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Providers to try, in order, after this one fails.
    #[serde(default)]
    pub fallback: Vec<String>,

    /// Requests-per-minute cap shared by this provider's models.
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,

    /// Tokens-per-minute cap shared by this provider's models.
    #[serde(default = "default_tpm")]
    pub tokens_per_minute: u32,

    /// Per-attempt timeout in seconds; coordinator default when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Whether this provider participates in selection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Models offered by this provider.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

fn default_priority() -> u32 {
    100
}

fn default_rpm() -> u32 {
    60
}

fn default_tpm() -> u32 {
    90_000
}

fn default_max_tokens() -> usize {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

/// Root structure of `models.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogDocument {
    /// Configured providers, in preference order for equal sort keys.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

impl CatalogDocument {
    /// Load the document from the default location chain.
    ///
    /// Searches in order: `LLM_CONDUCTOR_CATALOG` env var, `./models.toml`,
    /// `~/.llm-conductor/models.toml`, built-in defaults.
    pub fn load() -> Result<Self, CatalogError> {
        if let Ok(path) = std::env::var(CATALOG_ENV_VAR) {
            if Path::new(&path).exists() {
                debug!(path = %path, "loading catalog from {}", CATALOG_ENV_VAR);
                return Self::from_file(&path);
            }
        }

        let local_path = Path::new("models.toml");
        if local_path.exists() {
            debug!("loading catalog from ./models.toml");
            return Self::from_file(local_path);
        }

        if let Some(home) = dirs::home_dir() {
            let user_path = home.join(".llm-conductor").join("models.toml");
            if user_path.exists() {
                debug!(path = %user_path.display(), "loading catalog from user config");
                return Self::from_file(&user_path);
            }
        }

        debug!("no catalog file found, using built-in defaults");
        Ok(Self::builtin_defaults())
    }

    /// Load the document from a specific file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse the document from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, CatalogError> {
        toml::from_str(toml_str).map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// Serialize the document to a TOML string.
    pub fn to_toml(&self) -> Result<String, CatalogError> {
        toml::to_string_pretty(self).map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// Built-in default catalog: two hosted providers and a local one, with
    /// mutual fallbacks, so the system starts without any file present.
    pub fn builtin_defaults() -> Self {
        Self {
            providers: vec![
                ProviderEntry {
                    name: "openai".to_string(),
                    priority: 10,
                    fallback: vec!["anthropic".to_string(), "ollama".to_string()],
                    requests_per_minute: 500,
                    tokens_per_minute: 200_000,
                    timeout_secs: Some(60),
                    enabled: true,
                    models: vec![
                        ModelEntry {
                            name: "gpt-4o".to_string(),
                            cost_per_token: 0.000_002_5,
                            max_tokens: 128_000,
                            temperature: 0.7,
                            capabilities: strings(&["chat", "code", "analysis"]),
                            priority: Some(10),
                            complexity_tier: ComplexityTier::Complex,
                            requests_per_minute: None,
                            tokens_per_minute: None,
                        },
                        ModelEntry {
                            name: "gpt-4o-mini".to_string(),
                            cost_per_token: 0.000_000_15,
                            max_tokens: 128_000,
                            temperature: 0.7,
                            capabilities: strings(&["chat", "summarization"]),
                            priority: Some(20),
                            complexity_tier: ComplexityTier::Medium,
                            requests_per_minute: None,
                            tokens_per_minute: None,
                        },
                    ],
                },
                ProviderEntry {
                    name: "anthropic".to_string(),
                    priority: 15,
                    fallback: vec!["openai".to_string()],
                    requests_per_minute: 300,
                    tokens_per_minute: 100_000,
                    timeout_secs: Some(60),
                    enabled: true,
                    models: vec![
                        ModelEntry {
                            name: "claude-sonnet".to_string(),
                            cost_per_token: 0.000_003,
                            max_tokens: 200_000,
                            temperature: 0.7,
                            capabilities: strings(&["chat", "code", "analysis"]),
                            priority: Some(12),
                            complexity_tier: ComplexityTier::Complex,
                            requests_per_minute: None,
                            tokens_per_minute: None,
                        },
                        ModelEntry {
                            name: "claude-haiku".to_string(),
                            cost_per_token: 0.000_000_8,
                            max_tokens: 200_000,
                            temperature: 0.7,
                            capabilities: strings(&["chat", "summarization"]),
                            priority: Some(25),
                            complexity_tier: ComplexityTier::Medium,
                            requests_per_minute: None,
                            tokens_per_minute: None,
                        },
                    ],
                },
                ProviderEntry {
                    name: "ollama".to_string(),
                    priority: 30,
                    fallback: vec![],
                    requests_per_minute: 120,
                    tokens_per_minute: 60_000,
                    timeout_secs: None,
                    enabled: true,
                    models: vec![ModelEntry {
                        name: "llama3".to_string(),
                        cost_per_token: 0.0,
                        max_tokens: 8192,
                        temperature: 0.7,
                        capabilities: strings(&["chat"]),
                        priority: Some(40),
                        complexity_tier: ComplexityTier::Simple,
                        requests_per_minute: None,
                        tokens_per_minute: None,
                    }],
                },
            ],
        }
    }

    /// Validate the document.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.providers.iter().all(|p| !p.enabled || p.models.is_empty()) {
            return Err(CatalogError::Validation(
                "catalog defines no enabled provider with models".to_string(),
            ));
        }

        let known: HashSet<&str> = self.providers.iter().map(|p| p.name.as_str()).collect();

        let mut seen_providers = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(CatalogError::Validation(
                    "provider with empty name".to_string(),
                ));
            }
            if !seen_providers.insert(provider.name.as_str()) {
                return Err(CatalogError::Validation(format!(
                    "duplicate provider name: '{}'",
                    provider.name
                )));
            }

            if provider.requests_per_minute == 0 || provider.tokens_per_minute == 0 {
                return Err(CatalogError::Validation(format!(
                    "provider '{}' has a zero rate limit",
                    provider.name
                )));
            }

            for target in &provider.fallback {
                if target == &provider.name {
                    return Err(CatalogError::Validation(format!(
                        "provider '{}' lists itself in its fallback chain",
                        provider.name
                    )));
                }
                if !known.contains(target.as_str()) {
                    return Err(CatalogError::Validation(format!(
                        "provider '{}' falls back to unknown provider '{}'",
                        provider.name, target
                    )));
                }
            }

            let mut seen_models = HashSet::new();
            for model in &provider.models {
                if model.name.is_empty() {
                    return Err(CatalogError::Validation(format!(
                        "provider '{}' has a model with an empty name",
                        provider.name
                    )));
                }
                if !seen_models.insert(model.name.as_str()) {
                    return Err(CatalogError::Validation(format!(
                        "duplicate model name '{}' in provider '{}'",
                        model.name, provider.name
                    )));
                }
                if model.cost_per_token < 0.0 {
                    return Err(CatalogError::Validation(format!(
                        "model '{}/{}' has a negative cost",
                        provider.name, model.name
                    )));
                }
                if model.max_tokens == 0 {
                    return Err(CatalogError::Validation(format!(
                        "model '{}/{}' has a zero token budget",
                        provider.name, model.name
                    )));
                }
                if model.requests_per_minute == Some(0) || model.tokens_per_minute == Some(0) {
                    return Err(CatalogError::Validation(format!(
                        "model '{}/{}' overrides a rate limit to zero",
                        provider.name, model.name
                    )));
                }
            }
        }

        Ok(())
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Catalog Snapshot
// ============================================================================

/// Immutable, fully resolved view of one catalog document.
///
/// Descriptor order follows the document (providers in order, models in
/// order), which is the tie-break order the selector preserves.
#[derive(Debug)]
pub struct CatalogSnapshot {
    descriptors: Vec<ModelDescriptor>,
    chains: HashMap<String, Vec<String>>,
    provider_ids: Vec<String>,
}

impl CatalogSnapshot {
    /// Resolve a validated document into descriptors.
    pub fn from_document(document: &CatalogDocument) -> Result<Self, CatalogError> {
        document.validate()?;

        let mut descriptors = Vec::new();
        let mut chains = HashMap::new();
        let mut provider_ids = Vec::new();

        for provider in &document.providers {
            if !provider.enabled {
                debug!(provider = %provider.name, "skipping disabled provider");
                continue;
            }
            provider_ids.push(provider.name.clone());
            chains.insert(provider.name.clone(), provider.fallback.clone());

            for model in &provider.models {
                descriptors.push(ModelDescriptor {
                    provider_id: provider.name.clone(),
                    model_name: model.name.clone(),
                    cost_per_token: model.cost_per_token,
                    max_tokens: model.max_tokens,
                    temperature: model.temperature,
                    capabilities: model.capabilities.iter().cloned().collect(),
                    priority: model.priority.unwrap_or(provider.priority),
                    complexity_tier: model.complexity_tier,
                    tokens_per_minute: model
                        .tokens_per_minute
                        .unwrap_or(provider.tokens_per_minute),
                    requests_per_minute: model
                        .requests_per_minute
                        .unwrap_or(provider.requests_per_minute),
                    request_timeout: provider.timeout_secs.map(Duration::from_secs),
                });
            }
        }

        Ok(Self {
            descriptors,
            chains,
            provider_ids,
        })
    }

    /// All descriptors, in document order.
    pub fn descriptors(&self) -> &[ModelDescriptor] {
        &self.descriptors
    }

    /// Enabled provider ids, in document order.
    pub fn provider_ids(&self) -> &[String] {
        &self.provider_ids
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Look up one descriptor by identity.
    pub fn get(&self, provider_id: &str, model_name: &str) -> Option<&ModelDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.provider_id == provider_id && d.model_name == model_name)
    }

    /// Configured fallback chain for a provider (empty when none).
    pub fn fallback_chain(&self, provider_id: &str) -> &[String] {
        self.chains
            .get(provider_id)
            .map(|chain| chain.as_slice())
            .unwrap_or(&[])
    }

    /// Descriptors whose tier covers the task and which declare the task
    /// type as a capability, in document order.
    ///
    /// An empty `task_type` skips the capability filter.
    pub fn candidates_for(
        &self,
        task_type: &str,
        complexity_tier: ComplexityTier,
    ) -> Vec<ModelDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.covers(complexity_tier))
            .filter(|d| task_type.is_empty() || d.supports(task_type))
            .cloned()
            .collect()
    }

    /// The lowest-priority-value eligible descriptor of one provider, used
    /// when expanding configured fallback chains.
    pub fn best_for(
        &self,
        provider_id: &str,
        task_type: &str,
        complexity_tier: ComplexityTier,
    ) -> Option<&ModelDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.provider_id == provider_id)
            .filter(|d| d.covers(complexity_tier))
            .filter(|d| task_type.is_empty() || d.supports(task_type))
            .min_by_key(|d| d.priority)
    }
}

// ============================================================================
// Model Catalog
// ============================================================================

/// Where the catalog came from, so `reload()` knows what to re-read.
#[derive(Debug, Clone)]
enum CatalogSource {
    /// Default location chain (env var, cwd, home, builtins).
    Discover,
    /// A fixed file path.
    File(PathBuf),
    /// An in-memory document.
    Document(CatalogDocument),
}

/// Shared, reloadable handle to the current [`CatalogSnapshot`].
///
/// Reads clone an `Arc` under a read lock and then run lock-free; `reload()`
/// swaps the snapshot wholesale under the write lock. The lock is never held
/// across I/O or await points.
pub struct ModelCatalog {
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    source: RwLock<CatalogSource>,
}

impl ModelCatalog {
    /// Load from the default location chain.
    pub fn load() -> Result<Self, CatalogError> {
        let document = CatalogDocument::load()?;
        let catalog = Self::with_source(&document, CatalogSource::Discover)?;
        Ok(catalog)
    }

    /// Load from a specific file; `reload()` re-reads the same path.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let document = CatalogDocument::from_file(&path)?;
        Self::with_source(&document, CatalogSource::File(path))
    }

    /// Build from an in-memory document; `reload()` revalidates it.
    pub fn from_document(document: CatalogDocument) -> Result<Self, CatalogError> {
        let source = CatalogSource::Document(document.clone());
        Self::with_source(&document, source)
    }

    fn with_source(
        document: &CatalogDocument,
        source: CatalogSource,
    ) -> Result<Self, CatalogError> {
        let snapshot = CatalogSnapshot::from_document(document)?;
        info!(
            providers = snapshot.provider_ids().len(),
            models = snapshot.len(),
            "catalog loaded"
        );
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            source: RwLock::new(source),
        })
    }

    /// Current snapshot. Cheap; callers keep the `Arc` for the duration of
    /// one request and never observe a mid-reload state.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Convenience passthrough to [`CatalogSnapshot::candidates_for`].
    pub fn candidates_for(
        &self,
        task_type: &str,
        complexity_tier: ComplexityTier,
    ) -> Vec<ModelDescriptor> {
        self.snapshot().candidates_for(task_type, complexity_tier)
    }

    /// Re-read the original source and swap the snapshot atomically.
    ///
    /// On error the current snapshot stays in place.
    pub fn reload(&self) -> Result<(), CatalogError> {
        let source = self
            .source
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let document = match &source {
            CatalogSource::Discover => CatalogDocument::load()?,
            CatalogSource::File(path) => CatalogDocument::from_file(path)?,
            CatalogSource::Document(document) => document.clone(),
        };
        let snapshot = CatalogSnapshot::from_document(&document)?;
        info!(
            providers = snapshot.provider_ids().len(),
            models = snapshot.len(),
            "catalog reloaded"
        );
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
        Ok(())
    }

    /// Swap in a new in-memory document atomically. Later `reload()` calls
    /// revalidate this document.
    pub fn replace(&self, document: CatalogDocument) -> Result<(), CatalogError> {
        let snapshot = CatalogSnapshot::from_document(&document)?;
        *self.source.write().unwrap_or_else(|e| e.into_inner()) =
            CatalogSource::Document(document);
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
        info!("catalog replaced");
        Ok(())
    }
}
