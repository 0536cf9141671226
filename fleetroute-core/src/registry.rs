//! # Canonical Model Registry Module
//!
//! This module aggregates per-provider model catalogs into canonical,
//! provider-agnostic models and answers every identity and routing question
//! the gateway asks.
//!
//! ## Overview
//!
//! The registry provides:
//!
//! - **Aggregation**: a canonical model (e.g. `llama-3.3-70b`) owns one
//!   [`ProviderBinding`] per provider that implements it, each with its own
//!   native model id, pricing, features, and priority.
//! - **Resolution**: any identifier a caller supplies (canonical id, alias,
//!   `provider/native-id` composite, or a bare provider-native id) resolves
//!   to at most one canonical id, case-insensitively.
//! - **Selection**: [`ModelRegistry::select_providers`] produces the ordered
//!   plan the failover selector executes, ranked by a [`SelectionStrategy`]
//!   and filtered by enablement, features, cost, exclusions, and live
//!   circuit state from the [`HealthTracker`].
//!
//! ## Selection Strategies
//!
//! ### Priority
//! Stable sort by the binding's explicit priority field; lower numbers are
//! tried first. The default, and the right choice when operators curate
//! the order by hand.
//!
//! ### Cost
//! Ascending per-token input+output price. Bindings with null pricing sort
//! last rather than masquerading as free.
//!
//! ### Latency
//! Ascending rolling average latency from the health tracker. Bindings
//! with no observed samples sort last.
//!
//! ### Balanced
//! Score = normalized cost + normalized latency + (1 - success rate),
//! ascending. Trades a little of everything instead of optimizing one
//! axis.
//!
//! All strategies break ties by provider slug, so a given registry state
//! always yields the same plan.
//!
//! ## Invariants
//!
//! - Every canonical model has at least one binding; registration enforces
//!   this.
//! - Bindings stay sorted by priority ascending; re-registering a provider
//!   replaces its binding rather than duplicating it.
//! - The aggregated pricing range always equals the min/max over bindings
//!   with non-null pricing.
//! - An alias never resolves to more than one canonical id; collisions keep
//!   the first writer and log a warning.
//!
//! ## Usage Examples
//!
//! ### Basic Registry Setup
//!
//! ```rust
//! use fleetroute_core::registry::{CanonicalModel, ModelRegistry, ProviderBinding, SelectionStrategy};
//!
//! let registry = ModelRegistry::new(Default::default());
//! let model = CanonicalModel::new("llama-3.3-70b", "Llama 3.3 70B Instruct")
//!     .with_binding(
//!         ProviderBinding::new("fireworks", "accounts/fireworks/models/llama-v3p3-70b-instruct")
//!             .with_priority(1),
//!     )
//!     .with_binding(ProviderBinding::new("openrouter", "meta-llama/llama-3.3-70b-instruct").with_priority(2));
//! registry.register(model).await?;
//!
//! let plan = registry
//!     .select_providers("llama-3.3-70b", SelectionStrategy::Priority, &Default::default())
//!     .await;
//! assert_eq!(plan[0].provider, "fireworks");
//! ```
//!
//! ### Alias Resolution
//!
//! ```rust
//! // Case variants, friendly names, composites, and bare native ids all
//! // land on the same canonical model.
//! registry.add_alias("llama-3.3-70b-instruct", "llama-3.3-70b").await;
//!
//! assert_eq!(
//!     registry.resolve("META-LLAMA/Llama-3.3-70B-Instruct").await.as_deref(),
//!     Some("llama-3.3-70b"),
//! );
//! assert_eq!(
//!     registry
//!         .resolve("fireworks/accounts/fireworks/models/llama-v3p3-70b-instruct")
//!         .await
//!         .as_deref(),
//!     Some("llama-3.3-70b"),
//! );
//! assert_eq!(registry.resolve("unknown-xyz").await, None);
//! ```
//!
//! ### Strategy-Driven Selection
//!
//! ```rust
//! use fleetroute_core::registry::{SelectionOptions, SelectionStrategy};
//!
//! // Cheapest provider that supports tool calling, with a spend ceiling
//! // and one provider kept out of rotation.
//! let plan = registry
//!     .select_providers(
//!         "llama-3.3-70b",
//!         SelectionStrategy::Cost,
//!         &SelectionOptions {
//!             required_features: vec!["tools".to_string()],
//!             max_cost_per_1k_input: Some(0.0005),
//!             excluded: vec!["openrouter".to_string()],
//!             ..Default::default()
//!         },
//!     )
//!     .await;
//!
//! for binding in &plan {
//!     println!("{} -> {}", binding.provider, binding.native_id);
//! }
//! ```
//!
//! ### Searching the Catalog
//!
//! ```rust
//! use fleetroute_core::registry::SearchFilters;
//!
//! let hits = registry
//!     .search(
//!         "llama",
//!         &SearchFilters {
//!             feature: Some("tools".to_string()),
//!             ..Default::default()
//!         },
//!     )
//!     .await;
//! let fireworks_models = registry.list_by_provider("fireworks").await;
//! ```
//!
//! ## Lifecycle
//!
//! Canonical models are created by catalog ingest or curated startup
//! configs, mutated by re-ingest, and never deleted at runtime; providers
//! that disappear are disabled instead. Registration is an upsert: incoming
//! bindings replace the same provider's binding, other providers' bindings
//! are kept, and the alias index entries this canonical contributed are
//! rebuilt.
//!
//! ## Best Practices
//!
//! - **Resolve First**: accept any identifier at the boundary and call
//!   [`ModelRegistry::resolve`] once; every other method wants the
//!   canonical id
//! - **Let Priority Express Preference**: explicit priorities beat relying
//!   on ingest order, which is deliberately not meaningful
//! - **Disable, Don't Delete**: flipping a binding's enabled flag preserves
//!   aliases, pricing history, and health state for when the provider
//!   returns
//! - **Keep Aliases Unambiguous**: collisions keep the first writer and
//!   only log; pick canonical ids that won't fight over common aliases
//! - **Pair With Health Data**: the `latency` and `balanced` strategies are
//!   only as good as the tracker feeding them; they degrade to slug order
//!   on a cold start

use crate::health::HealthTracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Registry-level errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Canonical models must carry at least one binding
    #[error("canonical model {id} must have at least one provider binding")]
    NoBindings { id: String },

    /// Binding priorities start at 1
    #[error("binding priority must be >= 1 for provider {provider}")]
    InvalidPriority { provider: String },

    /// The referenced canonical model is not registered
    #[error("unknown canonical model: {id}")]
    UnknownModel { id: String },
}

/// One provider's implementation of a canonical model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderBinding {
    /// Provider slug, lowercased (e.g. `fireworks`)
    pub provider: String,
    /// Provider-specific model id (e.g. `accounts/fireworks/models/...`)
    pub native_id: String,
    /// Lower number = tried earlier under the priority strategy
    pub priority: u32,
    /// Disabled bindings never appear in a plan
    pub enabled: bool,
    /// Whether calls through this binding need user-supplied credentials
    pub requires_credentials: bool,
    /// Per-token input price, when known
    pub input_cost: Option<f64>,
    /// Per-token output price, when known
    pub output_cost: Option<f64>,
    /// Largest completion this binding can produce
    pub max_output_tokens: Option<u32>,
    /// Context window advertised by this provider
    pub context_length: Option<u32>,
    /// Features this binding supports (`streaming`, `tools`, ...)
    pub features: BTreeSet<String>,
}

impl ProviderBinding {
    pub fn new(provider: impl Into<String>, native_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into().to_lowercase(),
            native_id: native_id.into(),
            priority: 1,
            enabled: true,
            requires_credentials: false,
            input_cost: None,
            output_cost: None,
            max_output_tokens: None,
            context_length: None,
            features: BTreeSet::new(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_pricing(mut self, input_cost: f64, output_cost: f64) -> Self {
        self.input_cost = Some(input_cost);
        self.output_cost = Some(output_cost);
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context_length(mut self, context_length: u32) -> Self {
        self.context_length = Some(context_length);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_requires_credentials(mut self, requires_credentials: bool) -> Self {
        self.requires_credentials = requires_credentials;
        self
    }

    /// Combined per-token price, when both sides are known.
    pub fn blended_cost(&self) -> Option<f64> {
        match (self.input_cost, self.output_cost) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        }
    }

    /// Whether this binding supports every requested feature.
    pub fn supports(&self, required: &[String]) -> bool {
        required.iter().all(|f| self.features.contains(f))
    }
}

/// Aggregated per-token price range across a model's bindings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PricingRange {
    pub min_input: Option<f64>,
    pub max_input: Option<f64>,
    pub min_output: Option<f64>,
    pub max_output: Option<f64>,
}

/// The logical, provider-agnostic identity of a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalModel {
    /// Canonical id (e.g. `llama-3.3-70b`), lowercased
    pub id: String,
    /// Display name
    pub name: String,
    pub description: Option<String>,
    /// Largest context window across bindings
    pub context_length: Option<u32>,
    /// Supported input/output modalities (`text`, `image`, ...)
    pub modalities: BTreeSet<String>,
    /// Union of binding features
    pub features: BTreeSet<String>,
    /// Min/max per-token prices over priced bindings
    pub pricing_range: PricingRange,
    /// Provider implementations, sorted by priority ascending
    pub bindings: Vec<ProviderBinding>,
    /// Extra identifiers this model contributed to the alias index
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalModel {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into().to_lowercase(),
            name: name.into(),
            description: None,
            context_length: None,
            modalities: BTreeSet::from(["text".to_string()]),
            features: BTreeSet::new(),
            pricing_range: PricingRange::default(),
            bindings: Vec::new(),
            aliases: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_binding(mut self, binding: ProviderBinding) -> Self {
        self.upsert_binding(binding);
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_modalities<I, S>(mut self, modalities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modalities = modalities.into_iter().map(Into::into).collect();
        self
    }

    /// Add or replace the binding for a provider, keeping the binding list
    /// sorted and the aggregates current.
    pub fn upsert_binding(&mut self, binding: ProviderBinding) {
        self.bindings.retain(|b| b.provider != binding.provider);
        self.bindings.push(binding);
        self.sort_bindings();
        self.recompute_aggregates();
        self.updated_at = Utc::now();
    }

    /// Binding for a provider slug, if present.
    pub fn binding(&self, provider: &str) -> Option<&ProviderBinding> {
        let provider = provider.to_lowercase();
        self.bindings.iter().find(|b| b.provider == provider)
    }

    /// Enabled bindings in priority order.
    pub fn enabled_bindings(&self) -> Vec<&ProviderBinding> {
        self.bindings.iter().filter(|b| b.enabled).collect()
    }

    fn sort_bindings(&mut self) {
        self.bindings
            .sort_by(|a, b| a.priority.cmp(&b.priority).then(a.provider.cmp(&b.provider)));
    }

    /// Rebuild everything derived from the binding list: the pricing range
    /// is recomputed from scratch, features and context length accumulate.
    fn recompute_aggregates(&mut self) {
        let mut range = PricingRange::default();
        for binding in &self.bindings {
            if let Some(input) = binding.input_cost {
                range.min_input = Some(range.min_input.map_or(input, |m: f64| m.min(input)));
                range.max_input = Some(range.max_input.map_or(input, |m: f64| m.max(input)));
            }
            if let Some(output) = binding.output_cost {
                range.min_output = Some(range.min_output.map_or(output, |m: f64| m.min(output)));
                range.max_output = Some(range.max_output.map_or(output, |m: f64| m.max(output)));
            }
            for feature in &binding.features {
                self.features.insert(feature.clone());
            }
            if let Some(context) = binding.context_length {
                self.context_length = Some(self.context_length.map_or(context, |c| c.max(context)));
            }
        }
        self.pricing_range = range;
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.bindings.is_empty() {
            return Err(RegistryError::NoBindings {
                id: self.id.clone(),
            });
        }
        for binding in &self.bindings {
            if binding.priority < 1 {
                return Err(RegistryError::InvalidPriority {
                    provider: binding.provider.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Ranking strategy for [`ModelRegistry::select_providers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Explicit priority field, ascending
    #[default]
    Priority,
    /// Cheapest per-token input+output first; unpriced bindings last
    Cost,
    /// Lowest rolling average latency first; unobserved bindings last
    Latency,
    /// Blend of cost, latency, and success rate
    Balanced,
}

/// Filters and hints applied to provider selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    /// Provider to move to the head of the plan when it survives filtering
    pub preferred: Option<String>,
    /// Features every selected binding must support
    pub required_features: Vec<String>,
    /// Ceiling on input price, expressed per 1K input tokens
    pub max_cost_per_1k_input: Option<f64>,
    /// Providers to leave out of the plan entirely
    pub excluded: Vec<String>,
}

/// Non-ranked filters for [`ModelRegistry::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub provider: Option<String>,
    pub feature: Option<String>,
    pub modality: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    models: HashMap<String, CanonicalModel>,
    /// lowercased alias -> canonical id
    aliases: HashMap<String, String>,
    /// (provider slug, lowercased native id) -> canonical id
    provider_native: HashMap<(String, String), String>,
    /// lowercased native id -> canonical id
    native: HashMap<String, String>,
}

impl RegistryInner {
    /// Drop every index entry contributed by this canonical id. Used before
    /// re-indexing on upsert so stale composites do not linger.
    fn unindex(&mut self, canonical_id: &str) {
        self.aliases.retain(|_, v| v != canonical_id);
        self.provider_native.retain(|_, v| v != canonical_id);
        self.native.retain(|_, v| v != canonical_id);
    }

    fn index_alias(&mut self, alias: &str, canonical_id: &str) {
        let key = alias.to_lowercase();
        if key.is_empty() || key == canonical_id {
            return;
        }
        match self.aliases.get(&key) {
            Some(existing) if existing != canonical_id => {
                tracing::warn!(
                    alias = %key,
                    existing = %existing,
                    requested = %canonical_id,
                    "alias collision, keeping first registration"
                );
            }
            Some(_) => {}
            None => {
                self.aliases.insert(key, canonical_id.to_string());
            }
        }
    }

    fn index_model(&mut self, model: &CanonicalModel) {
        for alias in &model.aliases {
            self.index_alias(alias, &model.id);
        }
        for binding in &model.bindings {
            let native_key = binding.native_id.to_lowercase();
            self.provider_native
                .insert((binding.provider.clone(), native_key.clone()), model.id.clone());
            self.native.entry(native_key).or_insert_with(|| model.id.clone());
            self.index_alias(
                &format!("{}/{}", binding.provider, binding.native_id),
                &model.id,
            );
        }
    }

    fn resolve(&self, identifier: &str) -> Option<String> {
        let normalized = identifier.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        if self.models.contains_key(&normalized) {
            return Some(normalized);
        }
        if let Some(id) = self.aliases.get(&normalized) {
            return Some(id.clone());
        }
        if let Some((provider, native)) = normalized.split_once('/') {
            if let Some(id) = self
                .provider_native
                .get(&(provider.to_string(), native.to_string()))
            {
                return Some(id.clone());
            }
        }
        self.native.get(&normalized).cloned()
    }
}

/// Process-wide canonical model registry.
///
/// Reads (`resolve`, `get`, `select_providers`, `search`) take the shared
/// lock; writes (`register`, `add_alias`, ingest commits) take the
/// exclusive lock. Strategy sorting happens over a snapshot of the binding
/// slice inside the read section, never across provider I/O.
pub struct ModelRegistry {
    health: Arc<HealthTracker>,
    inner: RwLock<RegistryInner>,
}

impl ModelRegistry {
    pub fn new(health: Arc<HealthTracker>) -> Self {
        Self {
            health,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// The health tracker this registry consults for availability and
    /// latency data.
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Upsert a canonical model.
    ///
    /// Incoming bindings replace any existing binding with the same provider
    /// slug; bindings for providers the incoming model does not mention are
    /// kept. Alias index entries contributed by this canonical are rebuilt.
    pub async fn register(&self, mut model: CanonicalModel) -> Result<(), RegistryError> {
        model.id = model.id.to_lowercase();
        model.validate()?;

        let mut inner = self.inner.write().await;
        let merged = match inner.models.remove(&model.id) {
            Some(mut existing) => {
                existing.name = model.name;
                if model.description.is_some() {
                    existing.description = model.description;
                }
                existing.modalities.extend(model.modalities);
                for alias in model.aliases {
                    if !existing.aliases.contains(&alias) {
                        existing.aliases.push(alias);
                    }
                }
                for binding in model.bindings {
                    existing.upsert_binding(binding);
                }
                existing
            }
            None => model,
        };

        inner.unindex(&merged.id);
        inner.index_model(&merged);
        tracing::info!(
            model = %merged.id,
            providers = merged.bindings.len(),
            "registered canonical model"
        );
        inner.models.insert(merged.id.clone(), merged);
        Ok(())
    }

    /// Register a case-insensitive alias for a canonical model.
    ///
    /// Logs and leaves the index untouched when the alias already points at
    /// a different canonical id or the target model does not exist.
    pub async fn add_alias(&self, alias: &str, canonical_id: &str) {
        let canonical_id = canonical_id.to_lowercase();
        let mut inner = self.inner.write().await;
        if !inner.models.contains_key(&canonical_id) {
            tracing::warn!(alias, model = %canonical_id, "alias target not registered, ignoring");
            return;
        }
        inner.index_alias(alias, &canonical_id);
        if let Some(model) = inner.models.get_mut(&canonical_id) {
            let alias = alias.to_string();
            if !model.aliases.contains(&alias) {
                model.aliases.push(alias);
            }
        }
    }

    /// Resolve any identifier to a canonical id.
    ///
    /// Tries, in order: direct canonical match, alias index,
    /// `provider/native-id` composite, provider-native index. Resolution is
    /// idempotent: resolving a canonical id returns it unchanged.
    pub async fn resolve(&self, identifier: &str) -> Option<String> {
        self.inner.read().await.resolve(identifier)
    }

    /// Fetch a canonical model by canonical id (aliases are not accepted
    /// here; resolve first).
    pub async fn get(&self, canonical_id: &str) -> Option<CanonicalModel> {
        self.inner
            .read()
            .await
            .models
            .get(&canonical_id.to_lowercase())
            .cloned()
    }

    /// All canonical models with an enabled binding for a provider.
    pub async fn list_by_provider(&self, provider: &str) -> Vec<CanonicalModel> {
        let provider = provider.to_lowercase();
        let inner = self.inner.read().await;
        let mut models: Vec<CanonicalModel> = inner
            .models
            .values()
            .filter(|m| m.bindings.iter().any(|b| b.provider == provider && b.enabled))
            .cloned()
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Non-ranked substring search over id, name, and description.
    pub async fn search(&self, query: &str, filters: &SearchFilters) -> Vec<CanonicalModel> {
        let query = query.trim().to_lowercase();
        let provider = filters.provider.as_ref().map(|p| p.to_lowercase());
        let inner = self.inner.read().await;
        let mut results: Vec<CanonicalModel> = inner
            .models
            .values()
            .filter(|m| {
                if !query.is_empty() {
                    let matches = m.id.contains(&query)
                        || m.name.to_lowercase().contains(&query)
                        || m.description
                            .as_ref()
                            .is_some_and(|d| d.to_lowercase().contains(&query));
                    if !matches {
                        return false;
                    }
                }
                if let Some(provider) = &provider {
                    if !m.bindings.iter().any(|b| &b.provider == provider) {
                        return false;
                    }
                }
                if let Some(feature) = &filters.feature {
                    if !m.features.contains(feature) {
                        return false;
                    }
                }
                if let Some(modality) = &filters.modality {
                    if !m.modalities.contains(modality) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        results
    }

    /// Build the ordered provider plan for one request.
    ///
    /// Filters are applied in order: enabled, required features, max cost,
    /// exclusions, circuit availability. The surviving bindings are ranked
    /// by the strategy with a deterministic slug tie-break, then the
    /// preferred provider (if any survived) moves to the head.
    pub async fn select_providers(
        &self,
        model_id: &str,
        strategy: SelectionStrategy,
        options: &SelectionOptions,
    ) -> Vec<ProviderBinding> {
        let inner = self.inner.read().await;
        let Some(canonical_id) = inner.resolve(model_id) else {
            return Vec::new();
        };
        let Some(model) = inner.models.get(&canonical_id) else {
            return Vec::new();
        };

        let excluded: Vec<String> = options.excluded.iter().map(|e| e.to_lowercase()).collect();
        let mut candidates: Vec<ProviderBinding> = model
            .bindings
            .iter()
            .filter(|b| b.enabled)
            .filter(|b| b.supports(&options.required_features))
            .filter(|b| match options.max_cost_per_1k_input {
                Some(max) => b.input_cost.map_or(true, |cost| cost * 1000.0 <= max),
                None => true,
            })
            .filter(|b| !excluded.contains(&b.provider))
            .filter(|b| self.health.is_available(&canonical_id, &b.provider))
            .cloned()
            .collect();

        self.rank(&canonical_id, strategy, &mut candidates);

        if let Some(preferred) = &options.preferred {
            let preferred = preferred.to_lowercase();
            if let Some(pos) = candidates.iter().position(|b| b.provider == preferred) {
                let head = candidates.remove(pos);
                candidates.insert(0, head);
            }
        }

        candidates
    }

    fn rank(
        &self,
        canonical_id: &str,
        strategy: SelectionStrategy,
        candidates: &mut [ProviderBinding],
    ) {
        match strategy {
            SelectionStrategy::Priority => {
                candidates
                    .sort_by(|a, b| a.priority.cmp(&b.priority).then(a.provider.cmp(&b.provider)));
            }
            SelectionStrategy::Cost => {
                candidates.sort_by(|a, b| {
                    let a_cost = a.blended_cost().unwrap_or(f64::INFINITY);
                    let b_cost = b.blended_cost().unwrap_or(f64::INFINITY);
                    a_cost.total_cmp(&b_cost).then(a.provider.cmp(&b.provider))
                });
            }
            SelectionStrategy::Latency => {
                candidates.sort_by(|a, b| {
                    let a_latency = self
                        .health
                        .average_latency_ms(canonical_id, &a.provider)
                        .unwrap_or(f64::INFINITY);
                    let b_latency = self
                        .health
                        .average_latency_ms(canonical_id, &b.provider)
                        .unwrap_or(f64::INFINITY);
                    a_latency
                        .total_cmp(&b_latency)
                        .then(a.provider.cmp(&b.provider))
                });
            }
            SelectionStrategy::Balanced => {
                let max_cost = candidates
                    .iter()
                    .filter_map(|b| b.blended_cost())
                    .fold(0.0_f64, f64::max);
                let max_latency = candidates
                    .iter()
                    .filter_map(|b| self.health.average_latency_ms(canonical_id, &b.provider))
                    .fold(0.0_f64, f64::max);

                let score = |b: &ProviderBinding| -> f64 {
                    let cost_score = match b.blended_cost() {
                        Some(cost) if max_cost > 0.0 => cost / max_cost,
                        Some(_) => 0.0,
                        // Unpriced bindings score as the most expensive
                        None => 1.0,
                    };
                    let latency_score =
                        match self.health.average_latency_ms(canonical_id, &b.provider) {
                            Some(latency) if max_latency > 0.0 => latency / max_latency,
                            Some(_) => 0.0,
                            None => 1.0,
                        };
                    let failure_score = 1.0 - self.health.success_rate(canonical_id, &b.provider);
                    cost_score + latency_score + failure_score
                };

                candidates.sort_by(|a, b| {
                    score(a)
                        .total_cmp(&score(b))
                        .then(a.provider.cmp(&b.provider))
                });
            }
        }
    }

    /// Add or replace one binding on a registered model. Used by the
    /// catalog ingester.
    pub async fn upsert_binding(
        &self,
        canonical_id: &str,
        binding: ProviderBinding,
    ) -> Result<(), RegistryError> {
        let canonical_id = canonical_id.to_lowercase();
        let mut inner = self.inner.write().await;
        let Some(mut model) = inner.models.remove(&canonical_id) else {
            return Err(RegistryError::UnknownModel { id: canonical_id });
        };
        model.upsert_binding(binding);
        inner.unindex(&canonical_id);
        inner.index_model(&model);
        inner.models.insert(canonical_id, model);
        Ok(())
    }

    /// Flip a binding's enabled flag. Returns false when the model or
    /// binding does not exist.
    pub async fn set_binding_enabled(
        &self,
        canonical_id: &str,
        provider: &str,
        enabled: bool,
    ) -> bool {
        let canonical_id = canonical_id.to_lowercase();
        let provider = provider.to_lowercase();
        let mut inner = self.inner.write().await;
        let Some(model) = inner.models.get_mut(&canonical_id) else {
            return false;
        };
        let Some(binding) = model.bindings.iter_mut().find(|b| b.provider == provider) else {
            return false;
        };
        if binding.enabled != enabled {
            binding.enabled = enabled;
            model.updated_at = Utc::now();
            tracing::info!(model = %canonical_id, provider = %provider, enabled, "binding toggled");
        }
        true
    }

    /// Export every canonical model, for durable storage and diagnostics.
    pub async fn catalog_snapshot(&self) -> Vec<CanonicalModel> {
        let inner = self.inner.read().await;
        let mut models: Vec<CanonicalModel> = inner.models.values().cloned().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.models.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.models.is_empty()
    }
}
