//! # Catalog Ingestion
//!
//! Keeps the canonical registry in sync with live provider catalogs. Each
//! provider has a pluggable [`CatalogFetcher`]; the ingester pulls its
//! model list, maps every entry to a canonical id, and creates or updates
//! the canonical model and its binding, normalizing pricing to per-token
//! and registering composite and native aliases.
//!
//! Ingest is idempotent per provider: re-running a sync against the same
//! catalog produces the same registry state. Canonical models are never
//! deleted; a provider entry that disappears from a catalog has its
//! binding disabled instead. Per-model failures are collected into the
//! [`SyncReport`] and never abort the sync.
//!
//! Catalog entries arrive as loosely-typed provider dicts. They decode
//! into [`CatalogEntry`] with the fields the gateway validates; everything
//! unrecognized lands in the `extra` side-bag, preserved for round-trip
//! but never consulted.

use crate::error::GatewayError;
use crate::pricing::{normalize_to_per_token, PriceUnit};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleetroute_core::registry::{CanonicalModel, ModelRegistry, ProviderBinding};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Prefixes stripped by the default canonical-id normalizer.
const STRIPPED_PREFIXES: &[&str] = &[
    "accounts/fireworks/models/",
    "openai/",
    "meta-llama/",
    "google/",
    "anthropic/",
    "mistralai/",
];

/// Pricing as declared in a provider catalog entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CatalogPricing {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub unit: PriceUnit,
}

/// One model entry from a provider catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Provider-native model id
    #[serde(alias = "model_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub modalities: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub pricing: Option<CatalogPricing>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Canonical id declared by the provider, overriding the normalizer
    #[serde(default)]
    pub canonical_slug: Option<String>,
    /// Unrecognized fields, preserved but never consulted
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Pulls one provider's current model catalog.
#[async_trait::async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<CatalogEntry>>;
}

/// Maps a provider catalog entry to a canonical id.
///
/// Returning `None` skips the entry.
pub trait ModelIdMapper: Send + Sync {
    fn canonical_id(&self, provider: &str, entry: &CatalogEntry) -> Option<String>;
}

/// Default normalizer: lowercase, strip well-known vendor prefixes and a
/// leading `@`.
pub fn default_canonical_id(native_id: &str) -> String {
    let mut id = native_id.trim().to_lowercase();
    if let Some(stripped) = id.strip_prefix('@') {
        id = stripped.to_string();
    }
    for prefix in STRIPPED_PREFIXES {
        if let Some(stripped) = id.strip_prefix(prefix) {
            id = stripped.to_string();
        }
    }
    id
}

/// Result of syncing one provider.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub models_processed: usize,
    pub canonical_created: usize,
    pub canonical_updated: usize,
    pub bindings_disabled: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            started_at: Utc::now(),
            models_processed: 0,
            canonical_created: 0,
            canonical_updated: 0,
            bindings_disabled: 0,
            errors: Vec::new(),
        }
    }
}

/// Aggregate of one `sync_all` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CombinedReport {
    pub reports: Vec<SyncReport>,
}

impl CombinedReport {
    pub fn total_models(&self) -> usize {
        self.reports.iter().map(|r| r.models_processed).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.reports.iter().map(|r| r.errors.len()).sum()
    }
}

/// Periodic catalog-to-registry synchronizer.
pub struct CatalogIngester {
    registry: Arc<ModelRegistry>,
    fetchers: DashMap<String, Arc<dyn CatalogFetcher>>,
    mapper: Option<Arc<dyn ModelIdMapper>>,
}

impl CatalogIngester {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            fetchers: DashMap::new(),
            mapper: None,
        }
    }

    /// Install a custom canonical-id mapper.
    pub fn with_mapper(mut self, mapper: Arc<dyn ModelIdMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Register the fetcher for one provider.
    pub fn register_fetcher(&self, provider: &str, fetcher: Arc<dyn CatalogFetcher>) {
        tracing::info!(provider, "registered catalog fetcher");
        self.fetchers.insert(provider.to_lowercase(), fetcher);
    }

    /// Fetch and ingest one provider's catalog.
    pub async fn sync(&self, provider: &str) -> Result<SyncReport, GatewayError> {
        let provider = provider.to_lowercase();
        let fetcher = self
            .fetchers
            .get(&provider)
            .map(|f| f.clone())
            .ok_or_else(|| GatewayError::CatalogFetch {
                provider: provider.clone(),
                message: "no fetcher registered".to_string(),
            })?;

        let entries = fetcher
            .fetch()
            .await
            .map_err(|e| GatewayError::CatalogFetch {
                provider: provider.clone(),
                message: e.to_string(),
            })?;

        Ok(self.ingest_catalog(&provider, entries).await)
    }

    /// Sync every provider with a registered fetcher.
    ///
    /// A provider whose fetch fails contributes a report carrying the
    /// error; the pass itself never aborts.
    pub async fn sync_all(&self) -> CombinedReport {
        let mut providers: Vec<String> = self.fetchers.iter().map(|f| f.key().clone()).collect();
        providers.sort();

        let mut combined = CombinedReport::default();
        for provider in providers {
            match self.sync(&provider).await {
                Ok(report) => combined.reports.push(report),
                Err(e) => {
                    tracing::error!(provider = %provider, "catalog sync failed: {e}");
                    let mut report = SyncReport::new(&provider);
                    report.errors.push(e.to_string());
                    combined.reports.push(report);
                }
            }
        }
        combined
    }

    /// Ingest an already-fetched catalog for one provider.
    pub async fn ingest_catalog(&self, provider: &str, entries: Vec<CatalogEntry>) -> SyncReport {
        let provider = provider.to_lowercase();
        let mut report = SyncReport::new(&provider);
        let mut touched: HashSet<String> = HashSet::new();

        for entry in entries {
            report.models_processed += 1;
            match self.ingest_entry(&provider, entry).await {
                Ok((canonical_id, created)) => {
                    if created {
                        report.canonical_created += 1;
                    } else {
                        report.canonical_updated += 1;
                    }
                    touched.insert(canonical_id);
                }
                Err(message) => {
                    tracing::warn!(provider = %provider, "catalog entry rejected: {message}");
                    report.errors.push(message);
                }
            }
        }

        // A model this provider previously served but no longer lists gets
        // its binding disabled, never deleted.
        for model in self.registry.list_by_provider(&provider).await {
            if !touched.contains(&model.id) {
                if self
                    .registry
                    .set_binding_enabled(&model.id, &provider, false)
                    .await
                {
                    report.bindings_disabled += 1;
                }
            }
        }

        tracing::info!(
            provider = %report.provider,
            processed = report.models_processed,
            created = report.canonical_created,
            updated = report.canonical_updated,
            disabled = report.bindings_disabled,
            errors = report.errors.len(),
            "catalog sync finished"
        );
        report
    }

    async fn ingest_entry(
        &self,
        provider: &str,
        entry: CatalogEntry,
    ) -> Result<(String, bool), String> {
        let native_id = entry.id.trim().to_string();
        if native_id.is_empty() {
            return Err("entry has no model id".to_string());
        }

        let canonical_id = match &self.mapper {
            Some(mapper) => mapper
                .canonical_id(provider, &entry)
                .ok_or_else(|| format!("mapper skipped {native_id}"))?,
            None => entry
                .canonical_slug
                .clone()
                .unwrap_or_else(|| default_canonical_id(&native_id)),
        }
        .to_lowercase();

        // Follow aliases so a provider's spelling of an already-known model
        // merges into the existing canonical instead of forking a new one.
        let (canonical_id, created) = match self.registry.resolve(&canonical_id).await {
            Some(existing) => (existing, false),
            None => (canonical_id, true),
        };

        let existing = self.registry.get(&canonical_id).await;
        let priority = existing
            .as_ref()
            .map(|model| match model.binding(provider) {
                Some(binding) => binding.priority,
                None => model.bindings.iter().map(|b| b.priority).max().unwrap_or(0) + 1,
            })
            .unwrap_or(1);

        let mut binding = ProviderBinding::new(provider, &native_id)
            .with_priority(priority)
            .with_features(entry.features.clone());
        binding.context_length = entry.context_length;
        binding.max_output_tokens = entry.max_output_tokens;
        if let Some(pricing) = entry.pricing {
            binding.input_cost = Some(normalize_to_per_token(pricing.input, pricing.unit));
            binding.output_cost = Some(normalize_to_per_token(pricing.output, pricing.unit));
        }

        if existing.is_none() {
            let name = entry.name.clone().unwrap_or_else(|| canonical_id.clone());
            let mut model = CanonicalModel::new(&canonical_id, name).with_binding(binding);
            if let Some(description) = entry.description.clone() {
                model = model.with_description(description);
            }
            if !entry.modalities.is_empty() {
                model = model.with_modalities(entry.modalities.clone());
            }
            self.registry.register(model).await.map_err(|e| e.to_string())?;
        } else {
            self.registry
                .upsert_binding(&canonical_id, binding)
                .await
                .map_err(|e| e.to_string())?;
        }

        for alias in &entry.aliases {
            self.registry.add_alias(alias, &canonical_id).await;
        }

        Ok((canonical_id, created))
    }

    /// Re-sync every provider on a timer. Runs until the task is aborted.
    pub async fn run_refresh_loop(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.sync_all().await;
            tracing::info!(
                providers = report.reports.len(),
                models = report.total_models(),
                errors = report.total_errors(),
                "periodic catalog refresh complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetroute_core::health::HealthTracker;

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::new(Arc::new(HealthTracker::default())))
    }

    fn entry(id: &str) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn default_normalizer_strips_vendor_prefixes() {
        assert_eq!(
            default_canonical_id("accounts/fireworks/models/llama-v3p3-70b"),
            "llama-v3p3-70b"
        );
        assert_eq!(
            default_canonical_id("meta-llama/Llama-3.3-70B-Instruct"),
            "llama-3.3-70b-instruct"
        );
        assert_eq!(default_canonical_id("openai/gpt-oss-120b"), "gpt-oss-120b");
        assert_eq!(default_canonical_id("@cf/qwen-2.5"), "cf/qwen-2.5");
        assert_eq!(default_canonical_id("plain-id"), "plain-id");
    }

    #[tokio::test]
    async fn ingest_creates_canonical_models_with_normalized_pricing() {
        let registry = registry();
        let ingester = CatalogIngester::new(registry.clone());

        let mut first = entry("meta-llama/llama-3.3-70b-instruct");
        first.name = Some("Llama 3.3 70B Instruct".to_string());
        first.context_length = Some(131072);
        first.features = vec!["streaming".to_string()];
        first.pricing = Some(CatalogPricing {
            input: 0.12,
            output: 0.3,
            unit: PriceUnit::Per1mTokens,
        });
        first.aliases = vec!["llama-3.3-70b".to_string()];

        let report = ingester.ingest_catalog("openrouter", vec![first]).await;
        assert_eq!(report.canonical_created, 1);
        assert!(report.errors.is_empty());

        let canonical = registry.resolve("llama-3.3-70b").await.unwrap();
        assert_eq!(canonical, "llama-3.3-70b-instruct");
        let model = registry.get(&canonical).await.unwrap();
        let binding = model.binding("openrouter").unwrap();
        assert!((binding.input_cost.unwrap() - 1.2e-7).abs() < 1e-18);
        assert_eq!(binding.context_length, Some(131072));
        // Composite alias registered for free.
        assert_eq!(
            registry
                .resolve("openrouter/meta-llama/llama-3.3-70b-instruct")
                .await
                .unwrap(),
            canonical
        );
    }

    #[tokio::test]
    async fn second_provider_merges_into_the_same_canonical() {
        let registry = registry();
        let ingester = CatalogIngester::new(registry.clone());

        ingester
            .ingest_catalog("openrouter", vec![entry("meta-llama/llama-3.3-70b-instruct")])
            .await;
        let report = ingester
            .ingest_catalog(
                "fireworks",
                vec![entry("accounts/fireworks/models/llama-3.3-70b-instruct")],
            )
            .await;
        assert_eq!(report.canonical_created, 0);
        assert_eq!(report.canonical_updated, 1);

        let model = registry.get("llama-3.3-70b-instruct").await.unwrap();
        assert_eq!(model.bindings.len(), 2);
        // The later provider gets the next priority slot.
        assert_eq!(model.binding("fireworks").unwrap().priority, 2);
    }

    #[tokio::test]
    async fn reingest_is_idempotent() {
        let registry = registry();
        let ingester = CatalogIngester::new(registry.clone());
        let catalog = vec![entry("meta-llama/llama-3.3-70b-instruct")];

        ingester.ingest_catalog("openrouter", catalog.clone()).await;
        let before = registry.get("llama-3.3-70b-instruct").await.unwrap();

        let report = ingester.ingest_catalog("openrouter", catalog).await;
        assert_eq!(report.canonical_created, 0);
        assert_eq!(report.canonical_updated, 1);
        assert_eq!(report.bindings_disabled, 0);

        let after = registry.get("llama-3.3-70b-instruct").await.unwrap();
        assert_eq!(before.bindings.len(), after.bindings.len());
        assert_eq!(
            before.binding("openrouter").unwrap().priority,
            after.binding("openrouter").unwrap().priority
        );
    }

    #[tokio::test]
    async fn missing_entries_disable_bindings_instead_of_deleting() {
        let registry = registry();
        let ingester = CatalogIngester::new(registry.clone());

        ingester
            .ingest_catalog("openrouter", vec![entry("model-a"), entry("model-b")])
            .await;
        let report = ingester
            .ingest_catalog("openrouter", vec![entry("model-a")])
            .await;
        assert_eq!(report.bindings_disabled, 1);

        // The canonical model survives with a disabled binding.
        let model = registry.get("model-b").await.unwrap();
        assert!(!model.binding("openrouter").unwrap().enabled);
    }

    #[tokio::test]
    async fn entry_failures_are_collected_without_aborting() {
        let registry = registry();
        let ingester = CatalogIngester::new(registry.clone());

        let report = ingester
            .ingest_catalog("openrouter", vec![entry(""), entry("good-model")])
            .await;
        assert_eq!(report.models_processed, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.canonical_created, 1);
        assert!(registry.get("good-model").await.is_some());
    }

    #[tokio::test]
    async fn custom_mapper_overrides_the_normalizer() {
        struct FixedMapper;
        impl ModelIdMapper for FixedMapper {
            fn canonical_id(&self, _provider: &str, entry: &CatalogEntry) -> Option<String> {
                if entry.id.contains("skip") {
                    None
                } else {
                    Some("mapped-model".to_string())
                }
            }
        }

        let registry = registry();
        let ingester = CatalogIngester::new(registry.clone()).with_mapper(Arc::new(FixedMapper));
        let report = ingester
            .ingest_catalog("groq", vec![entry("whatever/native"), entry("skip-me")])
            .await;

        assert_eq!(report.canonical_created, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(registry.get("mapped-model").await.is_some());
    }

    #[tokio::test]
    async fn sync_pulls_from_the_registered_fetcher() {
        struct StaticFetcher(Vec<CatalogEntry>);

        #[async_trait::async_trait]
        impl CatalogFetcher for StaticFetcher {
            async fn fetch(&self) -> anyhow::Result<Vec<CatalogEntry>> {
                Ok(self.0.clone())
            }
        }

        struct FailingFetcher;

        #[async_trait::async_trait]
        impl CatalogFetcher for FailingFetcher {
            async fn fetch(&self) -> anyhow::Result<Vec<CatalogEntry>> {
                anyhow::bail!("upstream 500")
            }
        }

        let registry = registry();
        let ingester = CatalogIngester::new(registry.clone());
        ingester.register_fetcher(
            "openrouter",
            Arc::new(StaticFetcher(vec![entry("model-a")])),
        );
        ingester.register_fetcher("together", Arc::new(FailingFetcher));

        assert!(ingester.sync("unregistered").await.is_err());

        let combined = ingester.sync_all().await;
        assert_eq!(combined.reports.len(), 2);
        assert_eq!(combined.total_models(), 1);
        assert_eq!(combined.total_errors(), 1);
        assert!(registry.get("model-a").await.is_some());
    }

    #[test]
    fn unknown_catalog_fields_land_in_the_side_bag() {
        let raw = serde_json::json!({
            "id": "some/native",
            "context_length": 8192,
            "vendor_specific": {"tier": "turbo"},
            "another_field": 42
        });
        let entry: CatalogEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.id, "some/native");
        assert_eq!(entry.context_length, Some(8192));
        assert_eq!(entry.extra.len(), 2);
        assert!(entry.extra.contains_key("vendor_specific"));
    }
}
