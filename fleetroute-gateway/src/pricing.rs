//! # Pricing Resolution and Cost Attribution
//!
//! Maps a (canonical id, provider, native id) tuple to per-token prices and
//! turns token usage into money. Prices arrive from several places in
//! several units; everything is normalized to **per-token** on ingest and
//! stays per-token everywhere in memory.
//!
//! ## Resolution order
//!
//! 1. The durable `model_pricing` table, cached as an immutable snapshot
//!    (`source = database`)
//! 2. Catalog-derived pricing stored on the provider binding
//!    (`source = catalog`)
//! 3. Manual overrides loaded at startup (`source = manual`)
//! 4. Fallback: a record whose prices are all zero is `free`; no record at
//!    all is `unknown`, and the caller decides whether to continue
//!
//! ## Snapshot cache
//!
//! Lookups never take a lock: they clone an `Arc` pointer to the current
//! snapshot. [`PricingResolver::refresh`] rebuilds the table from the
//! store and swaps the pointer under a single write lock.
//!
//! Costs are plain f64 multiplication with no rounding before
//! persistence; the storage collaborator maps values onto NUMERIC columns.

use crate::error::GatewayError;
use crate::storage::PricingStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Unit a raw price value is expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    #[default]
    PerToken,
    #[serde(rename = "per_1k_tokens")]
    Per1kTokens,
    #[serde(rename = "per_1m_tokens")]
    Per1mTokens,
}

/// Scale a raw price into per-token form.
pub fn normalize_to_per_token(value: f64, unit: PriceUnit) -> f64 {
    match unit {
        PriceUnit::PerToken => value,
        PriceUnit::Per1kTokens => value / 1_000.0,
        PriceUnit::Per1mTokens => value / 1_000_000.0,
    }
}

/// Where a resolved price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingSource {
    Database,
    Catalog,
    Manual,
    Free,
    Unknown,
}

impl std::fmt::Display for PricingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PricingSource::Database => "database",
            PricingSource::Catalog => "catalog",
            PricingSource::Manual => "manual",
            PricingSource::Free => "free",
            PricingSource::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// One pricing row, keyed by canonical id or by (provider, native id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRecord {
    /// Canonical id or native id this row prices
    pub model: String,
    /// Present when the row is provider-specific
    pub provider: Option<String>,
    /// Per-token input price
    pub input_price: f64,
    /// Per-token output price
    pub output_price: f64,
    pub source: PricingSource,
    pub updated_at: DateTime<Utc>,
}

impl PricingRecord {
    /// Build a canonical-id row from a raw price in any unit.
    pub fn for_model(
        model: impl Into<String>,
        input: f64,
        output: f64,
        unit: PriceUnit,
        source: PricingSource,
    ) -> Self {
        Self {
            model: model.into().to_lowercase(),
            provider: None,
            input_price: normalize_to_per_token(input, unit),
            output_price: normalize_to_per_token(output, unit),
            source,
            updated_at: Utc::now(),
        }
    }

    /// Build a provider-specific row from a raw price in any unit.
    pub fn for_provider_model(
        provider: impl Into<String>,
        native_id: impl Into<String>,
        input: f64,
        output: f64,
        unit: PriceUnit,
        source: PricingSource,
    ) -> Self {
        Self {
            model: native_id.into().to_lowercase(),
            provider: Some(provider.into().to_lowercase()),
            input_price: normalize_to_per_token(input, unit),
            output_price: normalize_to_per_token(output, unit),
            source,
            updated_at: Utc::now(),
        }
    }

    fn is_free(&self) -> bool {
        self.input_price == 0.0 && self.output_price == 0.0
    }
}

/// Pricing selected for one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedPricing {
    pub input_price: f64,
    pub output_price: f64,
    pub source: PricingSource,
}

impl ResolvedPricing {
    /// Compute the monetary cost of a token count under this pricing.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> CostBreakdown {
        let input_cost = input_tokens as f64 * self.input_price;
        let output_cost = output_tokens as f64 * self.output_price;
        CostBreakdown {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }
}

/// Cost of one request, per side and total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Immutable lookup table built from pricing rows.
#[derive(Default)]
struct PricingTable {
    by_model: HashMap<String, PricingRecord>,
    by_provider_model: HashMap<(String, String), PricingRecord>,
}

impl PricingTable {
    fn from_records(records: Vec<PricingRecord>, source: PricingSource) -> Self {
        let mut table = PricingTable::default();
        for mut record in records {
            record.source = source;
            record.model = record.model.to_lowercase();
            match &record.provider {
                Some(provider) => {
                    table
                        .by_provider_model
                        .insert((provider.to_lowercase(), record.model.clone()), record);
                }
                None => {
                    table.by_model.insert(record.model.clone(), record);
                }
            }
        }
        table
    }

    fn lookup(&self, canonical_id: &str, provider: &str, native_id: &str) -> Option<&PricingRecord> {
        self.by_model
            .get(canonical_id)
            .or_else(|| {
                self.by_provider_model
                    .get(&(provider.to_string(), native_id.to_lowercase()))
            })
            .or_else(|| self.by_model.get(&native_id.to_lowercase()))
    }
}

/// Source-ordered price resolver with a swapped-snapshot cache.
pub struct PricingResolver {
    store: Option<Arc<dyn PricingStore>>,
    snapshot: RwLock<Arc<PricingTable>>,
    manual: Arc<PricingTable>,
}

impl PricingResolver {
    /// Resolver with no database backing; catalog and manual sources only.
    pub fn new() -> Self {
        Self {
            store: None,
            snapshot: RwLock::new(Arc::new(PricingTable::default())),
            manual: Arc::new(PricingTable::default()),
        }
    }

    /// Resolver backed by the `model_pricing` store. Call
    /// [`PricingResolver::refresh`] to populate the snapshot.
    pub fn with_store(store: Arc<dyn PricingStore>) -> Self {
        Self {
            store: Some(store),
            snapshot: RwLock::new(Arc::new(PricingTable::default())),
            manual: Arc::new(PricingTable::default()),
        }
    }

    /// Install startup-time manual overrides.
    pub fn with_manual_overrides(mut self, records: Vec<PricingRecord>) -> Self {
        self.manual = Arc::new(PricingTable::from_records(records, PricingSource::Manual));
        self
    }

    /// Rebuild the database snapshot from the store and swap it in.
    pub async fn refresh(&self) -> Result<usize, GatewayError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let records = store.load_pricing().await?;
        let count = records.len();
        let table = Arc::new(PricingTable::from_records(records, PricingSource::Database));
        *self.snapshot.write().await = table;
        tracing::info!(rows = count, "pricing snapshot refreshed");
        Ok(count)
    }

    /// Resolve pricing for one request.
    ///
    /// `binding_pricing` is the catalog-derived per-token price pair stored
    /// on the chosen provider binding, when the catalog declared one.
    pub async fn resolve(
        &self,
        canonical_id: &str,
        provider: &str,
        native_id: &str,
        binding_pricing: Option<(f64, f64)>,
    ) -> ResolvedPricing {
        let canonical_id = canonical_id.to_lowercase();
        let provider = provider.to_lowercase();

        let snapshot = self.snapshot.read().await.clone();
        if let Some(record) = snapshot.lookup(&canonical_id, &provider, native_id) {
            return Self::finish(record.input_price, record.output_price, PricingSource::Database);
        }

        if let Some((input_price, output_price)) = binding_pricing {
            return Self::finish(input_price, output_price, PricingSource::Catalog);
        }

        if let Some(record) = self.manual.lookup(&canonical_id, &provider, native_id) {
            return Self::finish(record.input_price, record.output_price, PricingSource::Manual);
        }

        tracing::debug!(
            model = %canonical_id,
            provider = %provider,
            native = %native_id,
            "no pricing source matched"
        );
        ResolvedPricing {
            input_price: 0.0,
            output_price: 0.0,
            source: PricingSource::Unknown,
        }
    }

    fn finish(input_price: f64, output_price: f64, source: PricingSource) -> ResolvedPricing {
        let source = if input_price == 0.0 && output_price == 0.0 {
            PricingSource::Free
        } else {
            source
        };
        ResolvedPricing {
            input_price,
            output_price,
            source,
        }
    }
}

impl Default for PricingResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn normalization_scales_by_unit() {
        assert_eq!(normalize_to_per_token(2.5, PriceUnit::Per1mTokens), 2.5e-6);
        assert_eq!(normalize_to_per_token(0.00125, PriceUnit::Per1kTokens), 1.25e-6);
        assert_eq!(normalize_to_per_token(3e-7, PriceUnit::PerToken), 3e-7);
    }

    #[test]
    fn cost_computation_multiplies_per_token_prices() {
        let pricing = ResolvedPricing {
            input_price: 2.5e-6,
            output_price: 1.0e-5,
            source: PricingSource::Catalog,
        };
        let cost = pricing.cost(400, 120);
        assert!((cost.input_cost - 0.001).abs() < 1e-12);
        assert!((cost.output_cost - 0.0012).abs() < 1e-12);
        assert!((cost.total_cost - 0.0022).abs() < 1e-12);
    }

    #[tokio::test]
    async fn database_rows_win_over_catalog_pricing() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed_pricing(vec![PricingRecord::for_model(
                "llama-3.3-70b",
                0.9,
                0.9,
                PriceUnit::Per1mTokens,
                PricingSource::Database,
            )])
            .await;

        let resolver = PricingResolver::with_store(store);
        resolver.refresh().await.unwrap();

        let resolved = resolver
            .resolve("llama-3.3-70b", "fireworks", "fw/llama", Some((5e-6, 5e-6)))
            .await;
        assert_eq!(resolved.source, PricingSource::Database);
        assert!((resolved.input_price - 9e-7).abs() < 1e-18);
    }

    #[tokio::test]
    async fn catalog_pricing_applies_when_database_misses() {
        let resolver = PricingResolver::new();
        let resolved = resolver
            .resolve("llama-3.3-70b", "fireworks", "fw/llama", Some((2.5e-6, 1.0e-5)))
            .await;
        assert_eq!(resolved.source, PricingSource::Catalog);
        assert_eq!(resolved.input_price, 2.5e-6);
    }

    #[tokio::test]
    async fn manual_overrides_are_the_last_priced_source() {
        let resolver = PricingResolver::new().with_manual_overrides(vec![
            PricingRecord::for_provider_model(
                "fireworks",
                "fw/llama",
                1.0,
                2.0,
                PriceUnit::Per1mTokens,
                PricingSource::Manual,
            ),
        ]);
        let resolved = resolver.resolve("llama-3.3-70b", "fireworks", "fw/llama", None).await;
        assert_eq!(resolved.source, PricingSource::Manual);
        assert_eq!(resolved.output_price, 2e-6);
    }

    #[tokio::test]
    async fn all_zero_prices_resolve_as_free() {
        let resolver = PricingResolver::new();
        let resolved = resolver
            .resolve("free-model", "openrouter", "free/native", Some((0.0, 0.0)))
            .await;
        assert_eq!(resolved.source, PricingSource::Free);
        assert_eq!(resolved.cost(1000, 1000).total_cost, 0.0);
    }

    #[tokio::test]
    async fn missing_pricing_resolves_as_unknown() {
        let resolver = PricingResolver::new();
        let resolved = resolver.resolve("mystery", "nowhere", "none", None).await;
        assert_eq!(resolved.source, PricingSource::Unknown);
    }

    #[tokio::test]
    async fn refresh_swaps_the_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let resolver = PricingResolver::with_store(store.clone());

        let before = resolver.resolve("m", "p", "n", None).await;
        assert_eq!(before.source, PricingSource::Unknown);

        store
            .seed_pricing(vec![PricingRecord::for_model(
                "m",
                1.0,
                1.0,
                PriceUnit::Per1kTokens,
                PricingSource::Database,
            )])
            .await;
        assert_eq!(resolver.refresh().await.unwrap(), 1);

        let after = resolver.resolve("m", "p", "n", None).await;
        assert_eq!(after.source, PricingSource::Database);
        assert_eq!(after.input_price, 1e-3);
    }
}
