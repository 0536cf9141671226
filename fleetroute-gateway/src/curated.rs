//! # Curated Model Catalogs
//!
//! Startup seeding for the registry. A curated catalog is a TOML document
//! describing canonical models, their aliases, and per-provider bindings
//! with explicit priorities: the hand-maintained complement to live
//! catalog ingest, used for the models the gateway must know about before
//! the first sync completes.
//!
//! ```toml
//! [[models]]
//! id = "llama-3.3-70b"
//! name = "Llama 3.3 70B Instruct"
//! aliases = ["meta-llama/llama-3.3-70b", "llama-3.3-70b-instruct"]
//!
//! [[models.providers]]
//! slug = "fireworks"
//! native_id = "accounts/fireworks/models/llama-v3p3-70b-instruct"
//! priority = 1
//! input_cost = 0.9
//! output_cost = 0.9
//! price_unit = "per_1m_tokens"
//! features = ["streaming", "tools"]
//! ```

use crate::error::GatewayError;
use crate::pricing::{normalize_to_per_token, PriceUnit};
use fleetroute_core::registry::{CanonicalModel, ModelRegistry, ProviderBinding};
use serde::Deserialize;
use std::path::Path;

/// A curated catalog document.
#[derive(Debug, Clone, Deserialize)]
pub struct CuratedCatalog {
    #[serde(default)]
    pub models: Vec<CuratedModel>,
}

/// One curated canonical model.
#[derive(Debug, Clone, Deserialize)]
pub struct CuratedModel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub modalities: Vec<String>,
    #[serde(default)]
    pub providers: Vec<CuratedProvider>,
}

/// One provider binding inside a curated model.
#[derive(Debug, Clone, Deserialize)]
pub struct CuratedProvider {
    pub slug: String,
    pub native_id: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub requires_credentials: bool,
    #[serde(default)]
    pub input_cost: Option<f64>,
    #[serde(default)]
    pub output_cost: Option<f64>,
    /// Unit the raw costs are expressed in; stored per-token
    #[serde(default)]
    pub price_unit: PriceUnit,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_priority() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl CuratedCatalog {
    pub fn from_toml_str(raw: &str) -> Result<Self, GatewayError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

impl CuratedModel {
    fn to_canonical(&self) -> CanonicalModel {
        let mut model = CanonicalModel::new(&self.id, &self.name).with_aliases(self.aliases.clone());
        if let Some(description) = &self.description {
            model = model.with_description(description.clone());
        }
        if !self.modalities.is_empty() {
            model = model.with_modalities(self.modalities.clone());
        }
        for provider in &self.providers {
            let mut binding = ProviderBinding::new(&provider.slug, &provider.native_id)
                .with_priority(provider.priority)
                .with_enabled(provider.enabled)
                .with_requires_credentials(provider.requires_credentials)
                .with_features(provider.features.clone());
            binding.input_cost = provider
                .input_cost
                .map(|c| normalize_to_per_token(c, provider.price_unit));
            binding.output_cost = provider
                .output_cost
                .map(|c| normalize_to_per_token(c, provider.price_unit));
            binding.context_length = provider.context_length;
            binding.max_output_tokens = provider.max_output_tokens;
            model = model.with_binding(binding);
        }
        model
    }
}

/// Register every curated model and its aliases. Returns how many models
/// were applied; models without bindings are skipped with a warning.
pub async fn apply_curated(
    registry: &ModelRegistry,
    catalog: &CuratedCatalog,
) -> Result<usize, GatewayError> {
    let mut applied = 0;
    for curated in &catalog.models {
        if curated.providers.is_empty() {
            tracing::warn!(model = %curated.id, "curated model has no providers, skipping");
            continue;
        }
        registry.register(curated.to_canonical()).await?;
        applied += 1;
    }
    tracing::info!(models = applied, "curated catalog applied");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetroute_core::health::HealthTracker;
    use std::sync::Arc;

    const SAMPLE: &str = r#"
        [[models]]
        id = "llama-3.3-70b"
        name = "Llama 3.3 70B Instruct"
        description = "Meta's 70B instruct model"
        aliases = ["meta-llama/llama-3.3-70b", "llama-3.3-70b-instruct"]

        [[models.providers]]
        slug = "fireworks"
        native_id = "accounts/fireworks/models/llama-v3p3-70b-instruct"
        priority = 1
        input_cost = 0.9
        output_cost = 0.9
        price_unit = "per_1m_tokens"
        features = ["streaming", "tools"]
        context_length = 131072

        [[models.providers]]
        slug = "openrouter"
        native_id = "meta-llama/llama-3.3-70b-instruct"
        priority = 2
        features = ["streaming"]

        [[models]]
        id = "orphan"
        name = "No Providers"
    "#;

    #[tokio::test]
    async fn curated_catalog_parses_and_applies() {
        let catalog = CuratedCatalog::from_toml_str(SAMPLE).unwrap();
        assert_eq!(catalog.models.len(), 2);

        let registry = ModelRegistry::new(Arc::new(HealthTracker::default()));
        let applied = apply_curated(&registry, &catalog).await.unwrap();
        // The orphan entry has no bindings and is skipped.
        assert_eq!(applied, 1);

        let model = registry.get("llama-3.3-70b").await.unwrap();
        assert_eq!(model.bindings.len(), 2);
        assert_eq!(model.bindings[0].provider, "fireworks");
        // 0.9 per 1M tokens becomes 9e-7 per token.
        assert!((model.bindings[0].input_cost.unwrap() - 9e-7).abs() < 1e-18);
        assert_eq!(model.context_length, Some(131072));

        assert_eq!(
            registry.resolve("Meta-Llama/Llama-3.3-70B").await.as_deref(),
            Some("llama-3.3-70b")
        );
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let catalog = CuratedCatalog::from_toml_str(
            r#"
            [[models]]
            id = "m"
            name = "M"

            [[models.providers]]
            slug = "groq"
            native_id = "m-groq"
            "#,
        )
        .unwrap();
        let provider = &catalog.models[0].providers[0];
        assert_eq!(provider.priority, 1);
        assert!(provider.enabled);
        assert!(!provider.requires_credentials);
        assert_eq!(provider.price_unit, PriceUnit::PerToken);
    }
}
