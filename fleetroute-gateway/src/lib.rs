//! # Fleetroute Gateway
//!
//! Orchestration layer over [`fleetroute_core`]: takes an
//! OpenAI-compatible chat-completion request from the caller, routes it
//! through the canonical registry and health-aware failover selector, and
//! accounts for what happened: token usage, per-token pricing, monetary
//! cost, and a durable outcome record per request.
//!
//! ## Modules
//!
//! - [`executor`]: end-to-end request orchestration, streaming included
//! - [`pricing`]: per-token price normalization and source-ordered
//!   resolution (`database` → `catalog` → `manual` → `free`/`unknown`)
//! - [`ingest`]: periodic provider-catalog synchronization into the
//!   registry
//! - [`curated`]: TOML-curated model catalogs applied at startup
//! - [`storage`]: persistence traits (`model_pricing`,
//!   `chat_completion_requests`) and an in-memory implementation
//! - [`metrics`]: counter/histogram/gauge sink contract
//! - [`config`]: env-driven configuration and adapter bootstrapping
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use fleetroute_core::health::HealthTracker;
//! use fleetroute_core::models::{ChatRequest, Message};
//! use fleetroute_core::providers::AdapterRegistry;
//! use fleetroute_core::registry::ModelRegistry;
//! use fleetroute_gateway::config::GatewayConfig;
//! use fleetroute_gateway::curated::{apply_curated, CuratedCatalog};
//! use fleetroute_gateway::executor::{CompletionRequest, RequestExecutor};
//! use fleetroute_gateway::storage::MemoryStore;
//!
//! let config = GatewayConfig::from_env()?;
//! config.init_tracing();
//!
//! let registry = Arc::new(ModelRegistry::new(Arc::new(HealthTracker::default())));
//! apply_curated(&registry, &CuratedCatalog::from_file("models.toml")?).await?;
//!
//! let adapters = Arc::new(config.build_adapters());
//! let executor = RequestExecutor::new(registry, adapters, MemoryStore::shared());
//!
//! let outcome = executor
//!     .execute(CompletionRequest::new(ChatRequest {
//!         model: "llama-3.3-70b".to_string(),
//!         messages: vec![Message::user("Hello!")],
//!         ..Default::default()
//!     }))
//!     .await;
//! ```

pub mod config;
pub mod curated;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod metrics;
pub mod pricing;
pub mod storage;

pub use config::GatewayConfig;
pub use curated::{apply_curated, CuratedCatalog};
pub use error::GatewayError;
pub use executor::{CompletionOutcome, CompletionRequest, RequestExecutor};
pub use ingest::{CatalogEntry, CatalogFetcher, CatalogIngester, SyncReport};
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};
pub use pricing::{PricingRecord, PricingResolver, PricingSource};
pub use storage::{MemoryStore, OutcomeStore, PricingStore, RequestOutcomeRecord};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_key_convention_matches_provider_slugs() {
        assert_eq!(config::env_key_for("deepinfra"), "DEEPINFRA_API_KEY");
    }

    #[test]
    fn pricing_sources_render_as_their_tags() {
        assert_eq!(PricingSource::Catalog.to_string(), "catalog");
        assert_eq!(PricingSource::Unknown.to_string(), "unknown");
    }
}
