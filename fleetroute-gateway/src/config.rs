//! # Gateway Configuration
//!
//! Environment-driven configuration for the orchestration layer. There are
//! no positional subcommands; everything the core needs arrives through
//! env vars:
//!
//! - `DATABASE_URL` / `DATABASE_SERVICE_KEY`: the persistence collaborator
//! - `<SLUG>_API_KEY`: one credential per provider slug, uppercased with
//!   dashes mapped to underscores (`OPENROUTER_API_KEY`,
//!   `GOOGLE_VERTEX_API_KEY`, ...)
//! - `FLEETROUTE_LOG`: tracing filter, defaults to `info`
//! - `FLEETROUTE_PROVIDER_TIMEOUT`: per-attempt budget, e.g. `30s` / `2m`
//!
//! [`GatewayConfig::build_adapters`] turns the configured credentials into
//! a ready [`AdapterRegistry`] for every provider the generic
//! OpenAI-compatible adapter knows an endpoint for.

use crate::error::GatewayError;
use fleetroute_core::providers::openai_compat::{default_base_url, OpenAiCompatAdapter};
use fleetroute_core::providers::{AdapterConfig, AdapterRegistry};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Provider slugs the gateway looks up credentials for.
pub const KNOWN_PROVIDER_SLUGS: &[&str] = &[
    "openrouter",
    "google-vertex",
    "fireworks",
    "together",
    "deepinfra",
    "huggingface",
    "groq",
    "mistral",
    "perplexity",
    "cohere",
    "anthropic",
    "openai",
    "azure",
    "cerebras",
    "sambanova",
    "hyperbolic",
    "novita",
    "nebius",
    "xai",
    "anyscale",
    "lepton",
    "lambda",
    "octoai",
    "replicate",
    "baseten",
];

/// Connection settings for the persistence collaborator.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub service_key: Option<String>,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub database: Option<DatabaseConfig>,
    /// Provider slug -> API key, for every slug with a configured credential
    pub provider_keys: HashMap<String, String>,
    pub log_level: String,
    pub provider_timeout: Option<Duration>,
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, GatewayError> {
        let database = env::var("DATABASE_URL").ok().map(|url| DatabaseConfig {
            url,
            service_key: env::var("DATABASE_SERVICE_KEY").ok(),
        });

        let mut provider_keys = HashMap::new();
        for slug in KNOWN_PROVIDER_SLUGS {
            if let Ok(key) = env::var(env_key_for(slug)) {
                if !key.trim().is_empty() {
                    provider_keys.insert(slug.to_string(), key);
                }
            }
        }

        let log_level = env::var("FLEETROUTE_LOG").unwrap_or_else(|_| "info".to_string());
        let provider_timeout = match env::var("FLEETROUTE_PROVIDER_TIMEOUT") {
            Ok(raw) => Some(parse_duration(&raw)?),
            Err(_) => None,
        };

        Ok(Self {
            database,
            provider_keys,
            log_level,
            provider_timeout,
        })
    }

    /// Register an OpenAI-compatible adapter for every configured provider
    /// the generic adapter knows an endpoint for.
    ///
    /// Providers with credentials but no known endpoint are skipped with a
    /// log line; they need a hand-written adapter registered by the caller.
    pub fn build_adapters(&self) -> AdapterRegistry {
        let adapters = AdapterRegistry::new();
        for (slug, key) in &self.provider_keys {
            if default_base_url(slug).is_none() {
                tracing::debug!(provider = %slug, "no generic endpoint, expecting a custom adapter");
                continue;
            }
            let mut config = AdapterConfig::new(slug.clone(), key.clone());
            if let Some(timeout) = self.provider_timeout {
                config = config.with_timeout(timeout);
            }
            match OpenAiCompatAdapter::new(config) {
                Ok(adapter) => adapters.register(adapter),
                Err(e) => {
                    tracing::warn!(provider = %slug, "failed to build adapter: {e}");
                }
            }
        }
        adapters
    }

    /// Install the global tracing subscriber with this config's filter.
    pub fn init_tracing(&self) {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_new(&self.log_level)
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

/// Env var name holding a provider's API key.
pub fn env_key_for(slug: &str) -> String {
    format!("{}_API_KEY", slug.to_uppercase().replace('-', "_"))
}

/// Parse `30s` / `5m` / `2h` / `500ms` style durations.
pub fn parse_duration(raw: &str) -> Result<Duration, GatewayError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(GatewayError::configuration("empty duration"));
    }

    let (value, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len()));
    let value: u64 = value
        .parse()
        .map_err(|_| GatewayError::configuration(format!("invalid duration: {raw}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" | "" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(GatewayError::configuration(format!(
            "invalid duration unit: {raw}"
        ))),
    }
}
