//! # Provider Adapter Module
//!
//! This module defines the adapter abstraction every upstream LLM API is
//! reached through: a thin, uniform surface over one provider's HTTP
//! interface.
//!
//! ## Overview
//!
//! The adapter layer provides:
//! - **Unified Provider Interface**: the [`ProviderAdapter`] trait, taking
//!   the provider's *native* model id plus an OpenAI-shaped request
//! - **Typed Failures**: errors carry the upstream status code, which is
//!   what the failover policy keys on
//! - **Streaming Support**: a boxed chunk stream ([`ChunkStream`]) for
//!   providers that stream completions
//! - **Runtime Registration**: the [`AdapterRegistry`] maps provider slugs
//!   to adapters; the executor looks them up at dispatch time
//! - **A Generic Fleet Adapter**: most of the fleet speaks the OpenAI wire
//!   format and is covered by [`openai_compat::OpenAiCompatAdapter`];
//!   bespoke APIs implement the trait directly
//!
//! ## Usage Examples
//!
//! ### Registering Fleet Providers
//!
//! ```rust
//! use fleetroute_core::providers::{AdapterConfig, AdapterRegistry};
//! use fleetroute_core::providers::openai_compat::OpenAiCompatAdapter;
//!
//! let adapters = AdapterRegistry::new();
//! let fireworks = OpenAiCompatAdapter::new(AdapterConfig::new("fireworks", "fw-key"))?;
//! adapters.register(fireworks);
//! assert!(adapters.contains("fireworks"));
//! ```
//!
//! ### Implementing a Bespoke Adapter
//!
//! ```rust
//! use fleetroute_core::error::ProviderError;
//! use fleetroute_core::models::{ChatRequest, ChatResponse};
//! use fleetroute_core::providers::{ChunkStream, ProviderAdapter};
//!
//! struct InHouseAdapter;
//!
//! #[async_trait::async_trait]
//! impl ProviderAdapter for InHouseAdapter {
//!     fn slug(&self) -> &str {
//!         "in-house"
//!     }
//!
//!     async fn complete(
//!         &self,
//!         native_id: &str,
//!         request: ChatRequest,
//!     ) -> Result<ChatResponse, ProviderError> {
//!         // Call the in-house inference service here.
//!         todo!()
//!     }
//!
//!     async fn stream(
//!         &self,
//!         native_id: &str,
//!         request: ChatRequest,
//!     ) -> Result<ChunkStream, ProviderError> {
//!         Err(ProviderError::Configuration {
//!             message: "streaming not supported".to_string(),
//!         })
//!     }
//! }
//! ```
//!
//! ## Best Practices
//!
//! - **Keep Statuses**: map upstream failures so their HTTP status
//!   survives; a swallowed status breaks retry classification
//! - **One Slug, One Adapter**: re-registering a slug replaces the old
//!   adapter, which is how credential rotation is deployed
//! - **Stay Stateless**: adapters are shared across concurrent requests;
//!   per-request state belongs in the request, not the adapter

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, StreamChunk};
use dashmap::DashMap;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub mod openai_compat;

/// Boxed stream of completion chunks from a streaming call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Uniform interface over one upstream provider.
///
/// `native_id` is always the provider's own model identifier; translation
/// from canonical ids happens upstream in the registry and executor.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider slug this adapter serves (e.g. `openrouter`).
    fn slug(&self) -> &str;

    /// Whether streaming completions are supported.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Perform a blocking chat completion.
    async fn complete(
        &self,
        native_id: &str,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError>;

    /// Open a streaming chat completion.
    async fn stream(
        &self,
        native_id: &str,
        request: ChatRequest,
    ) -> Result<ChunkStream, ProviderError>;
}

/// Connection settings for one provider adapter.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Provider slug, lowercased
    pub slug: String,
    /// Bearer credential sent with every request
    pub api_key: String,
    /// Override for the provider's default endpoint
    pub base_url: Option<String>,
    /// Per-request timeout on the underlying HTTP client
    pub timeout: Duration,
    /// Extra headers (e.g. OpenRouter's `HTTP-Referer`)
    pub headers: HashMap<String, String>,
}

impl AdapterConfig {
    pub fn new(slug: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            slug: slug.into().to_lowercase(),
            api_key: api_key.into(),
            base_url: None,
            timeout: Duration::from_secs(120),
            headers: HashMap::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Process-wide map from provider slug to adapter.
///
/// Any value implementing [`ProviderAdapter`] can be registered;
/// re-registering a slug replaces the previous adapter.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: DashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own slug.
    pub fn register(&self, adapter: impl ProviderAdapter + 'static) {
        self.register_arc(Arc::new(adapter));
    }

    /// Register an already-shared adapter.
    pub fn register_arc(&self, adapter: Arc<dyn ProviderAdapter>) {
        let slug = adapter.slug().to_lowercase();
        tracing::info!(provider = %slug, "registered provider adapter");
        self.adapters.insert(slug, adapter);
    }

    pub fn get(&self, slug: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&slug.to_lowercase()).map(|a| a.clone())
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.adapters.contains_key(&slug.to_lowercase())
    }

    /// Registered slugs, sorted for deterministic iteration.
    pub fn slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.adapters.iter().map(|a| a.key().clone()).collect();
        slugs.sort();
        slugs
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    struct EchoAdapter;

    #[async_trait::async_trait]
    impl ProviderAdapter for EchoAdapter {
        fn slug(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            native_id: &str,
            request: ChatRequest,
        ) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                id: "echo-1".to_string(),
                object: "chat.completion".to_string(),
                created: 0,
                model: native_id.to_string(),
                choices: vec![crate::models::Choice {
                    index: 0,
                    message: Message::assistant(request.messages[0].content.clone()),
                    finish_reason: Some("stop".to_string()),
                    logprobs: None,
                }],
                usage: None,
                system_fingerprint: None,
            })
        }

        async fn stream(
            &self,
            _native_id: &str,
            _request: ChatRequest,
        ) -> Result<ChunkStream, ProviderError> {
            Err(ProviderError::Configuration {
                message: "streaming not supported".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_slug() {
        let adapters = AdapterRegistry::new();
        adapters.register(EchoAdapter);

        assert!(adapters.contains("echo"));
        assert!(adapters.contains("ECHO"));
        assert!(!adapters.contains("other"));
        assert_eq!(adapters.slugs(), ["echo"]);

        let adapter = adapters.get("echo").unwrap();
        let response = adapter
            .complete(
                "echo-model-v1",
                ChatRequest {
                    model: "ignored".to_string(),
                    messages: vec![Message::user("hello")],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(response.model, "echo-model-v1");
        assert_eq!(response.choices[0].message.content, "hello");
    }

    #[test]
    fn adapter_config_builder() {
        let config = AdapterConfig::new("OpenRouter", "key")
            .with_base_url("http://localhost:9999/v1")
            .with_timeout(Duration::from_secs(5))
            .with_header("HTTP-Referer", "https://example.test");
        assert_eq!(config.slug, "openrouter");
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:9999/v1"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.headers.len(), 1);
    }
}
