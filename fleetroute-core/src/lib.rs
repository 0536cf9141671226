//! # Fleetroute Core
//!
//! Core routing machinery for a multi-provider LLM gateway. A single
//! logical model (e.g. `llama-3.3-70b`) is implemented by many upstream
//! providers, each with its own native model id, pricing, features, and
//! health profile; this crate treats that heterogeneous fleet as
//! interchangeable capacity.
//!
//! ## Modules
//!
//! - [`models`]: OpenAI-shaped chat request/response wire types
//! - [`error`]: typed provider errors and the closed outcome taxonomy
//! - [`registry`]: canonical model registry: aggregation, aliases,
//!   resolution, and strategy-ranked provider selection
//! - [`health`]: per (model, provider) circuit breakers with latency
//!   tracking and a slow-response policy
//! - [`selector`]: failover executor that walks the ordered provider plan
//! - [`providers`]: the provider adapter trait, adapter registry, and a
//!   generic OpenAI-compatible HTTP adapter
//!
//! ## Flow
//!
//! ```text
//! resolve(model) ──► select_providers(strategy, filters) ──► plan
//!                         │                                    │
//!                   HealthTracker ◄── record success/failure ──┤
//!                                                              ▼
//!                                              run_fn(provider, native_id)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fleetroute_core::health::HealthTracker;
//! use fleetroute_core::registry::{CanonicalModel, ModelRegistry, ProviderBinding};
//! use fleetroute_core::selector::{ExecuteOptions, FailoverSelector, SelectorConfig};
//!
//! let registry = Arc::new(ModelRegistry::new(Arc::new(HealthTracker::default())));
//! registry
//!     .register(
//!         CanonicalModel::new("llama-3.3-70b", "Llama 3.3 70B")
//!             .with_binding(ProviderBinding::new("fireworks", "accounts/fireworks/models/llama-v3p3-70b")),
//!     )
//!     .await?;
//!
//! let selector = FailoverSelector::new(registry, SelectorConfig::default());
//! let outcome = selector
//!     .execute("llama-3.3-70b", &ExecuteOptions::default(), |provider, native_id| async move {
//!         // dispatch to the provider adapter here
//!         Ok::<_, fleetroute_core::error::ProviderError>(format!("{provider}:{native_id}"))
//!     })
//!     .await;
//! assert!(outcome.success);
//! ```
//!
//! Shared state is designed for concurrent use: the registry is
//! read-mostly behind a reader/writer lock, health entries are sharded per
//! (model, provider) pair, and the selector never holds a lock across a
//! provider call.

pub mod error;
pub mod health;
pub mod models;
pub mod providers;
pub mod registry;
pub mod selector;

pub use error::{ErrorKind, ProviderError};
pub use health::{CircuitState, HealthConfig, HealthTracker, HealthView};
pub use models::{ChatRequest, ChatResponse, Choice, Message, Role, StreamChunk, Usage};
pub use providers::{AdapterConfig, AdapterRegistry, ChunkStream, ProviderAdapter};
pub use registry::{
    CanonicalModel, ModelRegistry, ProviderBinding, SelectionOptions, SelectionStrategy,
};
pub use selector::{Attempt, ExecuteOptions, ExecutionOutcome, FailoverSelector, SelectorConfig};
