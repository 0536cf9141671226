//! # Gateway Error Types Module
//!
//! This module defines the error type for the orchestration layer,
//! covering everything that can fail outside of a provider call.
//!
//! ## Overview
//!
//! The error system provides:
//! - **Standardized Error Types**: one enum for every orchestration-layer
//!   failure
//! - **Source Preservation**: parse and IO errors keep their underlying
//!   cause via `#[from]` conversions
//! - **Clean Layering**: provider-call failures stay typed as
//!   [`fleetroute_core::error::ProviderError`] and never pass through here;
//!   request-level classification lives in
//!   [`fleetroute_core::error::ErrorKind`]
//!
//! ## Error Categories
//!
//! ### Configuration Errors
//! Invalid or missing environment configuration, unparseable durations,
//! malformed curated-catalog TOML, unreadable config files.
//!
//! ### Registry Errors
//! Rejected registrations (no bindings, invalid priorities) and references
//! to unknown canonical models, forwarded from the core registry.
//!
//! ### Storage Errors
//! Failures from the persistence collaborator behind the pricing and
//! outcome stores.
//!
//! ### Catalog Errors
//! A provider fetcher failing wholesale during sync. Per-entry failures
//! are collected into the sync report instead and never surface here.
//!
//! ## Usage
//!
//! ```rust
//! use fleetroute_gateway::error::GatewayError;
//!
//! fn load() -> Result<(), GatewayError> {
//!     let catalog = fleetroute_gateway::curated::CuratedCatalog::from_file("models.toml")?;
//!     if catalog.models.is_empty() {
//!         return Err(GatewayError::configuration("curated catalog is empty"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Storage implementations wrap backend failures with
//! [`GatewayError::storage`] so callers see one error shape regardless of
//! the store behind the trait.

use fleetroute_core::registry::RegistryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Invalid or missing configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Curated catalog or config file failed to parse
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config file could not be read
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Registry rejected an operation
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The persistence collaborator failed
    #[error("storage error: {message}")]
    Storage { message: String },

    /// A catalog fetcher failed wholesale
    #[error("catalog fetch failed for {provider}: {message}")]
    CatalogFetch { provider: String, message: String },
}

impl GatewayError {
    pub fn storage(message: impl Into<String>) -> Self {
        GatewayError::Storage {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        GatewayError::Configuration {
            message: message.into(),
        }
    }
}
