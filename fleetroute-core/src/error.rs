//! # Error Handling Module
//!
//! This module defines the two layers of errors that cross the routing
//! core, with the HTTP status preserved end to end: the failover policy is
//! status-driven, and a swallowed status breaks retry classification.
//!
//! ## Overview
//!
//! The error system provides:
//! - **ProviderError**: what an adapter returns for a single upstream call,
//!   every HTTP-originated variant keeping its status code
//! - **ErrorKind**: the closed taxonomy a finished request is classified
//!   into, persisted on outcome records
//! - **Failover Eligibility**: a per-category decision on whether a failed
//!   attempt may continue to the next binding
//! - **HTTP Status Mapping**: each [`ErrorKind`] maps to the status class
//!   boundary adapters surface to callers
//! - **Message Truncation**: raw provider messages are bounded before they
//!   land on attempt records
//!
//! ## Error Categories
//!
//! ### Transient Provider Errors
//! Transport failures, 5xx, 408/425/429, undecodable responses. Recovered
//! by failover; surfaced as 502-class only after every binding is
//! exhausted.
//!
//! ### Provider Credential/Availability Errors
//! 401/403/404 against a specific provider, invalid API keys, unknown
//! native model ids, adapter misconfiguration. Provider-scoped, so the
//! chain moves on; never counted as a client error.
//!
//! ### Request Errors
//! 400 with validation detail, 422. Attributable to the request itself;
//! never retried, surfaced as-is.
//!
//! ### Routing Errors
//! [`ErrorKind::UnknownModel`] when the identifier resolves to nothing and
//! [`ErrorKind::NoAvailableProvider`] when filtering empties the plan.
//! Neither records any health side effect.
//!
//! ### Time and Cancellation
//! [`ErrorKind::DeadlineExceeded`] short-circuits failover;
//! [`ErrorKind::Cancelled`] is caller-initiated and records no health
//! failure. [`ErrorKind::PricingMissing`] never fails the request at all.
//!
//! ## HTTP Status Code Mapping
//!
//! - **404 Not Found**: unknown model identifiers
//! - **503 Service Unavailable**: plan empty after filtering
//! - **502 Bad Gateway**: provider-side failures after exhaustion
//! - **400 Bad Request**: request-scoped provider rejections
//! - **504 Gateway Timeout**: blown caller deadlines
//! - **499 Client Closed Request**: caller cancellation
//!
//! ## Usage Examples
//!
//! ### Classifying an Adapter Error
//!
//! ```rust
//! use fleetroute_core::error::{ErrorKind, ProviderError};
//!
//! let error = ProviderError::Api {
//!     code: 503,
//!     message: "upstream overloaded".to_string(),
//! };
//!
//! assert_eq!(error.kind(), ErrorKind::ProviderTransient);
//! assert!(error.failover_eligible());
//! assert_eq!(error.status_code(), Some(503));
//! ```
//!
//! ### Handling a Finished Outcome
//!
//! ```rust
//! use fleetroute_core::error::ErrorKind;
//!
//! match outcome.error_kind {
//!     None => println!("served"),
//!     Some(ErrorKind::UnknownModel) => {
//!         // 404-class; nothing was attempted
//!     }
//!     Some(ErrorKind::ProviderClient) => {
//!         // the request itself is invalid; fix and resend
//!     }
//!     Some(kind) => {
//!         eprintln!("failed as {kind}, surface {}", kind.http_status());
//!     }
//! }
//! ```
//!
//! ## Error Recovery Strategies
//!
//! - **Automatic Failover**: transient and provider-scoped errors move to
//!   the next binding in the plan
//! - **Circuit Breaking**: repeated failures open the pair's circuit and
//!   take it out of future plans
//! - **No Blind Retries**: request-scoped errors stop the chain; retrying
//!   a 400 against another provider just burns quota
//! - **Graceful Pricing Gaps**: a missing price degrades the outcome
//!   record, never the response
//!
//! ## Best Practices
//!
//! - Match on specific variants rather than stringifying errors; the
//!   status code and category carry the routing decision
//! - Keep raw provider messages truncated ([`truncate_message`]) before
//!   persisting them
//! - Record provider-scoped failures into the health tracker; record
//!   cancellations nowhere
//! - Map [`ErrorKind`] to HTTP exactly once, at the service boundary

use thiserror::Error;

/// Maximum length of a raw provider error message kept on an attempt record.
pub const MAX_ERROR_MESSAGE_LEN: usize = 512;

/// Error raised by a provider adapter for one upstream call.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level failure (connect, TLS, body read)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream API error with its HTTP status
    #[error("api error: {code} - {message}")]
    Api { code: u16, message: String },

    /// Upstream rejected the configured credentials
    #[error("invalid api key")]
    InvalidApiKey,

    /// Upstream does not know the requested model
    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// Upstream rate limit hit
    #[error("rate limit exceeded")]
    RateLimit,

    /// Upstream reported itself unavailable
    #[error("service unavailable")]
    ServiceUnavailable,

    /// The call exceeded the per-provider time budget
    #[error("timeout")]
    Timeout,

    /// Response body failed to decode
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Response decoded but violated the expected shape
    #[error("invalid response format")]
    InvalidResponse,

    /// Adapter misconfiguration (bad base URL, missing key, ...)
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The request itself is invalid and no provider will accept it
    #[error("request validation failed: {message}")]
    Validation { message: String },
}

impl ProviderError {
    /// HTTP status carried by this error, when one exists.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Http(e) => e.status().map(|s| s.as_u16()),
            ProviderError::Api { code, .. } => Some(*code),
            ProviderError::InvalidApiKey => Some(401),
            ProviderError::ModelNotFound { .. } => Some(404),
            ProviderError::RateLimit => Some(429),
            ProviderError::ServiceUnavailable => Some(503),
            ProviderError::Timeout => Some(408),
            ProviderError::Validation { .. } => Some(422),
            _ => None,
        }
    }

    /// Classify this error into the outcome taxonomy.
    ///
    /// The split is per-category, not per-provider: 401/403/404 are treated
    /// as provider-scoped credential/availability failures (another provider
    /// may well succeed), while 400/422 are attributed to the request.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Http(_)
            | ProviderError::RateLimit
            | ProviderError::ServiceUnavailable
            | ProviderError::Timeout
            | ProviderError::Serialization(_)
            | ProviderError::InvalidResponse => ErrorKind::ProviderTransient,
            ProviderError::InvalidApiKey
            | ProviderError::ModelNotFound { .. }
            | ProviderError::Configuration { .. } => ErrorKind::ProviderCredential,
            ProviderError::Validation { .. } => ErrorKind::ProviderClient,
            ProviderError::Api { code, .. } => match code {
                408 | 425 | 429 => ErrorKind::ProviderTransient,
                c if *c >= 500 => ErrorKind::ProviderTransient,
                401 | 403 | 404 => ErrorKind::ProviderCredential,
                _ => ErrorKind::ProviderClient,
            },
        }
    }

    /// Whether the failover loop may continue to the next binding after
    /// this error.
    pub fn failover_eligible(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProviderTransient | ErrorKind::ProviderCredential
        )
    }
}

/// Closed classification of a finished request.
///
/// Persisted on outcome records and mapped to an HTTP status class at the
/// service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The supplied model identifier resolved to nothing
    UnknownModel,
    /// The provider plan was empty after filtering
    NoAvailableProvider,
    /// Network errors, 5xx, 408/425/429; recovered by failover when possible
    ProviderTransient,
    /// Provider-scoped 401/403/404; failover, not a client error
    ProviderCredential,
    /// 400/422 attributable to the request; never retried
    ProviderClient,
    /// The caller's deadline expired mid-chain
    DeadlineExceeded,
    /// The caller aborted; no health failure recorded
    Cancelled,
    /// No pricing source matched; the request itself still succeeds
    PricingMissing,
}

impl ErrorKind {
    /// HTTP status class surfaced to callers.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::UnknownModel => 404,
            ErrorKind::NoAvailableProvider => 503,
            ErrorKind::ProviderTransient => 502,
            ErrorKind::ProviderCredential => 502,
            ErrorKind::ProviderClient => 400,
            ErrorKind::DeadlineExceeded => 504,
            ErrorKind::Cancelled => 499,
            // Pricing gaps do not fail the request
            ErrorKind::PricingMissing => 200,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::UnknownModel => "unknown_model",
            ErrorKind::NoAvailableProvider => "no_available_provider",
            ErrorKind::ProviderTransient => "provider_transient",
            ErrorKind::ProviderCredential => "provider_credential",
            ErrorKind::ProviderClient => "provider_client",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::PricingMissing => "pricing_missing",
        };
        f.write_str(label)
    }
}

/// Truncate a raw provider message before it lands on an attempt record.
pub fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        message.to_string()
    } else {
        let mut end = MAX_ERROR_MESSAGE_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &message[..end])
    }
}
