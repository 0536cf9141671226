//! Persistence seams.
//!
//! The relational store itself is an external collaborator; this module
//! defines the contracts the gateway needs from it and an in-memory
//! implementation used in tests and when running without a database.
//!
//! Two tables matter here: `model_pricing` (per-token prices by canonical
//! or native id) and `chat_completion_requests` (one row per executed
//! request). Token counts are integers; costs are decimals the store maps
//! to NUMERIC columns.

use crate::error::GatewayError;
use crate::pricing::{PricingRecord, PricingSource};
use chrono::{DateTime, Utc};
use fleetroute_core::error::ErrorKind;
use fleetroute_core::selector::Attempt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Terminal status of one executed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Durable form of one `execute` call, mirrored into
/// `chat_completion_requests`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcomeRecord {
    pub request_id: Uuid,
    /// Identifier the caller supplied, before resolution
    pub requested_model: String,
    pub canonical_id: Option<String>,
    pub provider: Option<String>,
    pub native_id: Option<String>,
    pub status: OutcomeStatus,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    /// Every provider attempt, in try order
    pub attempts: Vec<Attempt>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub input_cost: Option<f64>,
    pub output_cost: Option<f64>,
    pub total_cost: Option<f64>,
    pub pricing_source: Option<PricingSource>,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl RequestOutcomeRecord {
    /// Pending record created on request entry; finalized before insert.
    pub fn pending(requested_model: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            requested_model: requested_model.into(),
            canonical_id: None,
            provider: None,
            native_id: None,
            status: OutcomeStatus::Failed,
            error_kind: None,
            error: None,
            attempts: Vec::new(),
            input_tokens: None,
            output_tokens: None,
            input_cost: None,
            output_cost: None,
            total_cost: None,
            pricing_source: None,
            processing_time_ms: 0,
            created_at: Utc::now(),
        }
    }
}

/// Access to the `model_pricing` table.
#[async_trait::async_trait]
pub trait PricingStore: Send + Sync {
    async fn load_pricing(&self) -> Result<Vec<PricingRecord>, GatewayError>;
    async fn upsert_pricing(&self, record: PricingRecord) -> Result<(), GatewayError>;
}

/// Access to the `chat_completion_requests` table.
#[async_trait::async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn insert_outcome(&self, outcome: RequestOutcomeRecord) -> Result<(), GatewayError>;
}

/// In-memory store implementing both persistence traits.
#[derive(Default)]
pub struct MemoryStore {
    pricing: RwLock<Vec<PricingRecord>>,
    outcomes: RwLock<Vec<RequestOutcomeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Replace the pricing rows wholesale.
    pub async fn seed_pricing(&self, records: Vec<PricingRecord>) {
        *self.pricing.write().await = records;
    }

    /// Snapshot of every persisted outcome, oldest first.
    pub async fn outcomes(&self) -> Vec<RequestOutcomeRecord> {
        self.outcomes.read().await.clone()
    }

    pub async fn outcome_count(&self) -> usize {
        self.outcomes.read().await.len()
    }
}

#[async_trait::async_trait]
impl PricingStore for MemoryStore {
    async fn load_pricing(&self) -> Result<Vec<PricingRecord>, GatewayError> {
        Ok(self.pricing.read().await.clone())
    }

    async fn upsert_pricing(&self, record: PricingRecord) -> Result<(), GatewayError> {
        let mut rows = self.pricing.write().await;
        match rows
            .iter_mut()
            .find(|r| r.model == record.model && r.provider == record.provider)
        {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl OutcomeStore for MemoryStore {
    async fn insert_outcome(&self, outcome: RequestOutcomeRecord) -> Result<(), GatewayError> {
        self.outcomes.write().await.push(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PriceUnit;

    #[tokio::test]
    async fn upsert_replaces_matching_rows() {
        let store = MemoryStore::new();
        store
            .upsert_pricing(PricingRecord::for_model(
                "m",
                1.0,
                1.0,
                PriceUnit::Per1mTokens,
                PricingSource::Database,
            ))
            .await
            .unwrap();
        store
            .upsert_pricing(PricingRecord::for_model(
                "m",
                2.0,
                2.0,
                PriceUnit::Per1mTokens,
                PricingSource::Database,
            ))
            .await
            .unwrap();

        let rows = store.load_pricing().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].input_price, 2e-6);
    }

    #[tokio::test]
    async fn outcomes_accumulate_in_order() {
        let store = MemoryStore::new();
        store
            .insert_outcome(RequestOutcomeRecord::pending("a"))
            .await
            .unwrap();
        store
            .insert_outcome(RequestOutcomeRecord::pending("b"))
            .await
            .unwrap();

        let outcomes = store.outcomes().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].requested_model, "a");
        assert_eq!(outcomes[1].requested_model, "b");
    }
}
