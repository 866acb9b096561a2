//! Durable Usage Ledger
//!
//! Authoritative record of credit-consuming events. Consulted only when the
//! fast quota store cannot answer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::CreditError;
use super::identity::Identity;

/// A credit-consuming event, e.g. one generated story
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEvent {
    pub identity: Identity,
    pub timestamp: DateTime<Utc>,
}

/// Read-only view over recorded usage
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Timestamp of the earliest event for `identity` at or after `since`
    async fn earliest_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, CreditError>;

    /// Whether any event for `identity` exists at or after `since`
    async fn exists_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<bool, CreditError> {
        Ok(self.earliest_since(identity, since).await?.is_some())
    }
}

/// In-process ledger
#[derive(Debug, Clone, Default)]
pub struct InMemoryUsageLedger {
    events: Arc<RwLock<HashMap<Identity, Vec<DateTime<Utc>>>>>,

    /// Set to simulate a database outage
    failing: Arc<AtomicBool>,

    queries: Arc<AtomicU64>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event; this is the spending side's job, not the checker's
    pub async fn record(&self, identity: &Identity, timestamp: DateTime<Utc>) {
        let mut events = self.events.write().await;
        events.entry(identity.clone()).or_default().push(timestamp);
    }

    /// All events for an identity, in insertion order
    pub async fn events_for(&self, identity: &Identity) -> Vec<UsageEvent> {
        let events = self.events.read().await;
        events
            .get(identity)
            .map(|ts| {
                ts.iter()
                    .map(|t| UsageEvent {
                        identity: identity.clone(),
                        timestamp: *t,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of queries served so far
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn earliest_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, CreditError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(CreditError::LedgerQueryFailed(
                "in-memory ledger is offline".to_string(),
            ));
        }

        let events = self.events.read().await;
        Ok(events
            .get(identity)
            .and_then(|ts| ts.iter().filter(|t| **t >= since).min().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_empty_ledger() {
        let ledger = InMemoryUsageLedger::new();
        let id = Identity::new("u2").unwrap();

        assert_eq!(ledger.earliest_since(&id, t0()).await.unwrap(), None);
        assert!(!ledger.exists_since(&id, t0()).await.unwrap());
    }

    #[tokio::test]
    async fn test_earliest_qualifying_event() {
        let ledger = InMemoryUsageLedger::new();
        let id = Identity::new("u1").unwrap();

        ledger.record(&id, t0() - TimeDelta::days(10)).await;
        ledger.record(&id, t0() + TimeDelta::days(2)).await;
        ledger.record(&id, t0() + TimeDelta::days(1)).await;

        let earliest = ledger.earliest_since(&id, t0()).await.unwrap();
        assert_eq!(earliest, Some(t0() + TimeDelta::days(1)));
    }

    #[tokio::test]
    async fn test_boundary_is_inclusive() {
        let ledger = InMemoryUsageLedger::new();
        let id = Identity::new("u1").unwrap();
        ledger.record(&id, t0()).await;

        assert!(ledger.exists_since(&id, t0()).await.unwrap());
        assert!(!ledger
            .exists_since(&id, t0() + TimeDelta::milliseconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_events_are_per_identity() {
        let ledger = InMemoryUsageLedger::new();
        let u1 = Identity::new("u1").unwrap();
        let u2 = Identity::new("u2").unwrap();
        ledger.record(&u1, t0()).await;

        assert!(!ledger.exists_since(&u2, t0()).await.unwrap());
        assert_eq!(ledger.events_for(&u1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_ledger() {
        let ledger = InMemoryUsageLedger::new();
        ledger.set_failing(true);
        let id = Identity::new("u1").unwrap();

        let err = ledger.earliest_since(&id, t0()).await.unwrap_err();
        assert!(matches!(err, CreditError::LedgerQueryFailed(_)));
        assert_eq!(ledger.query_count(), 1);
    }
}
