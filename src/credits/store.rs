//! Fast Quota Store
//!
//! The primary source for a credit check: a per-identity counter over a
//! fixed window. The check path only ever peeks; spending a credit is a
//! separate operation owned by whatever performs the costly action.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::CreditError;
use super::identity::Identity;
use super::time::{Clock, QuotaWindow, SystemClock};

/// Default number of free credits per window
pub const DEFAULT_FREE_CREDITS: u64 = 1;

/// Counter state as seen by a peek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeekResult {
    /// Credits left; backends may report negative values when over-spent
    pub remaining: i64,

    /// When the open window resets, `None` if no window is open
    pub reset: Option<DateTime<Utc>>,
}

/// Read-only view of a rate-limit counter
#[async_trait]
pub trait FastQuotaStore: Send + Sync {
    /// Report remaining credits without consuming any
    ///
    /// Fails only with [`CreditError::StoreUnavailable`].
    async fn peek(&self, identity: &Identity) -> Result<PeekResult, CreditError>;
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    used: u64,
    window_start: DateTime<Utc>,
}

/// In-process fixed-window counter
#[derive(Debug, Clone)]
pub struct InMemoryQuotaStore {
    /// Credits per window
    limit: u64,

    window: QuotaWindow,

    clock: Arc<dyn Clock>,

    counters: Arc<RwLock<HashMap<Identity, WindowCounter>>>,

    /// Cleared to simulate an outage
    available: Arc<AtomicBool>,

    /// Number of peeks served (for tests and diagnostics)
    peeks: Arc<AtomicU64>,
}

impl InMemoryQuotaStore {
    /// Create a store with the default free-tier limit and window
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_FREE_CREDITS, QuotaWindow::default(), Arc::new(SystemClock))
    }

    /// Create a store with a custom limit, window and clock
    pub fn with_limits(limit: u64, window: QuotaWindow, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window,
            clock,
            counters: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            peeks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spend one credit for `identity`
    ///
    /// Returns false if the window is already used up. Opens a new window
    /// when none is open.
    pub async fn consume(&self, identity: &Identity) -> bool {
        let now = self.clock.now();
        let mut counters = self.counters.write().await;

        let counter = counters
            .entry(identity.clone())
            .or_insert(WindowCounter {
                used: 0,
                window_start: now,
            });

        if !self.window.is_open(counter.window_start, now) {
            *counter = WindowCounter {
                used: 0,
                window_start: now,
            };
        }

        if counter.used >= self.limit {
            return false;
        }
        counter.used += 1;
        true
    }

    /// Raw number of credits spent in the current window
    pub async fn used(&self, identity: &Identity) -> u64 {
        let counters = self.counters.read().await;
        counters.get(identity).map(|c| c.used).unwrap_or(0)
    }

    /// Number of tracked identities
    pub async fn count(&self) -> usize {
        self.counters.read().await.len()
    }

    /// Mark the store reachable or unreachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of peeks served so far
    pub fn peek_count(&self) -> u64 {
        self.peeks.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl Default for InMemoryQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FastQuotaStore for InMemoryQuotaStore {
    async fn peek(&self, identity: &Identity) -> Result<PeekResult, CreditError> {
        self.peeks.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(CreditError::StoreUnavailable(
                "in-memory quota store is offline".to_string(),
            ));
        }

        let now = self.clock.now();
        let counters = self.counters.read().await;
        let full = PeekResult {
            remaining: self.limit as i64,
            reset: None,
        };

        Ok(match counters.get(identity) {
            Some(c) if self.window.is_open(c.window_start, now) => PeekResult {
                remaining: self.limit as i64 - c.used as i64,
                reset: Some(self.window.reset_after(c.window_start)),
            },
            _ => full,
        })
    }
}
