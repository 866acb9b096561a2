//! Credit Check Module
//!
//! Answers "how many free credits does this caller have left" without
//! spending any of them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Quota Decision Engine                    │
//! │   Unlimited tier ──► short circuit                        │
//! │   Free tier      ──► peek ──(fault)──► ledger fallback    │
//! ├────────────────────────────┬─────────────────────────────┤
//! │  Fast Quota Store          │  Durable Usage Ledger        │
//! │  (in-memory | Redis)       │  (in-memory | Postgres)      │
//! └────────────────────────────┴─────────────────────────────┘
//! ```

pub mod decision;
pub mod engine;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod postgres_ledger;
pub mod redis_store;
pub mod store;
pub mod time;

pub use decision::{
    CheckCreditsRequest, CheckCreditsResponse, CreditsRemaining, DecisionSource, QuotaDecision, Tier,
};
pub use engine::QuotaDecisionEngine;
pub use error::CreditError;
pub use identity::{HeaderIdentityResolver, Identity, IdentityResolver};
pub use ledger::{InMemoryUsageLedger, UsageEvent, UsageLedger};
pub use postgres_ledger::{LedgerTable, PostgresUsageLedger, TimestampKind};
pub use redis_store::RedisQuotaStore;
pub use store::{FastQuotaStore, InMemoryQuotaStore, PeekResult};
pub use time::{Clock, ManualClock, QuotaWindow, SystemClock};
