//! Redis-backed Fast Quota Store
//!
//! The counter for an identity lives under `{prefix}{identity}`; the spending
//! side increments it and sets its TTL to the window length when it opens a
//! window. This adapter reads both with `GET` and `PTTL` and never writes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::error::CreditError;
use super::identity::Identity;
use super::store::{FastQuotaStore, PeekResult};
use super::time::{Clock, SystemClock};

/// Upper bound on a single peek, connection setup included
pub const DEFAULT_PEEK_TIMEOUT: Duration = Duration::from_millis(1500);

/// Initial-connect attempts before a peek gives up on Redis
const CONNECT_RETRIES: usize = 1;

/// Read-only Redis quota counter
///
/// The connection is opened on first use, so an unreachable Redis at startup
/// degrades to the ledger fallback instead of failing the service.
#[derive(Clone)]
pub struct RedisQuotaStore {
    client: redis::Client,
    conn: Arc<OnceCell<ConnectionManager>>,
    key_prefix: String,
    limit: u64,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisQuotaStore {
    /// Prepare a store for `url`; no connection is made yet
    pub fn open(url: &str, key_prefix: String, limit: u64) -> Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("Invalid Redis URL: {}", url))?;
        Ok(Self {
            client,
            conn: Arc::new(OnceCell::new()),
            key_prefix,
            limit,
            timeout: DEFAULT_PEEK_TIMEOUT,
            clock: Arc::new(SystemClock),
        })
    }

    /// Bound every peek, including the first connection attempt
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_number_of_retries(CONNECT_RETRIES)
            .set_max_delay(self.timeout.as_millis() as u64 / 4)
            .set_connection_timeout(self.timeout)
            .set_response_timeout(self.timeout)
    }

    async fn connection(&self) -> Result<ConnectionManager, CreditError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn =
                    ConnectionManager::new_with_config(self.client.clone(), self.manager_config())
                        .await?;
                tracing::info!(prefix = %self.key_prefix, "Connected Redis quota store");
                Ok::<_, redis::RedisError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    fn make_key(&self, identity: &Identity) -> String {
        build_key(&self.key_prefix, identity.as_str())
    }
}

impl std::fmt::Debug for RedisQuotaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQuotaStore")
            .field("key_prefix", &self.key_prefix)
            .field("limit", &self.limit)
            .field("timeout", &self.timeout)
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

#[async_trait]
impl FastQuotaStore for RedisQuotaStore {
    async fn peek(&self, identity: &Identity) -> Result<PeekResult, CreditError> {
        let key = self.make_key(identity);
        let read = async {
            let mut conn = self.connection().await?;
            let (used, pttl_ms): (Option<i64>, i64) = redis::pipe()
                .cmd("GET")
                .arg(&key)
                .cmd("PTTL")
                .arg(&key)
                .query_async(&mut conn)
                .await?;
            Ok::<_, CreditError>((used, pttl_ms))
        };

        let (used, pttl_ms) = tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| {
                CreditError::StoreUnavailable(format!(
                    "Redis peek timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })??;

        Ok(interpret_counter(self.limit, used, pttl_ms, self.clock.now()))
    }
}

fn build_key(prefix: &str, identity: &str) -> String {
    format!("{}{}", prefix, identity)
}

/// Turn raw `GET`/`PTTL` replies into a peek result
///
/// `PTTL` replies -2 for a missing key and -1 for a key without expiry.
fn interpret_counter(
    limit: u64,
    used: Option<i64>,
    pttl_ms: i64,
    now: DateTime<Utc>,
) -> PeekResult {
    let used = used.unwrap_or(0).max(0);
    let remaining = limit as i64 - used;
    let reset = if used > 0 && pttl_ms > 0 {
        Some(now + TimeDelta::milliseconds(pttl_ms))
    } else {
        None
    };
    PeekResult { remaining, reset }
}
