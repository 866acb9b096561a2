//! Postgres-backed Usage Ledger
//!
//! Reads the table the consuming action writes to (one row per generated
//! story). Only a single aggregate `SELECT` is ever issued.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use super::error::CreditError;
use super::identity::Identity;
use super::ledger::UsageLedger;

/// SQL type of the event timestamp column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampKind {
    /// `timestamp without time zone`; values are read and bound as UTC
    #[default]
    Naive,
    /// `timestamptz`
    Zoned,
}

impl TimestampKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "timestamp" | "timestamp without time zone" => Ok(Self::Naive),
            "timestamptz" | "timestamp with time zone" => Ok(Self::Zoned),
            other => anyhow::bail!(
                "Invalid timestamp type: {}. Must be 'timestamp' or 'timestamptz'",
                other
            ),
        }
    }
}

/// Table layout of the usage events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTable {
    pub table: String,
    pub user_column: String,
    pub timestamp_column: String,
    pub timestamp_kind: TimestampKind,
}

impl LedgerTable {
    /// Validate every name as a plain or schema-qualified SQL identifier
    pub fn new(table: &str, user_column: &str, timestamp_column: &str) -> Result<Self> {
        for name in [table, user_column, timestamp_column] {
            if !is_identifier(name) {
                anyhow::bail!("Invalid SQL identifier: {:?}", name);
            }
        }
        Ok(Self {
            table: table.to_string(),
            user_column: user_column.to_string(),
            timestamp_column: timestamp_column.to_string(),
            timestamp_kind: TimestampKind::default(),
        })
    }

    pub fn with_timestamp_kind(mut self, kind: TimestampKind) -> Self {
        self.timestamp_kind = kind;
        self
    }

    fn earliest_since_sql(&self) -> String {
        format!(
            "SELECT MIN({ts}) FROM {table} WHERE {user} = $1 AND {ts} >= $2",
            ts = self.timestamp_column,
            table = self.table,
            user = self.user_column,
        )
    }
}

impl Default for LedgerTable {
    fn default() -> Self {
        Self {
            table: "stories".to_string(),
            user_column: "user_id".to_string(),
            timestamp_column: "created_at".to_string(),
            timestamp_kind: TimestampKind::default(),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Read-only Postgres ledger
#[derive(Debug, Clone)]
pub struct PostgresUsageLedger {
    pool: Arc<PgPool>,
    query: String,
    timestamp_kind: TimestampKind,
}

impl PostgresUsageLedger {
    pub fn new(pool: Arc<PgPool>, table: &LedgerTable) -> Self {
        Self {
            pool,
            query: table.earliest_since_sql(),
            timestamp_kind: table.timestamp_kind,
        }
    }

    /// Build a lazily-connecting pool for `url`
    pub fn connect_lazy(url: &str, max_connections: u32, table: &LedgerTable) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .context("Invalid Postgres connection string")?;
        tracing::info!(table = %table.table, "Configured Postgres usage ledger");
        Ok(Self::new(Arc::new(pool), table))
    }
}

#[async_trait]
impl UsageLedger for PostgresUsageLedger {
    async fn earliest_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, CreditError> {
        match self.timestamp_kind {
            TimestampKind::Zoned => {
                let (earliest,): (Option<DateTime<Utc>>,) = sqlx::query_as(&self.query)
                    .bind(identity.as_str())
                    .bind(since)
                    .fetch_one(self.pool.as_ref())
                    .await?;
                Ok(earliest)
            }
            TimestampKind::Naive => {
                let (earliest,): (Option<NaiveDateTime>,) = sqlx::query_as(&self.query)
                    .bind(identity.as_str())
                    .bind(since.naive_utc())
                    .fetch_one(self.pool.as_ref())
                    .await?;
                Ok(earliest.map(|t| t.and_utc()))
            }
        }
    }
}
