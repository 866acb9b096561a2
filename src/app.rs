// Backend wiring
//
// Builds the fast store and usage ledger handles once at startup and hands
// them to the decision engine. Both remote backends connect lazily.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::credits::{
    FastQuotaStore, InMemoryQuotaStore, InMemoryUsageLedger, PostgresUsageLedger,
    QuotaDecisionEngine, RedisQuotaStore, SystemClock, UsageLedger,
};

/// Build the fast quota store selected by `config.store`
pub fn build_store(config: &Config) -> Result<Arc<dyn FastQuotaStore>> {
    let window = config.quota.window()?;
    match config.store.backend.to_lowercase().as_str() {
        "redis" => {
            let url = config
                .store
                .redis_url
                .as_deref()
                .context("Redis backend selected without redis_url")?;
            // Give up inside the engine's own bound so the adapter reports the cause
            let store = RedisQuotaStore::open(
                url,
                config.store.key_prefix.clone(),
                config.quota.free_credits,
            )?
            .with_timeout(config.quota.store_timeout() * 3 / 4);
            info!("Using Redis quota store");
            Ok(Arc::new(store))
        }
        _ => {
            info!("Using in-memory quota store");
            Ok(Arc::new(InMemoryQuotaStore::with_limits(
                config.quota.free_credits,
                window,
                Arc::new(SystemClock),
            )))
        }
    }
}

/// Build the usage ledger selected by `config.ledger`
pub fn build_ledger(config: &Config) -> Result<Arc<dyn UsageLedger>> {
    match config.ledger.backend.to_lowercase().as_str() {
        "postgres" => {
            let url = config
                .ledger
                .database_url
                .as_deref()
                .context("Postgres backend selected without database_url")?;
            let table = config.ledger.ledger_table()?;
            let ledger =
                PostgresUsageLedger::connect_lazy(url, config.ledger.max_connections, &table)?;
            info!("Using Postgres usage ledger");
            Ok(Arc::new(ledger))
        }
        _ => {
            info!("Using in-memory usage ledger");
            Ok(Arc::new(InMemoryUsageLedger::new()))
        }
    }
}

/// Build the decision engine for `config`
pub fn build_engine(config: &Config) -> Result<QuotaDecisionEngine> {
    let engine = QuotaDecisionEngine::new(build_store(config)?, build_ledger(config)?)
        .with_window(config.quota.window()?)
        .with_timeouts(config.quota.store_timeout(), config.quota.ledger_timeout());
    Ok(engine)
}
