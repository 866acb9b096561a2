//! credit-gate Library
//!
//! Free-tier credit checks: a read-only peek at a fast rate-limit counter,
//! falling back to a durable usage ledger when the counter is unavailable.

pub mod app;
pub mod config;
pub mod credits;
pub mod logging;
pub mod metrics;
pub mod server;
