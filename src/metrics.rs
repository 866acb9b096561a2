// Prometheus metrics for the credit check service
//
// Exposes metrics on the /metrics HTTP endpoint:
// - Decisions by tier and source (counter)
// - Fast store fallbacks (counter)
// - Ledger failures (counter)
// - Decision latency (histogram)

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref CREDIT_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("credit_decisions_total", "Credit check decisions by tier and source"),
        &["tier", "source"]
    ).expect("Failed to create credit decisions metric");

    pub static ref STORE_FALLBACKS_TOTAL: IntCounter = IntCounter::new(
        "credit_store_fallbacks_total",
        "Number of checks that fell back to the usage ledger"
    ).expect("Failed to create store fallbacks metric");

    pub static ref LEDGER_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "credit_ledger_failures_total",
        "Number of usage ledger queries that failed"
    ).expect("Failed to create ledger failures metric");

    pub static ref DECISION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("credit_decision_duration_seconds", "Time to reach a credit decision"),
        &["source"]
    ).expect("Failed to create decision duration metric");
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> prometheus::Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Register all collectors; safe to call more than once
pub fn init() -> prometheus::Result<()> {
    register(Box::new(CREDIT_DECISIONS_TOTAL.clone()))?;
    register(Box::new(STORE_FALLBACKS_TOTAL.clone()))?;
    register(Box::new(LEDGER_FAILURES_TOTAL.clone()))?;
    register(Box::new(DECISION_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
