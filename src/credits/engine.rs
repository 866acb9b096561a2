//! Quota Decision Engine
//!
//! Decides how many free credits a caller has left:
//!
//! 1. Unlimited tier callers short-circuit without touching any store.
//! 2. Free tier callers get a peek at the fast quota store.
//! 3. If the store cannot answer, the usage ledger is asked whether any
//!    event falls inside the current window. The ledger can only tell
//!    "used" from "not used", so this path reports 0 or 1 credits.
//!
//! Neither path writes anything.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

use super::decision::{DecisionSource, QuotaDecision, Tier};
use super::error::CreditError;
use super::identity::Identity;
use super::ledger::UsageLedger;
use super::store::{FastQuotaStore, PeekResult};
use super::time::{Clock, QuotaWindow, SystemClock};
use crate::metrics;

/// Credits reported by the ledger path when nothing was used in the window
pub const FALLBACK_CREDITS: u64 = 1;

/// Default bound on each backend call
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Run `primary`; if it fails, hand its error to `fallback` and run that
async fn with_fallback<T, P, F, Fut>(primary: P, fallback: F) -> Result<T, CreditError>
where
    P: Future<Output = Result<T, CreditError>>,
    F: FnOnce(CreditError) -> Fut,
    Fut: Future<Output = Result<T, CreditError>>,
{
    match primary.await {
        Ok(value) => Ok(value),
        Err(e) => fallback(e).await,
    }
}

/// Orchestrates the fast store and the usage ledger
#[derive(Clone)]
pub struct QuotaDecisionEngine {
    store: Arc<dyn FastQuotaStore>,
    ledger: Arc<dyn UsageLedger>,
    window: QuotaWindow,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    ledger_timeout: Duration,
}

impl QuotaDecisionEngine {
    /// Create an engine with the default 7-day window and timeouts
    pub fn new(store: Arc<dyn FastQuotaStore>, ledger: Arc<dyn UsageLedger>) -> Self {
        Self {
            store,
            ledger,
            window: QuotaWindow::default(),
            clock: Arc::new(SystemClock),
            store_timeout: DEFAULT_BACKEND_TIMEOUT,
            ledger_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_window(mut self, window: QuotaWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeouts(mut self, store_timeout: Duration, ledger_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self.ledger_timeout = ledger_timeout;
        self
    }

    pub fn window(&self) -> QuotaWindow {
        self.window
    }

    /// Decide the caller's remaining credits
    ///
    /// Store faults are absorbed; only a ledger failure on the fallback path
    /// is returned as an error.
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn decide(&self, identity: &Identity, tier: Tier) -> Result<QuotaDecision, CreditError> {
        let started = Instant::now();

        let decision = match tier {
            Tier::Unlimited => QuotaDecision::unlimited(),
            Tier::Free => {
                with_fallback(self.check_store(identity), |e| {
                    self.check_ledger(identity, e)
                })
                .await?
            }
        };

        let source = decision.source().as_str();
        metrics::CREDIT_DECISIONS_TOTAL
            .with_label_values(&[tier.as_str(), source])
            .inc();
        metrics::DECISION_DURATION_SECONDS
            .with_label_values(&[source])
            .observe(started.elapsed().as_secs_f64());

        debug!(
            source = %source,
            remaining = ?decision.credits_remaining(),
            reset = ?decision.reset_time(),
            "Credit decision"
        );
        Ok(decision)
    }

    async fn check_store(&self, identity: &Identity) -> Result<QuotaDecision, CreditError> {
        let peek = tokio::time::timeout(self.store_timeout, self.store.peek(identity))
            .await
            .map_err(|_| {
                CreditError::StoreUnavailable(format!(
                    "peek timed out after {}ms",
                    self.store_timeout.as_millis()
                ))
            })??;
        Ok(self.from_peek(peek))
    }

    fn from_peek(&self, peek: PeekResult) -> QuotaDecision {
        let remaining = peek.remaining.max(0) as u64;
        if remaining > 0 {
            return QuotaDecision::available(remaining, DecisionSource::Store);
        }
        // An exhausted counter without a TTL still resets one window from now
        let reset = peek
            .reset
            .unwrap_or_else(|| self.window.reset_after(self.clock.now()));
        QuotaDecision::exhausted(reset, DecisionSource::Store)
    }

    async fn check_ledger(
        &self,
        identity: &Identity,
        cause: CreditError,
    ) -> Result<QuotaDecision, CreditError> {
        warn!(identity = %identity, error = %cause, "Quota store check failed, falling back to usage ledger");
        metrics::STORE_FALLBACKS_TOTAL.inc();

        let since = self.window.start_before(self.clock.now());
        let earliest = tokio::time::timeout(
            self.ledger_timeout,
            self.ledger.earliest_since(identity, since),
        )
        .await
        .map_err(|_| {
            CreditError::LedgerQueryFailed(format!(
                "query timed out after {}ms",
                self.ledger_timeout.as_millis()
            ))
        })
        .and_then(|result| result)
        .inspect_err(|e| {
            error!(identity = %identity, error = %e, "Usage ledger fallback failed");
            metrics::LEDGER_FAILURES_TOTAL.inc();
        })?;

        Ok(match earliest {
            Some(first_use) => {
                QuotaDecision::exhausted(self.window.reset_after(first_use), DecisionSource::Ledger)
            }
            None => QuotaDecision::available(FALLBACK_CREDITS, DecisionSource::Ledger),
        })
    }
}

impl std::fmt::Debug for QuotaDecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaDecisionEngine")
            .field("window", &self.window)
            .field("store_timeout", &self.store_timeout)
            .field("ledger_timeout", &self.ledger_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::decision::CreditsRemaining;
    use crate::credits::ledger::InMemoryUsageLedger;
    use crate::credits::store::InMemoryQuotaStore;
    use crate::credits::time::ManualClock;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        engine: QuotaDecisionEngine,
        store: InMemoryQuotaStore,
        ledger: InMemoryUsageLedger,
        clock: Arc<ManualClock>,
    }

    fn fixture(limit: u64) -> Fixture {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = InMemoryQuotaStore::with_limits(limit, QuotaWindow::default(), clock.clone());
        let ledger = InMemoryUsageLedger::new();
        let engine = QuotaDecisionEngine::new(Arc::new(store.clone()), Arc::new(ledger.clone()))
            .with_clock(clock.clone());
        Fixture {
            engine,
            store,
            ledger,
            clock,
        }
    }

    fn id(s: &str) -> Identity {
        Identity::new(s).unwrap()
    }

    /// Store that never answers in time
    struct HangingStore;

    #[async_trait]
    impl FastQuotaStore for HangingStore {
        async fn peek(&self, _identity: &Identity) -> Result<PeekResult, CreditError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(PeekResult {
                remaining: 1,
                reset: None,
            })
        }
    }

    /// Store that replays a fixed peek result
    struct FixedStore(PeekResult);

    #[async_trait]
    impl FastQuotaStore for FixedStore {
        async fn peek(&self, _identity: &Identity) -> Result<PeekResult, CreditError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_unlimited_never_touches_stores() {
        let f = fixture(1);
        f.store.set_available(false);
        f.ledger.set_failing(true);

        let decision = f.engine.decide(&id("u3"), Tier::Unlimited).await.unwrap();

        assert_eq!(decision, QuotaDecision::unlimited());
        assert_eq!(f.store.peek_count(), 0);
        assert_eq!(f.ledger.query_count(), 0);
    }

    #[tokio::test]
    async fn test_healthy_store_full_quota() {
        let f = fixture(3);
        let decision = f.engine.decide(&id("u1"), Tier::Free).await.unwrap();

        assert_eq!(decision.credits_remaining(), CreditsRemaining::Count(3));
        assert_eq!(decision.reset_time(), None);
        assert_eq!(decision.source(), DecisionSource::Store);
        assert_eq!(f.ledger.query_count(), 0);
    }

    #[tokio::test]
    async fn test_healthy_store_exhausted_reports_reset() {
        let f = fixture(1);
        let user = id("u1");
        f.store.consume(&user).await;

        let decision = f.engine.decide(&user, Tier::Free).await.unwrap();
        assert_eq!(decision.credits_remaining(), CreditsRemaining::Count(0));
        assert_eq!(decision.reset_time(), Some(t0() + TimeDelta::days(7)));
    }

    #[tokio::test]
    async fn test_decide_does_not_consume() {
        let f = fixture(2);
        let user = id("u1");
        f.store.consume(&user).await;

        let first = f.engine.decide(&user, Tier::Free).await.unwrap();
        let second = f.engine.decide(&user, Tier::Free).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.store.used(&user).await, 1);
    }

    #[tokio::test]
    async fn test_fallback_with_recent_event() {
        let f = fixture(1);
        let user = id("u1");
        f.store.set_available(false);
        f.ledger.record(&user, t0()).await;
        f.clock.advance(TimeDelta::days(1));

        let decision = f.engine.decide(&user, Tier::Free).await.unwrap();

        assert_eq!(decision.credits_remaining(), CreditsRemaining::Count(0));
        assert_eq!(decision.reset_time(), Some(t0() + TimeDelta::days(7)));
        assert_eq!(decision.source(), DecisionSource::Ledger);
    }

    #[tokio::test]
    async fn test_fallback_with_empty_ledger() {
        let f = fixture(5);
        f.store.set_available(false);

        let decision = f.engine.decide(&id("u2"), Tier::Free).await.unwrap();

        // The ledger only knows used / not used
        assert_eq!(decision.credits_remaining(), CreditsRemaining::Count(1));
        assert_eq!(decision.reset_time(), None);
    }

    #[tokio::test]
    async fn test_fallback_ignores_events_outside_window() {
        let f = fixture(1);
        let user = id("u1");
        f.store.set_available(false);
        f.ledger.record(&user, t0()).await;
        f.clock.advance(TimeDelta::days(8));

        let decision = f.engine.decide(&user, Tier::Free).await.unwrap();
        assert_eq!(decision.credits_remaining(), CreditsRemaining::Count(1));
    }

    #[tokio::test]
    async fn test_fallback_uses_earliest_event() {
        let f = fixture(1);
        let user = id("u1");
        f.store.set_available(false);
        f.ledger.record(&user, t0() + TimeDelta::hours(5)).await;
        f.ledger.record(&user, t0() + TimeDelta::hours(1)).await;
        f.clock.advance(TimeDelta::days(2));

        let decision = f.engine.decide(&user, Tier::Free).await.unwrap();
        assert_eq!(
            decision.reset_time(),
            Some(t0() + TimeDelta::hours(1) + TimeDelta::days(7))
        );
    }

    #[tokio::test]
    async fn test_ledger_failure_surfaces() {
        let f = fixture(1);
        f.store.set_available(false);
        f.ledger.set_failing(true);

        let err = f.engine.decide(&id("u1"), Tier::Free).await.unwrap_err();
        assert!(matches!(err, CreditError::LedgerQueryFailed(_)));
    }

    #[tokio::test]
    async fn test_store_timeout_falls_back() {
        let ledger = InMemoryUsageLedger::new();
        let engine = QuotaDecisionEngine::new(Arc::new(HangingStore), Arc::new(ledger.clone()))
            .with_timeouts(Duration::from_millis(20), Duration::from_secs(1));

        let decision = engine.decide(&id("u1"), Tier::Free).await.unwrap();
        assert_eq!(decision.source(), DecisionSource::Ledger);
        assert_eq!(ledger.query_count(), 1);
    }

    #[tokio::test]
    async fn test_negative_remaining_is_clamped() {
        let reset = t0() + TimeDelta::hours(3);
        let engine = QuotaDecisionEngine::new(
            Arc::new(FixedStore(PeekResult {
                remaining: -2,
                reset: Some(reset),
            })),
            Arc::new(InMemoryUsageLedger::new()),
        );

        let decision = engine.decide(&id("u1"), Tier::Free).await.unwrap();
        assert_eq!(decision.credits_remaining(), CreditsRemaining::Count(0));
        assert_eq!(decision.reset_time(), Some(reset));
    }

    #[tokio::test]
    async fn test_exhausted_without_reset_gets_one_window() {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = QuotaDecisionEngine::new(
            Arc::new(FixedStore(PeekResult {
                remaining: 0,
                reset: None,
            })),
            Arc::new(InMemoryUsageLedger::new()),
        )
        .with_clock(clock);

        let decision = engine.decide(&id("u1"), Tier::Free).await.unwrap();
        assert_eq!(decision.reset_time(), Some(t0() + TimeDelta::days(7)));
    }

    proptest! {
        #[test]
        fn prop_store_path_clamps_remaining(remaining in -1000i64..1000) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let reset = t0() + TimeDelta::days(1);
            let engine = QuotaDecisionEngine::new(
                Arc::new(FixedStore(PeekResult { remaining, reset: Some(reset) })),
                Arc::new(InMemoryUsageLedger::new()),
            );

            let decision = rt.block_on(engine.decide(&id("p"), Tier::Free)).unwrap();
            let expected = remaining.max(0) as u64;
            prop_assert_eq!(decision.credits_remaining(), CreditsRemaining::Count(expected));
            prop_assert_eq!(decision.reset_time().is_none(), expected > 0);
        }
    }
}
