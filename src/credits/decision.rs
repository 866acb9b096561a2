//! Quota Decision Types
//!
//! The normalized output of a credit check and its JSON wire form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Caller's service class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// API-key holder, not quota limited
    Unlimited,
    /// Quota-limited free tier
    Free,
}

impl Tier {
    /// Derive the tier from the request's `hasApiKey` flag
    pub fn from_api_key_flag(has_api_key: bool) -> Self {
        if has_api_key {
            Tier::Unlimited
        } else {
            Tier::Free
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Unlimited => "unlimited",
            Tier::Free => "free",
        }
    }
}

/// Remaining credits: a count, or the `"unlimited"` sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditsRemaining {
    Unlimited,
    Count(u64),
}

impl Serialize for CreditsRemaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CreditsRemaining::Unlimited => serializer.serialize_str("unlimited"),
            CreditsRemaining::Count(n) => serializer.serialize_u64(*n),
        }
    }
}

/// Where a decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Unlimited-tier short circuit, no store consulted
    TierOverride,
    /// Fast quota store peek
    Store,
    /// Durable usage ledger fallback
    Ledger,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::TierOverride => "unlimited",
            DecisionSource::Store => "store",
            DecisionSource::Ledger => "ledger",
        }
    }
}

/// Result of a credit check
///
/// `reset_time` is `None` exactly when credits remain or the tier is
/// unlimited. The constructors uphold that, so a decision can only be built
/// in a consistent shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDecision {
    tier: Tier,
    credits_remaining: CreditsRemaining,
    reset_time: Option<DateTime<Utc>>,
    source: DecisionSource,
}

impl QuotaDecision {
    /// Decision for an unlimited-tier caller
    pub fn unlimited() -> Self {
        Self {
            tier: Tier::Unlimited,
            credits_remaining: CreditsRemaining::Unlimited,
            reset_time: None,
            source: DecisionSource::TierOverride,
        }
    }

    /// Free-tier decision with credits left; no reset time is reported
    pub fn available(remaining: u64, source: DecisionSource) -> Self {
        debug_assert!(remaining > 0);
        Self {
            tier: Tier::Free,
            credits_remaining: CreditsRemaining::Count(remaining),
            reset_time: None,
            source,
        }
    }

    /// Free-tier decision with the window used up until `reset_time`
    pub fn exhausted(reset_time: DateTime<Utc>, source: DecisionSource) -> Self {
        Self {
            tier: Tier::Free,
            credits_remaining: CreditsRemaining::Count(0),
            reset_time: Some(reset_time),
            source,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn credits_remaining(&self) -> CreditsRemaining {
        self.credits_remaining
    }

    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        self.reset_time
    }

    pub fn source(&self) -> DecisionSource {
        self.source
    }

    /// Render the decision in its response shape
    pub fn to_response(&self) -> CheckCreditsResponse {
        CheckCreditsResponse {
            has_api_key: self.tier == Tier::Unlimited,
            credits_remaining: self.credits_remaining,
            reset_time: self.reset_time.map(|t| t.timestamp_millis()),
        }
    }
}

/// Body of `POST /api/check-credits`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckCreditsRequest {
    pub has_api_key: bool,
}

/// Successful response body; `resetTime` is epoch milliseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckCreditsResponse {
    pub has_api_key: bool,
    pub credits_remaining: CreditsRemaining,
    pub reset_time: Option<i64>,
}
