use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Ok,
    QuotaExceeded,
    Cooldown,
    LoginRequired,
    EvaluatorUnavailable,
}

/// Verdict produced before any metered work is done. Request-scoped,
/// never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionDecision {
    pub can_proceed: bool,
    pub is_premium_tier: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub reason: ReasonCode,
    pub human_message: String,
}

impl AdmissionDecision {
    pub fn allow(is_premium_tier: bool) -> Self {
        Self {
            can_proceed: true,
            is_premium_tier,
            cooldown_until: None,
            reason: ReasonCode::Ok,
            human_message: "OK".to_string(),
        }
    }

    pub fn allow_with_message(is_premium_tier: bool, message: impl Into<String>) -> Self {
        Self {
            human_message: message.into(),
            ..Self::allow(is_premium_tier)
        }
    }

    pub fn deny(reason: ReasonCode, is_premium_tier: bool, message: impl Into<String>) -> Self {
        Self {
            can_proceed: false,
            is_premium_tier,
            cooldown_until: None,
            reason,
            human_message: message.into(),
        }
    }

    pub fn cooldown(until: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            can_proceed: false,
            is_premium_tier: true,
            cooldown_until: Some(until),
            reason: ReasonCode::Cooldown,
            human_message: message.into(),
        }
    }

    /// The ledger/wire kind a denial maps to. Evaluator outages surface
    /// as a transient network-class failure; the reason code on the
    /// decision itself stays precise.
    pub fn denial_kind(&self) -> Option<ErrorKind> {
        match self.reason {
            ReasonCode::Ok => None,
            ReasonCode::QuotaExceeded => Some(ErrorKind::QuotaExceeded),
            ReasonCode::Cooldown => Some(ErrorKind::Cooldown),
            ReasonCode::LoginRequired => Some(ErrorKind::LoginRequired),
            ReasonCode::EvaluatorUnavailable => Some(ErrorKind::Network),
        }
    }
}

/// Quota thresholds. The burst/cooldown constants are deliberately
/// configuration, not code.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Attempts a free or anonymous identity gets per rolling day.
    pub free_daily_limit: u64,
    pub free_window: Duration,
    /// Attempts a premium identity may make inside `burst_window` before
    /// a cooldown is imposed.
    pub premium_burst_limit: u64,
    pub burst_window: Duration,
    pub cooldown: Duration,
    /// Budget for each backing-store read before the evaluator fails
    /// closed.
    pub store_timeout: std::time::Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_daily_limit: 5,
            free_window: Duration::hours(24),
            premium_burst_limit: 20,
            burst_window: Duration::minutes(10),
            cooldown: Duration::minutes(5),
            store_timeout: std::time::Duration::from_secs(3),
        }
    }
}

impl QuotaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            free_daily_limit: env_u64("QUOTA_FREE_DAILY_LIMIT", defaults.free_daily_limit),
            free_window: Duration::hours(env_u64("QUOTA_FREE_WINDOW_HOURS", 24) as i64),
            premium_burst_limit: env_u64("QUOTA_PREMIUM_BURST_LIMIT", defaults.premium_burst_limit),
            burst_window: Duration::minutes(env_u64("QUOTA_BURST_WINDOW_MINUTES", 10) as i64),
            cooldown: Duration::minutes(env_u64("QUOTA_COOLDOWN_MINUTES", 5) as i64),
            store_timeout: std::time::Duration::from_millis(env_u64("QUOTA_STORE_TIMEOUT_MS", 3000)),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
