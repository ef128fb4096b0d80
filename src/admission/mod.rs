pub mod types;


pub use types::{AdmissionDecision, QuotaConfig, ReasonCode};

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::warn;

use crate::identity::RequestIdentity;
use crate::storage::{SubscriptionStore, UsageLedger};

/// Read-only admission check. Consults the usage ledger and tier rules;
/// writes nothing. On any store failure or timeout the verdict is a
/// denial — unmetered access is never the default.
pub struct QuotaEvaluator {
    ledger: Arc<dyn UsageLedger>,
    subscriptions: Arc<dyn SubscriptionStore>,
    config: QuotaConfig,
}

impl QuotaEvaluator {
    pub fn new(
        ledger: Arc<dyn UsageLedger>,
        subscriptions: Arc<dyn SubscriptionStore>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            ledger,
            subscriptions,
            config,
        }
    }

    pub async fn evaluate(&self, identity: &RequestIdentity) -> AdmissionDecision {
        let is_premium = match identity.user_id {
            Some(user_id) => {
                match self
                    .guarded("subscription lookup", self.subscriptions.is_premium(&user_id))
                    .await
                {
                    Some(premium) => premium,
                    None => return Self::unavailable(),
                }
            }
            None => false,
        };

        if is_premium {
            self.evaluate_premium(identity).await
        } else {
            self.evaluate_free(identity).await
        }
    }

    async fn evaluate_free(&self, identity: &RequestIdentity) -> AdmissionDecision {
        let bucket = identity.bucket();
        let since = Utc::now() - self.config.free_window;
        let Some(used) = self
            .guarded("ledger count", self.ledger.count_since(&bucket, since))
            .await
        else {
            return Self::unavailable();
        };

        if used >= self.config.free_daily_limit {
            return AdmissionDecision::deny(
                ReasonCode::QuotaExceeded,
                false,
                format!(
                    "Free limit of {} analyses per day reached. Upgrade to premium for more.",
                    self.config.free_daily_limit
                ),
            );
        }

        AdmissionDecision::allow_with_message(
            false,
            format!(
                "{} of {} free analyses used today",
                used, self.config.free_daily_limit
            ),
        )
    }

    async fn evaluate_premium(&self, identity: &RequestIdentity) -> AdmissionDecision {
        let bucket = identity.bucket();
        let now = Utc::now();
        let since = now - self.config.burst_window;
        let Some(recent) = self
            .guarded("ledger count", self.ledger.count_since(&bucket, since))
            .await
        else {
            return Self::unavailable();
        };

        if recent > self.config.premium_burst_limit {
            let Some(newest) = self
                .guarded("ledger latest", self.ledger.latest_since(&bucket, since))
                .await
            else {
                return Self::unavailable();
            };
            // A burst imposes a quiet period counted from the newest
            // attempt; once it elapses the caller is admitted again.
            if let Some(newest) = newest {
                let until = newest + self.config.cooldown;
                if now < until {
                    return AdmissionDecision::cooldown(
                        until,
                        format!(
                            "Too many analyses in a short time. Try again after {}.",
                            until.format("%H:%M:%S UTC")
                        ),
                    );
                }
            }
        }

        AdmissionDecision::allow(true)
    }

    fn unavailable() -> AdmissionDecision {
        AdmissionDecision::deny(
            ReasonCode::EvaluatorUnavailable,
            false,
            "Quota service is temporarily unavailable. Please try again shortly.",
        )
    }

    /// Bounded store read; `None` means the evaluator must fail closed.
    async fn guarded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Option<T> {
        match timeout(self.config.store_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("{} failed, denying admission: {}", what, e);
                None
            }
            Err(_) => {
                warn!("{} timed out, denying admission", what);
                None
            }
        }
    }
}
