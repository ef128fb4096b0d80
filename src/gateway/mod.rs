
use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::admission::{AdmissionDecision, QuotaEvaluator, ReasonCode};
use crate::error::ErrorKind;
use crate::identity::{self, RequestIdentity};
use crate::storage::keys::KeyPoolError;
use crate::storage::ledger::{AttemptOutcome, AttemptRecord};
use crate::storage::{KeyPool, UsageLedger};
use crate::vision::{AnalysisJob, AnalysisType, VisionClient};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Budget for each backing-store call before the orchestrator fails
    /// closed.
    pub store_timeout: Duration,
    /// Base delay before the single network retry; a little jitter is
    /// added on top.
    pub retry_backoff: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(3),
            retry_backoff: Duration::from_millis(400),
        }
    }
}

/// Inbound analysis request as the client sends it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub image: String,
    pub analysis_type: AnalysisType,
    pub session_fingerprint: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug)]
pub enum GatewayReply {
    Success {
        analysis: String,
        decision: AdmissionDecision,
        analysis_type: AnalysisType,
    },
    Denied {
        kind: ErrorKind,
        message: String,
        decision: AdmissionDecision,
    },
}

impl GatewayReply {
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayReply::Success { .. } => 200,
            GatewayReply::Denied { kind, .. } => kind.http_status(),
        }
    }
}

/// Composes the pipeline: resolve identity, evaluate quota, reserve a
/// key, invoke the provider, record the outcome. Every admission attempt
/// that gets past identity resolution produces exactly one ledger entry,
/// no matter where it terminates.
pub struct Gateway {
    evaluator: QuotaEvaluator,
    keys: Arc<dyn KeyPool>,
    ledger: Arc<dyn UsageLedger>,
    vision: Arc<dyn VisionClient>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        evaluator: QuotaEvaluator,
        keys: Arc<dyn KeyPool>,
        ledger: Arc<dyn UsageLedger>,
        vision: Arc<dyn VisionClient>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            evaluator,
            keys,
            ledger,
            vision,
            config,
        }
    }

    /// Read-only admission preview; touches neither the ledger nor the
    /// key pool.
    pub async fn preview(&self, identity: &RequestIdentity) -> AdmissionDecision {
        self.evaluator.evaluate(identity).await
    }

    pub async fn handle(
        &self,
        request: AnalyzeRequest,
        headers: HeaderMap,
        peer_ip: Option<IpAddr>,
    ) -> GatewayReply {
        let analysis_type = request.analysis_type;

        // No identity signal at all: deny before any quota work. This is
        // the one terminal state without a ledger entry, since there is
        // nothing to key it by.
        let identity = match identity::resolve(
            &headers,
            request.user_id.as_deref(),
            request.session_fingerprint.as_deref(),
            peer_ip,
        ) {
            Ok(identity) => identity,
            Err(_) => {
                return GatewayReply::Denied {
                    kind: ErrorKind::LoginRequired,
                    message: ErrorKind::LoginRequired.user_message().to_string(),
                    decision: AdmissionDecision::deny(
                        ReasonCode::LoginRequired,
                        false,
                        ErrorKind::LoginRequired.user_message(),
                    ),
                };
            }
        };

        let decision = self.evaluator.evaluate(&identity).await;
        if !decision.can_proceed {
            let kind = decision.denial_kind().unwrap_or(ErrorKind::Network);
            self.record(&identity, analysis_type, AttemptOutcome::Failure, Some(kind), None)
                .await;
            info!(bucket = %identity.bucket(), reason = ?decision.reason, "admission denied");
            return GatewayReply::Denied {
                kind,
                message: decision.human_message.clone(),
                decision,
            };
        }

        let Some((image, mime_type)) = decode_image(&request.image) else {
            self.record(
                &identity,
                analysis_type,
                AttemptOutcome::Failure,
                Some(ErrorKind::Unknown),
                None,
            )
            .await;
            return GatewayReply::Denied {
                kind: ErrorKind::Unknown,
                message: ErrorKind::Unknown.user_message().to_string(),
                decision,
            };
        };
        let job = AnalysisJob {
            image,
            mime_type,
            analysis_type,
        };

        // At most two provider attempts. Each one reserves key capacity
        // and writes its own ledger entry.
        let mut exclude: Option<String> = None;
        let mut attempt = 0;
        loop {
            attempt += 1;

            let key = match timeout(
                self.config.store_timeout,
                self.keys.reserve(&identity, &decision, exclude.as_deref()),
            )
            .await
            {
                Ok(Ok(key)) => key,
                Ok(Err(KeyPoolError::Exhausted)) => {
                    warn!(bucket = %identity.bucket(), "provider key pool exhausted");
                    return self
                        .deny_without_key(&identity, analysis_type, decision, ErrorKind::NoKeyAvailable)
                        .await;
                }
                Ok(Err(KeyPoolError::Unavailable(e))) => {
                    error!("key store unavailable: {}", e);
                    return self
                        .deny_without_key(&identity, analysis_type, decision, ErrorKind::NoKeyAvailable)
                        .await;
                }
                Err(_) => {
                    error!("key reservation timed out");
                    return self
                        .deny_without_key(&identity, analysis_type, decision, ErrorKind::NoKeyAvailable)
                        .await;
                }
            };

            let outcome = self.vision.analyze(&job, &key).await;
            let ledger_outcome = if outcome.success {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Failure
            };
            self.record(
                &identity,
                analysis_type,
                ledger_outcome,
                outcome.error_kind,
                Some(key.id.clone()),
            )
            .await;

            if outcome.success {
                info!(bucket = %identity.bucket(), key_id = %key.id, "analysis succeeded");
                return GatewayReply::Success {
                    analysis: outcome.result_text.unwrap_or_default(),
                    decision,
                    analysis_type,
                };
            }

            let kind = outcome.error_kind.unwrap_or(ErrorKind::Unknown);
            match kind {
                // Provider-side rate limit: try once more on a different
                // credential.
                ErrorKind::ApiQuota if attempt == 1 => {
                    warn!(key_id = %key.id, "provider rate limited, retrying with another key");
                    exclude = Some(key.id.clone());
                    continue;
                }
                // Transport failure: one retry after a short jittered
                // backoff.
                ErrorKind::Network if attempt == 1 => {
                    let jitter = rand::thread_rng().gen_range(0..250);
                    tokio::time::sleep(self.config.retry_backoff + Duration::from_millis(jitter))
                        .await;
                    continue;
                }
                ErrorKind::InvalidKey => {
                    // Needs out-of-band deactivation; retrying the same
                    // credential would just burn capacity.
                    error!(key_id = %key.id, provider = %key.provider, "provider rejected credential");
                }
                _ => {}
            }

            return GatewayReply::Denied {
                kind,
                message: kind.user_message().to_string(),
                decision,
            };
        }
    }

    async fn deny_without_key(
        &self,
        identity: &RequestIdentity,
        analysis_type: AnalysisType,
        decision: AdmissionDecision,
        kind: ErrorKind,
    ) -> GatewayReply {
        self.record(identity, analysis_type, AttemptOutcome::Failure, Some(kind), None)
            .await;
        GatewayReply::Denied {
            kind,
            message: kind.user_message().to_string(),
            decision,
        }
    }

    /// Append the attempt to the usage ledger. A failed write is an
    /// operational emergency (future admission decisions run on this
    /// data) but it must not take the response down with it.
    async fn record(
        &self,
        identity: &RequestIdentity,
        analysis_type: AnalysisType,
        outcome: AttemptOutcome,
        error_kind: Option<ErrorKind>,
        key_id: Option<String>,
    ) {
        let attempt = AttemptRecord {
            identity: identity.clone(),
            analysis_type,
            outcome,
            error_kind,
            key_id,
        };
        match timeout(self.config.store_timeout, self.ledger.record(attempt)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("usage ledger write failed: {}", e),
            Err(_) => error!("usage ledger write timed out"),
        }
    }
}

/// Decode the inbound image payload: plain base64 or a data URL. Returns
/// the bytes and a mime type (from the data URL, else sniffed).
fn decode_image(raw: &str) -> Option<(Vec<u8>, String)> {
    let raw = raw.trim();
    let (mime_hint, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest.split_once(',')?;
            let mime = meta.split(';').next().unwrap_or("").trim();
            ((!mime.is_empty()).then(|| mime.to_string()), payload)
        }
        None => (None, raw),
    };

    let bytes = BASE64.decode(payload.trim()).ok()?;
    if bytes.is_empty() {
        return None;
    }
    let mime = mime_hint.unwrap_or_else(|| sniff_mime(&bytes).to_string());
    Some((bytes, mime))
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        "image/jpeg"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/jpeg"
    }
}
