use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, warn};

use crate::admission::AdmissionDecision;
use crate::gateway::{AnalyzeRequest, GatewayReply};
use crate::identity;
use crate::vision::AnalysisType;
use crate::AppContext;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/v1/analyze", post(analyze))
        .route("/v1/quota", get(quota))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeSuccess {
    analysis: String,
    quota_info: AdmissionDecision,
    analysis_type: AnalysisType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeDenial {
    error: String,
    #[serde(rename = "type")]
    kind: &'static str,
    quota_info: AdmissionDecision,
}

pub async fn analyze(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> impl IntoResponse {
    // Web-layer burst protection per source address, beneath the
    // admission pipeline proper.
    let ip = identity::client_ip(&headers, Some(peer.ip())).unwrap_or_default();
    if ctx.throttle.check_key(&ip).is_err() {
        warn!(%ip, "per-ip throttle tripped");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "Too many requests from this address. Slow down.",
                "type": "cooldown",
            })),
        )
            .into_response();
    }

    // Run the pipeline on its own task: a client disconnect must not
    // cancel an in-flight billed provider call before it is recorded.
    let gateway = Arc::clone(&ctx.gateway);
    let reply =
        tokio::spawn(async move { gateway.handle(request, headers, Some(peer.ip())).await }).await;

    let reply = match reply {
        Ok(reply) => reply,
        Err(e) => {
            error!("analysis task failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let status =
        StatusCode::from_u16(reply.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match reply {
        GatewayReply::Success {
            analysis,
            decision,
            analysis_type,
        } => (
            status,
            Json(AnalyzeSuccess {
                analysis,
                quota_info: decision,
                analysis_type,
            }),
        )
            .into_response(),
        GatewayReply::Denied {
            kind,
            message,
            decision,
        } => (
            status,
            Json(AnalyzeDenial {
                error: message,
                kind: kind.as_str(),
                quota_info: decision,
            }),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaQuery {
    user_id: Option<String>,
    session_fingerprint: Option<String>,
}

/// Read-only admission preview so clients can render remaining quota
/// without spending an attempt.
pub async fn quota(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<QuotaQuery>,
) -> impl IntoResponse {
    match identity::resolve(
        &headers,
        query.user_id.as_deref(),
        query.session_fingerprint.as_deref(),
        Some(peer.ip()),
    ) {
        Ok(identity) => {
            let decision = ctx.gateway.preview(&identity).await;
            (StatusCode::OK, Json(decision)).into_response()
        }
        Err(_) => StatusCode::UNAUTHORIZED.into_response(),
    }
}
