use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{AnalysisJob, AnalysisOutcome, VisionClient};
use crate::error::ErrorKind;
use crate::storage::keys::Provider;
use crate::storage::ProviderKey;

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub request_timeout: Duration,
    pub gemini_base: String,
    pub gemini_model: String,
    pub openai_base: String,
    pub openai_model: String,
    pub anthropic_base: String,
    pub anthropic_model: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            gemini_base: "https://generativelanguage.googleapis.com".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            openai_base: "https://api.openai.com".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            anthropic_base: "https://api.anthropic.com".to_string(),
            anthropic_model: "claude-3-5-haiku-latest".to_string(),
        }
    }
}

impl VisionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            request_timeout: Duration::from_millis(
                env_or("VISION_REQUEST_TIMEOUT_MS", "30000").parse().unwrap_or(30000),
            ),
            gemini_base: env_or("VISION_GEMINI_BASE", &defaults.gemini_base),
            gemini_model: env_or("VISION_GEMINI_MODEL", &defaults.gemini_model),
            openai_base: env_or("VISION_OPENAI_BASE", &defaults.openai_base),
            openai_model: env_or("VISION_OPENAI_MODEL", &defaults.openai_model),
            anthropic_base: env_or("VISION_ANTHROPIC_BASE", &defaults.anthropic_base),
            anthropic_model: env_or("VISION_ANTHROPIC_MODEL", &defaults.anthropic_model),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

pub struct HttpVisionClient {
    http: reqwest::Client,
    config: VisionConfig,
}

impl HttpVisionClient {
    pub fn new(config: VisionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    async fn call_gemini(&self, job: &AnalysisJob, key: &ProviderKey) -> Result<String, ErrorKind> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.gemini_base, self.config.gemini_model, key.secret
        );
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": job.analysis_type.prompt() },
                    { "inline_data": {
                        "mime_type": job.mime_type,
                        "data": BASE64.encode(&job.image),
                    }},
                ],
            }],
        });

        let payload = self.post_json(&url, &[], &body).await?;
        let parts = payload
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array);
        let text = parts
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        non_empty(text)
    }

    async fn call_openai(&self, job: &AnalysisJob, key: &ProviderKey) -> Result<String, ErrorKind> {
        let url = format!("{}/v1/chat/completions", self.config.openai_base);
        let data_url = format!("data:{};base64,{}", job.mime_type, BASE64.encode(&job.image));
        let body = json!({
            "model": self.config.openai_model,
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": job.analysis_type.prompt() },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }],
        });

        let auth = format!("Bearer {}", key.secret);
        let headers = [("authorization", auth.as_str())];
        let payload = self.post_json(&url, &headers, &body).await?;
        let text = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        non_empty(text)
    }

    async fn call_anthropic(&self, job: &AnalysisJob, key: &ProviderKey) -> Result<String, ErrorKind> {
        let url = format!("{}/v1/messages", self.config.anthropic_base);
        let body = json!({
            "model": self.config.anthropic_model,
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "image", "source": {
                        "type": "base64",
                        "media_type": job.mime_type,
                        "data": BASE64.encode(&job.image),
                    }},
                    { "type": "text", "text": job.analysis_type.prompt() },
                ],
            }],
        });

        let headers = [
            ("x-api-key", key.secret.as_str()),
            ("anthropic-version", "2023-06-01"),
        ];
        let payload = self.post_json(&url, &headers, &body).await?;
        let blocks = payload.get("content").and_then(Value::as_array);
        let text = blocks
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        non_empty(text)
    }

    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<Value, ErrorKind> {
        let mut request = self.http.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(map_transport)?;
        let status = response.status();
        if !status.is_success() {
            debug!(%status, "provider call rejected");
            return Err(map_status(status));
        }
        response.json::<Value>().await.map_err(|_| ErrorKind::Unknown)
    }
}

fn map_transport(err: reqwest::Error) -> ErrorKind {
    debug!("provider transport failure: {}", err);
    ErrorKind::Network
}

fn map_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        429 => ErrorKind::ApiQuota,
        401 | 403 => ErrorKind::InvalidKey,
        500..=599 => ErrorKind::Network,
        _ => ErrorKind::Unknown,
    }
}

fn non_empty(text: String) -> Result<String, ErrorKind> {
    let text = text.trim().to_string();
    if text.is_empty() {
        // The provider answered 200 with nothing usable in it.
        return Err(ErrorKind::Unknown);
    }
    Ok(text)
}

#[async_trait]
impl VisionClient for HttpVisionClient {
    async fn analyze(&self, job: &AnalysisJob, key: &ProviderKey) -> AnalysisOutcome {
        let result = match key.provider_kind() {
            Provider::Gemini => self.call_gemini(job, key).await,
            Provider::Openai => self.call_openai(job, key).await,
            Provider::Anthropic => self.call_anthropic(job, key).await,
        };

        match result {
            Ok(text) => AnalysisOutcome::ok(text),
            Err(kind) => AnalysisOutcome::failed(kind),
        }
    }
}
