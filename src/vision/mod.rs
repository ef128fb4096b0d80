pub mod http;


pub use http::HttpVisionClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::storage::ProviderKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Species,
    Freshness,
    Both,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Species => "species",
            AnalysisType::Freshness => "freshness",
            AnalysisType::Both => "both",
        }
    }

    /// Prompt sent alongside the image.
    pub fn prompt(&self) -> &'static str {
        match self {
            AnalysisType::Species => {
                "Identify the species of the fish or seafood in this photo. \
                 Give the common name, the scientific name and the visible \
                 distinguishing features. If no fish or seafood is visible, say so."
            }
            AnalysisType::Freshness => {
                "Assess the freshness of the fish or seafood in this photo. \
                 Look at the eyes, gills, skin and overall appearance, rate the \
                 freshness and explain what you see. If no fish or seafood is \
                 visible, say so."
            }
            AnalysisType::Both => {
                "Identify the species of the fish or seafood in this photo \
                 (common name, scientific name, distinguishing features), then \
                 assess its freshness from the eyes, gills, skin and overall \
                 appearance. If no fish or seafood is visible, say so."
            }
        }
    }
}

/// Decoded image plus the requested analysis, ready for one provider call.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub image: Vec<u8>,
    pub mime_type: String,
    pub analysis_type: AnalysisType,
}

/// Transient result of one provider attempt. Folded into a ledger entry
/// by the orchestrator, never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub success: bool,
    pub result_text: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl AnalysisOutcome {
    pub fn ok(text: String) -> Self {
        Self {
            success: true,
            result_text: Some(text),
            error_kind: None,
        }
    }

    pub fn failed(kind: ErrorKind) -> Self {
        Self {
            success: false,
            result_text: None,
            error_kind: Some(kind),
        }
    }
}

/// One outbound call per invocation; no retries, no ledger or key-pool
/// side effects. Retry policy belongs to the orchestrator so every
/// attempt is accounted separately.
#[async_trait]
pub trait VisionClient: Send + Sync + 'static {
    async fn analyze(&self, job: &AnalysisJob, key: &ProviderKey) -> AnalysisOutcome;
}
