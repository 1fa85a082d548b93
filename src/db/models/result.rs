use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable verdict for one spec within one inspection. Uppercase on disk to
/// match the report export format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ResultStatus {
    Pass,
    Fail,
    Uncertain,
    Skipped,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pass => "PASS",
            ResultStatus::Fail => "FAIL",
            ResultStatus::Uncertain => "UNCERTAIN",
            ResultStatus::Skipped => "SKIPPED",
        }
    }
}

/// Analyzer provenance attached to a result. Absent entirely for manual
/// verdicts recorded without any analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiMeta {
    pub analyzed: bool,
    pub confidence: Option<f64>,
    pub rationale_en: Option<String>,
    pub rationale_ar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecResult {
    pub id: String,
    pub inspection_id: String,
    pub spec_id: String,
    pub spec_code: String,
    pub status: ResultStatus,
    pub evidence_path: Option<String>,
    pub ai: Option<AiMeta>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
