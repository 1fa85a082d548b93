use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InspectionStatus {
    Active,
    Completed,
}

impl InspectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionStatus::Active => "Active",
            InspectionStatus::Completed => "Completed",
        }
    }
}

/// One inspection visit. Aggregate columns stay NULL while the inspection is
/// active and are frozen exactly once at completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub id: String,
    pub inspector_id: String,
    pub category: String,
    pub site: Option<String>,
    pub status: InspectionStatus,
    pub total_specs: u32,
    pub passed_count: Option<u32>,
    pub failed_count: Option<u32>,
    pub pass_rate: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Live roll-up across an inspection's results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionProgress {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub uncertain: u32,
    pub skipped: u32,
    pub pending: u32,
    pub completion_pct: f64,
    pub pass_rate_pct: f64,
}

impl InspectionProgress {
    pub fn from_counts(total: u32, passed: u32, failed: u32, uncertain: u32, skipped: u32) -> Self {
        // A skipped spec can still be inspected later, so it stays pending.
        let decided = passed + failed + uncertain;
        let pending = total.saturating_sub(decided);

        let completion_pct = if total == 0 {
            0.0
        } else {
            f64::from(decided.min(total)) * 100.0 / f64::from(total)
        };

        // Pass rate counts only specs the analyzer or operator actually
        // judged; uncertain and skipped specs are excluded.
        let judged = passed + failed;
        let pass_rate_pct = if judged == 0 {
            0.0
        } else {
            f64::from(passed) * 100.0 / f64::from(judged)
        };

        Self {
            total,
            passed,
            failed,
            uncertain,
            skipped,
            pending,
            completion_pct,
            pass_rate_pct,
        }
    }
}
