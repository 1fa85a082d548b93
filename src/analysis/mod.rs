//! Vision analysis: turning a frame plus one or more specs into a verdict.

pub mod client;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

pub use client::{AnalysisClient, ANALYSIS_DEADLINE};
pub use schema::{Classification, Language};

use crate::{camera::Frame, catalog::Spec, error::AnalysisError};

/// One analyzer verdict about one spec. Constructed once and never mutated;
/// a retake or re-scan produces a new outcome that supersedes this one.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub spec_id: String,
    pub classification: Classification,
    pub confidence: f64,
    pub rationale_en: String,
    /// Absent when the Arabic leg of a bilingual request failed or was
    /// skipped (detection runs English-only).
    pub rationale_ar: Option<String>,
    /// The exact frame the verdict is about.
    pub frame: Frame,
    pub analyzed_at: DateTime<Utc>,
}

/// Seam between the session flow and the analysis backend. Production uses
/// the HTTP [`AnalysisClient`]; tests script verdicts and delays.
#[async_trait]
pub trait SpecAnalyzer: Send + Sync {
    /// Verify one frame against one spec, with rationale in both languages.
    /// Cancelling the token aborts whichever leg is in flight.
    async fn analyze_spec(
        &self,
        frame: &Frame,
        spec: &Spec,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, AnalysisError>;

    /// Ask which of the pending specs, if any, the frame satisfies.
    /// `Ok(None)` is the ordinary no-match answer, not a failure.
    async fn detect(
        &self,
        frame: &Frame,
        pending: &[Spec],
        cancel: &CancellationToken,
    ) -> Result<Option<AnalysisOutcome>, AnalysisError>;
}
