use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{AnalysisOutcome, Classification},
    camera::{CameraState, Frame},
};

/// Where in the flow a recoverable failure happened; retry resumes from
/// this point instead of tearing the session down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorStage {
    CameraStarting,
    Analyzing,
    Committing,
}

/// Capture session lifecycle. One phase at a time; every async continuation
/// re-checks the phase and generation before touching state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    CameraStarting,
    CameraReady,
    Scanning,
    Detected,
    Capturing,
    Analyzing,
    Reviewing,
    Committing,
    Closed,
    Error {
        stage: ErrorStage,
        kind: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanStatus {
    Idle,
    Scanning,
    Detected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeSource {
    AutoScan,
    Manual,
}

/// The latest analyzer verdict held for review, tagged with how it arrived.
#[derive(Debug, Clone)]
pub struct HeldOutcome {
    pub outcome: AnalysisOutcome,
    pub source: OutcomeSource,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Bumped whenever the session rebinds (open, advance, close). Async
    /// continuations carry the generation they started under and discard
    /// their work if it no longer matches.
    pub generation: u64,
    pub inspection_id: Option<String>,
    pub category: Option<String>,
    pub spec_id: Option<String>,
    pub auto_scan_enabled: bool,
    pub camera_label: Option<String>,
    /// Evidence frame held between capture and commit.
    pub captured: Option<Frame>,
    pub outcome: Option<HeldOutcome>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            generation: 0,
            inspection_id: None,
            category: None,
            spec_id: None,
            auto_scan_enabled: true,
            camera_label: None,
            captured: None,
            outcome: None,
        }
    }

    /// Bind to a new (inspection, spec) pair and restart the lifecycle at
    /// camera acquisition. Everything held for the previous binding is
    /// dropped.
    pub fn begin(&mut self, inspection_id: String, category: String, spec_id: String) -> u64 {
        self.generation += 1;
        self.phase = SessionPhase::CameraStarting;
        self.inspection_id = Some(inspection_id);
        self.category = Some(category);
        self.spec_id = Some(spec_id);
        self.camera_label = None;
        self.captured = None;
        self.outcome = None;
        self.generation
    }

    /// Move to the next spec without dropping the camera grant.
    pub fn rebind_spec(&mut self, spec_id: String) -> u64 {
        self.generation += 1;
        self.phase = SessionPhase::CameraReady;
        self.spec_id = Some(spec_id);
        self.captured = None;
        self.outcome = None;
        self.generation
    }

    /// Terminal close; a later [`reset_idle`] readies the state for reuse.
    ///
    /// [`reset_idle`]: SessionState::reset_idle
    pub fn close(&mut self) -> u64 {
        self.generation += 1;
        self.phase = SessionPhase::Closed;
        self.captured = None;
        self.outcome = None;
        self.generation
    }

    pub fn reset_idle(&mut self) {
        self.phase = SessionPhase::Idle;
        self.inspection_id = None;
        self.category = None;
        self.spec_id = None;
        self.camera_label = None;
        self.captured = None;
        self.outcome = None;
    }

    pub fn scan_status(&self) -> ScanStatus {
        match self.phase {
            SessionPhase::Scanning => ScanStatus::Scanning,
            SessionPhase::Detected => ScanStatus::Detected,
            _ => ScanStatus::Idle,
        }
    }

    pub fn camera_state(&self) -> CameraState {
        match &self.phase {
            SessionPhase::Idle | SessionPhase::Closed => CameraState::Idle,
            SessionPhase::CameraStarting => CameraState::Starting,
            SessionPhase::Error { stage, .. } if *stage == ErrorStage::CameraStarting => {
                CameraState::Failed
            }
            _ => CameraState::Ready,
        }
    }

    /// Manual capture is allowed whenever the camera is live and no other
    /// capture or commit is mid-flight.
    pub fn can_manual_capture(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::CameraReady | SessionPhase::Scanning | SessionPhase::Detected
        )
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase.clone(),
            generation: self.generation,
            inspection_id: self.inspection_id.clone(),
            spec_id: self.spec_id.clone(),
            auto_scan_enabled: self.auto_scan_enabled,
            scan_status: self.scan_status(),
            camera: self.camera_state(),
            camera_label: self.camera_label.clone(),
            has_captured_frame: self.captured.is_some(),
            outcome: self
                .outcome
                .as_ref()
                .map(|held| OutcomeSummary::new(&held.outcome, held.source)),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Verdict summary as shown in snapshots and events. The evidence image
/// itself travels once, in the outcome-ready event, not in every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSummary {
    pub spec_id: String,
    pub classification: Classification,
    pub confidence: f64,
    pub rationale_en: String,
    pub rationale_ar: Option<String>,
    pub source: OutcomeSource,
    pub analyzed_at: DateTime<Utc>,
}

impl OutcomeSummary {
    pub fn new(outcome: &AnalysisOutcome, source: OutcomeSource) -> Self {
        Self {
            spec_id: outcome.spec_id.clone(),
            classification: outcome.classification,
            confidence: outcome.confidence,
            rationale_en: outcome.rationale_en.clone(),
            rationale_ar: outcome.rationale_ar.clone(),
            source,
            analyzed_at: outcome.analyzed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub generation: u64,
    pub inspection_id: Option<String>,
    pub spec_id: Option<String>,
    pub auto_scan_enabled: bool,
    pub scan_status: ScanStatus,
    pub camera: CameraState,
    pub camera_label: Option<String>,
    pub has_captured_frame: bool,
    pub outcome: Option<OutcomeSummary>,
}
