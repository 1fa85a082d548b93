use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use tauri::{AppHandle, Emitter, Runtime};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    analysis::{AnalysisOutcome, Classification, SpecAnalyzer},
    camera::{CameraManager, CameraState, Frame, FrameQuality, FrameSource},
    catalog::{CatalogStore, EvidenceKind, Spec},
    db::{
        AiMeta, InspectionProgress, InspectionStatus, ResultStatus, ResultsGateway, SavedResult,
        SpecResult,
    },
    error::{AnalysisError, CameraError},
    settings::SettingsStore,
};

use super::{
    autoscan::{self, scene_unchanged},
    countdown::{self, passes_gate},
    state::{
        ErrorStage, HeldOutcome, OutcomeSource, OutcomeSummary, ScanStatus, SessionPhase,
        SessionSnapshot, SessionState,
    },
};

/// Opens a fresh camera source. Swapped out in tests for synthetic sources.
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn FrameSource>, CameraError> + Send + Sync>;

const EVIDENCE_NOT_FOUND_EN: &str = "Evidence not found";
const EVIDENCE_NOT_FOUND_AR: &str = "لم يتم العثور على دليل";

/// What a commit hands back to the caller: the stored row, the refreshed
/// roll-up, and where the session went next.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitFeedback {
    pub saved: SavedResult,
    pub next_spec_id: Option<String>,
    pub session: SessionSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CameraStateEvent {
    state: CameraState,
    label: Option<String>,
    kind: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanStatusEvent {
    status: ScanStatus,
    spec_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutcomeReadyEvent {
    #[serde(flatten)]
    summary: OutcomeSummary,
    frame_base64: String,
    frame_width: u32,
    frame_height: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CountdownTickEvent {
    spec_id: String,
    remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultCommittedEvent {
    result: SpecResult,
    progress: InspectionProgress,
    next_spec_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionErrorEvent {
    stage: ErrorStage,
    kind: String,
    message: String,
}

/// Drives one capture session at a time: camera lifecycle, auto-scan,
/// manual capture, analysis, and commit. All mutation funnels through the
/// single [`SessionState`] behind a lock; spawned work re-checks the
/// session generation before it touches anything.
pub struct SessionController<R: Runtime> {
    app: AppHandle<R>,
    state: Arc<Mutex<SessionState>>,
    camera: Arc<StdMutex<CameraManager>>,
    source_factory: SourceFactory,
    analyzer: Arc<dyn SpecAnalyzer>,
    gateway: ResultsGateway,
    catalog: Arc<CatalogStore>,
    settings: Arc<SettingsStore>,
    scan_cancel: Arc<StdMutex<Option<CancellationToken>>>,
    countdown_cancel: Arc<StdMutex<Option<CancellationToken>>>,
    /// Token for whichever analyzer call is in flight, scan tick or manual.
    analysis_cancel: Arc<StdMutex<Option<CancellationToken>>>,
    /// Hash of the last frame the analyzer answered for; matching frames
    /// skip the network round trip until the scene changes.
    last_no_match_phash: Arc<StdMutex<Option<String>>>,
}

impl<R: Runtime> Clone for SessionController<R> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            state: Arc::clone(&self.state),
            camera: Arc::clone(&self.camera),
            source_factory: Arc::clone(&self.source_factory),
            analyzer: Arc::clone(&self.analyzer),
            gateway: self.gateway.clone(),
            catalog: Arc::clone(&self.catalog),
            settings: Arc::clone(&self.settings),
            scan_cancel: Arc::clone(&self.scan_cancel),
            countdown_cancel: Arc::clone(&self.countdown_cancel),
            analysis_cancel: Arc::clone(&self.analysis_cancel),
            last_no_match_phash: Arc::clone(&self.last_no_match_phash),
        }
    }
}

impl<R: Runtime> SessionController<R> {
    pub fn new(
        app: AppHandle<R>,
        gateway: ResultsGateway,
        catalog: Arc<CatalogStore>,
        settings: Arc<SettingsStore>,
        analyzer: Arc<dyn SpecAnalyzer>,
        source_factory: SourceFactory,
    ) -> Self {
        Self {
            app,
            state: Arc::new(Mutex::new(SessionState::new())),
            camera: Arc::new(StdMutex::new(CameraManager::new())),
            source_factory,
            analyzer,
            gateway,
            catalog,
            settings,
            scan_cancel: Arc::new(StdMutex::new(None)),
            countdown_cancel: Arc::new(StdMutex::new(None)),
            analysis_cancel: Arc::new(StdMutex::new(None)),
            last_no_match_phash: Arc::new(StdMutex::new(None)),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Bind the session to `(inspection, spec)` and start the camera.
    /// Acquisition failures do not error the call; they land in the
    /// `Error { stage: cameraStarting }` phase for the UI to offer a retry.
    pub async fn open_session(
        &self,
        inspection_id: String,
        spec_id: String,
    ) -> Result<SessionSnapshot> {
        let spec = self
            .catalog
            .get(&spec_id)
            .ok_or_else(|| anyhow!("unknown spec {spec_id}"))?;
        if spec.evidence == EvidenceKind::Manual {
            bail!("spec {} takes a manual result, not a capture session", spec.code);
        }

        let inspector = self.settings.inspector().inspector_id;
        let inspection = self
            .gateway
            .owned_inspection(&inspector, &inspection_id)
            .await
            .with_context(|| format!("cannot open session for inspection {inspection_id}"))?;
        if inspection.status == InspectionStatus::Completed {
            bail!("inspection {inspection_id} is already completed");
        }
        if spec.category != inspection.category {
            bail!(
                "spec {} belongs to category {}, not {}",
                spec.code,
                spec.category,
                inspection.category
            );
        }

        self.cancel_scan_loop();
        self.cancel_countdown();
        self.cancel_inflight_analysis();

        let generation = {
            let mut state = self.state.lock().await;
            state.begin(inspection_id, inspection.category.clone(), spec_id)
        };
        lock_mutex(&self.last_no_match_phash).take();

        info!("Opened capture session for spec {} (generation {generation})", spec.code);
        self.emit_camera_state(CameraState::Starting, None, None);
        self.emit_session_state().await;

        self.acquire_camera(generation).await;
        Ok(self.snapshot().await)
    }

    /// Take one evidence frame and run the bilingual analysis on it. The
    /// countdown and any in-flight scan analysis are cancelled first so at
    /// most one analyzer call is ever active.
    pub async fn manual_capture(&self) -> Result<SessionSnapshot> {
        let generation = {
            let mut state = self.state.lock().await;
            if !state.can_manual_capture() {
                bail!("capture is not available right now");
            }
            state.phase = SessionPhase::Capturing;
            state.outcome = None;
            state.generation
        };
        self.cancel_countdown();
        self.cancel_inflight_analysis();
        self.emit_scan_status(ScanStatus::Idle).await;
        self.emit_session_state().await;

        let frame = match self.sample_frame(FrameQuality::Evidence).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.revert_to_ready(generation).await;
                bail!("camera is still warming up, try again");
            }
            Err(err) => {
                self.revert_to_ready(generation).await;
                bail!("capture failed: {err}");
            }
        };

        {
            let mut state = self.state.lock().await;
            if state.generation != generation || state.phase != SessionPhase::Capturing {
                return Ok(state.snapshot());
            }
            state.captured = Some(frame);
            state.phase = SessionPhase::Analyzing;
        }
        self.emit_session_state().await;

        self.run_manual_analysis(generation).await
    }

    /// Commit whatever the session holds for the active spec. `decision`
    /// is the operator override; without it the analyzer verdict applies,
    /// and with neither the spec is recorded as failed for lack of
    /// evidence.
    pub async fn commit(&self, decision: Option<ResultStatus>) -> Result<CommitFeedback> {
        self.cancel_countdown();
        self.cancel_inflight_analysis();
        self.commit_current(decision, None).await
    }

    /// Countdown expiry path. Re-validates that the detection this commit
    /// was armed for is still the live one; anything else abandons it.
    pub(crate) async fn auto_commit(&self, generation: u64) {
        if let Err(err) = self.commit_current(None, Some(generation)).await {
            debug!("auto-commit abandoned: {err}");
        }
    }

    /// Keep the detection on screen but stop the clock. The scene hash is
    /// remembered so the same unchanged view is not re-detected every tick.
    pub async fn cancel_auto_advance(&self) -> Result<SessionSnapshot> {
        self.cancel_countdown();
        let dismissed = {
            let mut state = self.state.lock().await;
            if state.phase == SessionPhase::Detected {
                state.phase = SessionPhase::CameraReady;
                state.outcome.take()
            } else {
                None
            }
        };
        if let Some(held) = dismissed {
            *lock_mutex(&self.last_no_match_phash) = Some(held.outcome.frame.phash.clone());
            info!("Auto-commit cancelled for spec {}", held.outcome.spec_id);
            self.emit_scan_status(ScanStatus::Idle).await;
            self.emit_session_state().await;
        }
        Ok(self.snapshot().await)
    }

    /// Drop the held frame and verdict and go back to the live preview.
    pub async fn retake(&self) -> Result<SessionSnapshot> {
        self.cancel_inflight_analysis();
        {
            let mut state = self.state.lock().await;
            let allowed = matches!(
                &state.phase,
                SessionPhase::Reviewing
                    | SessionPhase::Error {
                        stage: ErrorStage::Analyzing | ErrorStage::Committing,
                        ..
                    }
            );
            if !allowed {
                bail!("nothing to retake");
            }
            state.captured = None;
            state.outcome = None;
            state.phase = SessionPhase::CameraReady;
        }
        self.emit_session_state().await;
        Ok(self.snapshot().await)
    }

    /// Resume from an error at the stage it happened: re-acquire the
    /// camera, re-analyze the held frame, or go back to review so Done can
    /// be pressed again.
    pub async fn retry(&self) -> Result<SessionSnapshot> {
        let (generation, stage) = {
            let state = self.state.lock().await;
            match &state.phase {
                SessionPhase::Error { stage, .. } => (state.generation, *stage),
                _ => bail!("session is not in an error state"),
            }
        };

        match stage {
            ErrorStage::CameraStarting => {
                {
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        return Ok(state.snapshot());
                    }
                    state.phase = SessionPhase::CameraStarting;
                }
                self.emit_camera_state(CameraState::Starting, None, None);
                self.emit_session_state().await;
                self.acquire_camera(generation).await;
                Ok(self.snapshot().await)
            }
            ErrorStage::Analyzing => {
                let rerun = {
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        return Ok(state.snapshot());
                    }
                    if state.captured.is_some() {
                        state.phase = SessionPhase::Analyzing;
                        true
                    } else {
                        state.phase = SessionPhase::CameraReady;
                        false
                    }
                };
                self.emit_session_state().await;
                if rerun {
                    self.run_manual_analysis(generation).await
                } else {
                    Ok(self.snapshot().await)
                }
            }
            ErrorStage::Committing => {
                {
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        return Ok(state.snapshot());
                    }
                    state.phase = if state.outcome.is_some() || state.captured.is_some() {
                        SessionPhase::Reviewing
                    } else {
                        SessionPhase::CameraReady
                    };
                }
                self.emit_session_state().await;
                Ok(self.snapshot().await)
            }
        }
    }

    /// Toggle the detection loop. Turning it off cancels any in-flight
    /// scan analysis and a pending countdown.
    pub async fn set_auto_scan(&self, enabled: bool) -> Result<SessionSnapshot> {
        let (generation, was_scanning, bound) = {
            let mut state = self.state.lock().await;
            state.auto_scan_enabled = enabled;
            let was_scanning =
                matches!(state.phase, SessionPhase::Scanning | SessionPhase::Detected);
            if !enabled && was_scanning {
                if state.phase == SessionPhase::Detected {
                    state.outcome = None;
                }
                state.phase = SessionPhase::CameraReady;
            }
            let bound = !matches!(state.phase, SessionPhase::Idle | SessionPhase::Closed);
            (state.generation, was_scanning, bound)
        };

        if enabled {
            if bound {
                self.start_scan_loop(generation);
            }
        } else {
            self.cancel_scan_loop();
            self.cancel_countdown();
            self.cancel_inflight_analysis();
            if was_scanning {
                self.emit_scan_status(ScanStatus::Idle).await;
            }
        }
        self.emit_session_state().await;
        Ok(self.snapshot().await)
    }

    /// Tear the session down and release the camera, whatever phase it is
    /// in. Safe to call twice.
    pub async fn close_session(&self) -> Result<SessionSnapshot> {
        self.cancel_scan_loop();
        self.cancel_countdown();
        self.cancel_inflight_analysis();

        {
            let mut state = self.state.lock().await;
            if state.phase == SessionPhase::Idle {
                return Ok(state.snapshot());
            }
            state.close();
        }
        info!("Capture session closed");
        self.finish_close().await;
        Ok(self.snapshot().await)
    }

    // --- scan loop internals -------------------------------------------

    /// One detection pass. Every await is followed by a generation and
    /// phase re-check, so a tick that raced a manual action or a close
    /// quietly drops its work.
    pub(crate) async fn run_scan_tick(
        &self,
        generation: u64,
        loop_cancel: &CancellationToken,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.generation != generation
                || !state.auto_scan_enabled
                || state.phase != SessionPhase::CameraReady
            {
                return Ok(());
            }
            state.phase = SessionPhase::Scanning;
        }
        self.emit_scan_status(ScanStatus::Scanning).await;
        self.emit_session_state().await;

        let frame = match self.sample_frame(FrameQuality::Scan).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("scan tick skipped: camera still warming up");
                self.finish_scan_tick(generation).await;
                return Ok(());
            }
            Err(err) => {
                warn!("scan sample failed: {err}");
                self.finish_scan_tick(generation).await;
                return Ok(());
            }
        };

        let unchanged = {
            let suppress = lock_mutex(&self.last_no_match_phash);
            scene_unchanged(&frame.phash, suppress.as_deref())
        };
        if unchanged {
            debug!("scan tick skipped: scene unchanged");
            self.finish_scan_tick(generation).await;
            return Ok(());
        }

        let pending = match self.pending_photo_specs(generation).await {
            Ok(pending) => pending,
            Err(err) => {
                self.finish_scan_tick(generation).await;
                return Err(err).context("loading pending specs for scan");
            }
        };
        if pending.is_empty() {
            self.finish_scan_tick(generation).await;
            return Ok(());
        }

        let tick_cancel = loop_cancel.child_token();
        *lock_mutex(&self.analysis_cancel) = Some(tick_cancel.clone());

        match self.analyzer.detect(&frame, &pending, &tick_cancel).await {
            Err(AnalysisError::Cancelled) => {
                debug!("scan analysis cancelled");
                Ok(())
            }
            Err(err) => {
                warn!("scan analysis failed: {err}");
                self.finish_scan_tick(generation).await;
                Ok(())
            }
            Ok(None) => {
                *lock_mutex(&self.last_no_match_phash) = Some(frame.phash.clone());
                self.finish_scan_tick(generation).await;
                Ok(())
            }
            Ok(Some(outcome)) => {
                {
                    let mut state = self.state.lock().await;
                    if state.generation != generation || state.phase != SessionPhase::Scanning {
                        return Ok(());
                    }
                    state.phase = SessionPhase::Detected;
                    state.outcome = Some(HeldOutcome {
                        outcome: outcome.clone(),
                        source: OutcomeSource::AutoScan,
                    });
                }
                info!(
                    "Detected spec {} at confidence {:.2}",
                    outcome.spec_id, outcome.confidence
                );
                self.emit_scan_status(ScanStatus::Detected).await;
                self.emit_outcome_ready(&outcome, OutcomeSource::AutoScan);
                self.emit_session_state().await;

                if passes_gate(outcome.confidence) {
                    self.start_countdown(generation, outcome.spec_id.clone());
                } else {
                    // Surfaced for the operator to judge; scanning resumes
                    // once the scene changes.
                    *lock_mutex(&self.last_no_match_phash) = Some(outcome.frame.phash.clone());
                    let reverted = {
                        let mut state = self.state.lock().await;
                        if state.generation == generation
                            && state.phase == SessionPhase::Detected
                        {
                            state.phase = SessionPhase::CameraReady;
                            true
                        } else {
                            false
                        }
                    };
                    if reverted {
                        self.emit_scan_status(ScanStatus::Idle).await;
                        self.emit_session_state().await;
                    }
                }
                Ok(())
            }
        }
    }

    /// Used when a tick future was dropped on timeout and may have left
    /// the phase at Scanning.
    pub(crate) async fn recover_stuck_scan(&self, generation: u64) {
        warn!("recovering session phase after a stuck scan tick");
        self.finish_scan_tick(generation).await;
    }

    async fn finish_scan_tick(&self, generation: u64) {
        let reverted = {
            let mut state = self.state.lock().await;
            if state.generation == generation && state.phase == SessionPhase::Scanning {
                state.phase = SessionPhase::CameraReady;
                true
            } else {
                false
            }
        };
        if reverted {
            self.emit_scan_status(ScanStatus::Idle).await;
            self.emit_session_state().await;
        }
    }

    /// Photo specs of the bound category that have no stored result yet;
    /// these are the candidates a scan tick offers the analyzer.
    async fn pending_photo_specs(&self, generation: u64) -> Result<Vec<Spec>> {
        let (inspection_id, category) = {
            let state = self.state.lock().await;
            if state.generation != generation {
                return Ok(Vec::new());
            }
            match (state.inspection_id.clone(), state.category.clone()) {
                (Some(inspection_id), Some(category)) => (inspection_id, category),
                _ => return Ok(Vec::new()),
            }
        };

        let photo_specs: Vec<Spec> = self
            .catalog
            .specs_for_category(&category)
            .into_iter()
            .filter(|spec| spec.evidence == EvidenceKind::Photo)
            .collect();
        if photo_specs.is_empty() {
            return Ok(Vec::new());
        }

        let results = self.gateway.db().list_results(&inspection_id).await?;
        Ok(photo_specs
            .into_iter()
            .filter(|spec| !results.iter().any(|result| result.spec_id == spec.id))
            .collect())
    }

    // --- shared flow pieces --------------------------------------------

    async fn acquire_camera(&self, generation: u64) {
        let factory = Arc::clone(&self.source_factory);
        let camera = Arc::clone(&self.camera);
        let opened = tokio::task::spawn_blocking(move || -> Result<String, CameraError> {
            let mut manager = lock_mutex(&camera);
            manager.release();
            let source = factory()?;
            let label = source.label();
            manager.install(source);
            Ok(label)
        })
        .await
        .unwrap_or_else(|err| Err(CameraError::Capture(format!("camera worker failed: {err}"))));

        match opened {
            Ok(label) => {
                let start_loop = {
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        return;
                    }
                    state.phase = SessionPhase::CameraReady;
                    state.camera_label = Some(label.clone());
                    state.auto_scan_enabled
                };
                info!("Camera ready: {label}");
                self.emit_camera_state(CameraState::Ready, Some(label), None);
                self.emit_session_state().await;
                if start_loop {
                    self.start_scan_loop(generation);
                }
            }
            Err(err) => {
                warn!("camera acquisition failed: {err}");
                {
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        return;
                    }
                    state.phase = SessionPhase::Error {
                        stage: ErrorStage::CameraStarting,
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    };
                }
                self.emit_camera_state(CameraState::Failed, None, Some(&err));
                self.emit_session_error(ErrorStage::CameraStarting, err.kind(), &err.to_string());
                self.emit_session_state().await;
            }
        }
    }

    async fn run_manual_analysis(&self, generation: u64) -> Result<SessionSnapshot> {
        let (frame, spec_id) = {
            let state = self.state.lock().await;
            if state.generation != generation {
                return Ok(state.snapshot());
            }
            let frame = match state.captured.clone() {
                Some(frame) => frame,
                None => bail!("no captured frame to analyze"),
            };
            let spec_id = match state.spec_id.clone() {
                Some(spec_id) => spec_id,
                None => bail!("no active spec"),
            };
            (frame, spec_id)
        };
        let spec = self
            .catalog
            .get(&spec_id)
            .ok_or_else(|| anyhow!("unknown spec {spec_id}"))?;

        let cancel = CancellationToken::new();
        *lock_mutex(&self.analysis_cancel) = Some(cancel.clone());

        match self.analyzer.analyze_spec(&frame, &spec, &cancel).await {
            Ok(outcome) => {
                let accepted = {
                    let mut state = self.state.lock().await;
                    if state.generation == generation && state.phase == SessionPhase::Analyzing {
                        state.outcome = Some(HeldOutcome {
                            outcome: outcome.clone(),
                            source: OutcomeSource::Manual,
                        });
                        state.phase = SessionPhase::Reviewing;
                        true
                    } else {
                        false
                    }
                };
                if accepted {
                    info!(
                        "Analysis for spec {} came back {:?} at {:.2}",
                        spec.code, outcome.classification, outcome.confidence
                    );
                    self.emit_outcome_ready(&outcome, OutcomeSource::Manual);
                    self.emit_session_state().await;
                }
            }
            Err(AnalysisError::Cancelled) => {
                debug!("manual analysis cancelled");
            }
            Err(err) => {
                warn!("manual analysis failed: {err}");
                let raised = {
                    let mut state = self.state.lock().await;
                    if state.generation == generation && state.phase == SessionPhase::Analyzing {
                        state.phase = SessionPhase::Error {
                            stage: ErrorStage::Analyzing,
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        };
                        true
                    } else {
                        false
                    }
                };
                if raised {
                    self.emit_session_error(ErrorStage::Analyzing, err.kind(), &err.to_string());
                    self.emit_session_state().await;
                }
            }
        }
        Ok(self.snapshot().await)
    }

    /// The single commit path. Resolves the verdict, writes it through the
    /// gateway, then advances: next camera spec rebinds in place, anything
    /// else closes the session.
    async fn commit_current(
        &self,
        decision: Option<ResultStatus>,
        auto_generation: Option<u64>,
    ) -> Result<CommitFeedback> {
        let (generation, inspection_id, category, spec, captured, outcome) = {
            let mut state = self.state.lock().await;
            if let Some(expected) = auto_generation {
                if state.generation != expected
                    || state.phase != SessionPhase::Detected
                    || state.outcome.is_none()
                {
                    bail!("detection superseded before auto-commit");
                }
            } else {
                let committable = matches!(
                    state.phase,
                    SessionPhase::Reviewing
                        | SessionPhase::Detected
                        | SessionPhase::CameraReady
                        | SessionPhase::Scanning
                );
                if !committable {
                    bail!("nothing to commit in the current phase");
                }
            }
            let inspection_id = match state.inspection_id.clone() {
                Some(inspection_id) => inspection_id,
                None => bail!("no active inspection"),
            };
            let category = match state.category.clone() {
                Some(category) => category,
                None => bail!("no active category"),
            };
            let spec_id = match state.spec_id.clone() {
                Some(spec_id) => spec_id,
                None => bail!("no active spec"),
            };
            let spec = match self.catalog.get(&spec_id) {
                Some(spec) => spec,
                None => bail!("unknown spec {spec_id}"),
            };
            state.phase = SessionPhase::Committing;
            (
                state.generation,
                inspection_id,
                category,
                spec,
                state.captured.clone(),
                state.outcome.clone(),
            )
        };
        self.emit_scan_status(ScanStatus::Idle).await;
        self.emit_session_state().await;

        let outcome = outcome.map(|held| held.outcome);
        let (status, ai) = resolve_verdict(decision, outcome.as_ref());
        let evidence = captured
            .as_ref()
            .or_else(|| outcome.as_ref().map(|outcome| &outcome.frame));
        let inspector = self.settings.inspector().inspector_id;

        let saved = match self
            .gateway
            .save(&inspector, &inspection_id, &spec, status, evidence, ai)
            .await
        {
            Ok(saved) => saved,
            Err(err) => {
                error!("failed to save result for spec {}: {err}", spec.code);
                let raised = {
                    let mut state = self.state.lock().await;
                    if state.generation == generation && state.phase == SessionPhase::Committing {
                        state.phase = SessionPhase::Error {
                            stage: ErrorStage::Committing,
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        };
                        true
                    } else {
                        false
                    }
                };
                if raised {
                    self.emit_session_error(ErrorStage::Committing, err.kind(), &err.to_string());
                    self.emit_session_state().await;
                }
                return Err(err.into());
            }
        };
        info!("Committed {} for spec {}", status.as_str(), spec.code);

        let next = match self.next_capture_spec(&inspection_id, &category).await {
            Ok(next) => next,
            Err(err) => {
                warn!("could not determine next pending spec: {err}");
                None
            }
        };
        self.emit_result_committed(&saved, next.as_ref().map(|spec| spec.id.clone()));
        self.apply_advance(generation, next.clone()).await;

        Ok(CommitFeedback {
            saved,
            next_spec_id: next.map(|spec| spec.id),
            session: self.snapshot().await,
        })
    }

    async fn next_capture_spec(&self, inspection_id: &str, category: &str) -> Result<Option<Spec>> {
        let specs = self.catalog.specs_for_category(category);
        let next = self.gateway.next_pending_spec(inspection_id, &specs).await?;
        Ok(next)
    }

    /// After a commit: rebind to the next camera-capturable spec without
    /// dropping the device, or close when the rest of the checklist is
    /// manual or done.
    async fn apply_advance(&self, generation: u64, next: Option<Spec>) {
        match next {
            Some(spec) if spec.evidence != EvidenceKind::Manual => {
                let new_generation = {
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        return;
                    }
                    state.rebind_spec(spec.id.clone())
                };
                lock_mutex(&self.last_no_match_phash).take();
                info!("Advanced to spec {}", spec.code);
                self.emit_scan_status(ScanStatus::Idle).await;
                self.emit_session_state().await;

                let auto = { self.state.lock().await.auto_scan_enabled };
                let camera_ready = lock_mutex(&self.camera).is_ready();
                if auto && camera_ready {
                    self.start_scan_loop(new_generation);
                }
            }
            _ => {
                {
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        return;
                    }
                    state.close();
                }
                info!("No camera specs left; session closed");
                self.finish_close().await;
            }
        }
    }

    async fn finish_close(&self) {
        self.emit_session_state().await;
        self.release_camera().await;
        self.emit_camera_state(CameraState::Idle, None, None);
        {
            let mut state = self.state.lock().await;
            state.reset_idle();
        }
        lock_mutex(&self.last_no_match_phash).take();
        self.emit_session_state().await;
    }

    async fn revert_to_ready(&self, generation: u64) {
        let reverted = {
            let mut state = self.state.lock().await;
            if state.generation == generation
                && !matches!(state.phase, SessionPhase::Idle | SessionPhase::Closed)
            {
                state.phase = SessionPhase::CameraReady;
                true
            } else {
                false
            }
        };
        if reverted {
            self.emit_session_state().await;
        }
    }

    async fn sample_frame(&self, quality: FrameQuality) -> Result<Option<Frame>, CameraError> {
        let camera = Arc::clone(&self.camera);
        tokio::task::spawn_blocking(move || lock_mutex(&camera).sample(quality))
            .await
            .map_err(|err| CameraError::Capture(format!("camera worker failed: {err}")))?
    }

    async fn release_camera(&self) {
        let camera = Arc::clone(&self.camera);
        let released = tokio::task::spawn_blocking(move || {
            lock_mutex(&camera).release();
        })
        .await;
        if let Err(err) = released {
            warn!("camera release worker failed: {err}");
        }
    }

    // --- worker management ---------------------------------------------

    fn start_scan_loop(&self, generation: u64) {
        let token = CancellationToken::new();
        {
            let mut slot = lock_mutex(&self.scan_cancel);
            if let Some(previous) = slot.take() {
                previous.cancel();
            }
            *slot = Some(token.clone());
        }
        tokio::spawn(autoscan::scan_loop(self.clone(), generation, token));
    }

    fn start_countdown(&self, generation: u64, spec_id: String) {
        let token = CancellationToken::new();
        {
            let mut slot = lock_mutex(&self.countdown_cancel);
            if let Some(previous) = slot.take() {
                previous.cancel();
            }
            *slot = Some(token.clone());
        }
        tokio::spawn(countdown::run_countdown(
            self.clone(),
            generation,
            spec_id,
            token,
        ));
    }

    fn cancel_scan_loop(&self) {
        if let Some(token) = lock_mutex(&self.scan_cancel).take() {
            token.cancel();
        }
    }

    fn cancel_countdown(&self) {
        if let Some(token) = lock_mutex(&self.countdown_cancel).take() {
            token.cancel();
        }
    }

    fn cancel_inflight_analysis(&self) {
        if let Some(token) = lock_mutex(&self.analysis_cancel).take() {
            token.cancel();
        }
    }

    // --- events ---------------------------------------------------------

    fn emit_camera_state(
        &self,
        state: CameraState,
        label: Option<String>,
        error: Option<&CameraError>,
    ) {
        let payload = CameraStateEvent {
            state,
            label,
            kind: error.map(|err| err.kind().to_string()),
            message: error.map(|err| err.to_string()),
        };
        let _ = self.app.emit("camera-state-changed", payload);
    }

    async fn emit_session_state(&self) {
        let snapshot = self.state.lock().await.snapshot();
        let _ = self.app.emit("session-state-changed", snapshot);
    }

    async fn emit_scan_status(&self, status: ScanStatus) {
        let spec_id = self.state.lock().await.spec_id.clone();
        let _ = self
            .app
            .emit("scan-status-changed", ScanStatusEvent { status, spec_id });
    }

    fn emit_outcome_ready(&self, outcome: &AnalysisOutcome, source: OutcomeSource) {
        let payload = OutcomeReadyEvent {
            summary: OutcomeSummary::new(outcome, source),
            frame_base64: outcome.frame.to_base64(),
            frame_width: outcome.frame.width,
            frame_height: outcome.frame.height,
        };
        let _ = self.app.emit("outcome-ready", payload);
    }

    pub(crate) fn emit_countdown_tick(&self, spec_id: &str, remaining_ms: u64) {
        let payload = CountdownTickEvent {
            spec_id: spec_id.to_string(),
            remaining_ms,
        };
        let _ = self.app.emit("countdown-tick", payload);
    }

    fn emit_result_committed(&self, saved: &SavedResult, next_spec_id: Option<String>) {
        let payload = ResultCommittedEvent {
            result: saved.result.clone(),
            progress: saved.progress.clone(),
            next_spec_id,
        };
        let _ = self.app.emit("result-committed", payload);
    }

    fn emit_session_error(&self, stage: ErrorStage, kind: &str, message: &str) {
        let payload = SessionErrorEvent {
            stage,
            kind: kind.to_string(),
            message: message.to_string(),
        };
        let _ = self.app.emit("session-error", payload);
    }
}

fn lock_mutex<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Operator decision wins; otherwise the analyzer verdict; with neither,
/// the spec is failed for lack of evidence with an explicit bilingual
/// rationale so the record shows why.
fn resolve_verdict(
    decision: Option<ResultStatus>,
    outcome: Option<&AnalysisOutcome>,
) -> (ResultStatus, Option<AiMeta>) {
    let status = match decision {
        Some(decision) => decision,
        None => match outcome {
            Some(outcome) => classification_status(outcome.classification),
            None => ResultStatus::Fail,
        },
    };

    let ai = match outcome {
        Some(outcome) => Some(AiMeta {
            analyzed: true,
            confidence: Some(outcome.confidence),
            rationale_en: Some(outcome.rationale_en.clone()),
            rationale_ar: outcome.rationale_ar.clone(),
        }),
        None if decision.is_none() => Some(AiMeta {
            analyzed: false,
            confidence: Some(0.0),
            rationale_en: Some(EVIDENCE_NOT_FOUND_EN.to_string()),
            rationale_ar: Some(EVIDENCE_NOT_FOUND_AR.to_string()),
        }),
        None => None,
    };

    (status, ai)
}

fn classification_status(classification: Classification) -> ResultStatus {
    match classification {
        Classification::Pass => ResultStatus::Pass,
        Classification::Fail => ResultStatus::Fail,
        Classification::Uncertain => ResultStatus::Uncertain,
    }
}
