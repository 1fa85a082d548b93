//! Persistence gateway for inspection results.
//!
//! All writes funnel through here so the invariants hold no matter which
//! path produced the verdict (auto-commit, manual Done, skip button):
//! one result row per (inspection, spec), ownership checked before any
//! write, and progress recomputed from stored rows rather than cached.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::Utc;
use log::info;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    camera::Frame,
    catalog::Spec,
    db::{
        models::{
            AiMeta, Inspection, InspectionProgress, InspectionStatus, ResultStatus, SpecResult,
        },
        Database,
    },
    error::PersistenceError,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedResult {
    pub result: SpecResult,
    pub progress: InspectionProgress,
}

#[derive(Clone)]
pub struct ResultsGateway {
    db: Database,
    evidence_root: Arc<PathBuf>,
}

impl ResultsGateway {
    pub fn new(db: Database, evidence_root: PathBuf) -> Self {
        Self {
            db,
            evidence_root: Arc::new(evidence_root),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Open a new inspection for the given category.
    pub async fn start(
        &self,
        inspector_id: &str,
        category: &str,
        site: Option<String>,
        total_specs: u32,
    ) -> Result<Inspection, PersistenceError> {
        let now = Utc::now();
        let inspection = Inspection {
            id: format!("ins_{}", Uuid::new_v4()),
            inspector_id: inspector_id.to_string(),
            category: category.to_string(),
            site,
            status: InspectionStatus::Active,
            total_specs,
            passed_count: None,
            failed_count: None,
            pass_rate: None,
            started_at: now,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.db.insert_inspection(&inspection).await?;
        info!(
            "Started inspection {} ({} specs, category {})",
            inspection.id, total_specs, category
        );
        Ok(inspection)
    }

    /// Load an inspection if and only if `inspector_id` owns it. A row owned
    /// by someone else answers exactly like a missing row.
    pub async fn owned_inspection(
        &self,
        inspector_id: &str,
        inspection_id: &str,
    ) -> Result<Inspection, PersistenceError> {
        let inspection = self
            .db
            .get_inspection(inspection_id)
            .await?
            .ok_or(PersistenceError::NotFound)?;

        if inspection.inspector_id != inspector_id {
            return Err(PersistenceError::NotFound);
        }

        Ok(inspection)
    }

    /// Record (or overwrite) the verdict for one spec and recompute
    /// progress. Saving the same verdict twice leaves one row with the same
    /// state, so a nervous double-tap on Done is harmless.
    pub async fn save(
        &self,
        inspector_id: &str,
        inspection_id: &str,
        spec: &Spec,
        status: ResultStatus,
        evidence: Option<&Frame>,
        ai: Option<AiMeta>,
    ) -> Result<SavedResult, PersistenceError> {
        let inspection = self.owned_inspection(inspector_id, inspection_id).await?;
        if inspection.status == InspectionStatus::Completed {
            return Err(PersistenceError::AlreadyCompleted);
        }

        let evidence_path = match evidence {
            Some(frame) => Some(self.write_evidence(inspection_id, &spec.id, frame).await?),
            None => None,
        };

        let now = Utc::now();
        let record = SpecResult {
            id: format!("res_{}", Uuid::new_v4()),
            inspection_id: inspection_id.to_string(),
            spec_id: spec.id.clone(),
            spec_code: spec.code.clone(),
            status,
            evidence_path,
            ai,
            created_at: now,
            updated_at: now,
        };

        let stored = self.db.upsert_result(record).await?;
        self.db.touch_inspection(inspection_id, now).await?;

        let progress = self.recompute_progress(&inspection).await?;
        info!(
            "Saved result {} for spec {} in inspection {} ({}/{} decided)",
            stored.status.as_str(),
            spec.code,
            inspection_id,
            progress.total - progress.pending,
            progress.total
        );

        Ok(SavedResult {
            result: stored,
            progress,
        })
    }

    /// Current roll-up for an inspection.
    pub async fn progress(
        &self,
        inspector_id: &str,
        inspection_id: &str,
    ) -> Result<InspectionProgress, PersistenceError> {
        let inspection = self.owned_inspection(inspector_id, inspection_id).await?;
        self.recompute_progress(&inspection).await
    }

    /// Mark the inspection completed and freeze its aggregates.
    ///
    /// Tolerates pending specs: they simply stay unset while the frozen
    /// counts cover what was actually judged. Completing twice returns the
    /// already-frozen record unchanged.
    pub async fn complete(
        &self,
        inspector_id: &str,
        inspection_id: &str,
    ) -> Result<Inspection, PersistenceError> {
        let inspection = self.owned_inspection(inspector_id, inspection_id).await?;
        if inspection.status == InspectionStatus::Completed {
            return Ok(inspection);
        }

        let counts = self.db.count_results_by_status(inspection_id).await?;
        let judged = counts.passed + counts.failed;
        let pass_rate = if judged == 0 {
            0.0
        } else {
            f64::from(counts.passed) / f64::from(judged)
        };

        self.db
            .mark_inspection_completed(
                inspection_id,
                counts.passed,
                counts.failed,
                pass_rate,
                Utc::now(),
            )
            .await?;

        let frozen = self
            .db
            .get_inspection(inspection_id)
            .await?
            .ok_or(PersistenceError::NotFound)?;

        info!(
            "Completed inspection {} (passed {}, failed {}, pass rate {:.0}%)",
            inspection_id,
            counts.passed,
            counts.failed,
            pass_rate * 100.0
        );
        Ok(frozen)
    }

    /// First spec in checklist order without a stored result. Skipped specs
    /// were set aside deliberately, so the queue passes over them.
    pub async fn next_pending_spec(
        &self,
        inspection_id: &str,
        specs: &[Spec],
    ) -> Result<Option<Spec>, PersistenceError> {
        let results = self.db.list_results(inspection_id).await?;
        let next = specs
            .iter()
            .find(|spec| !results.iter().any(|result| result.spec_id == spec.id))
            .cloned();
        Ok(next)
    }

    async fn recompute_progress(
        &self,
        inspection: &Inspection,
    ) -> Result<InspectionProgress, PersistenceError> {
        let counts = self.db.count_results_by_status(&inspection.id).await?;
        Ok(InspectionProgress::from_counts(
            inspection.total_specs,
            counts.passed,
            counts.failed,
            counts.uncertain,
            counts.skipped,
        ))
    }

    /// Write the evidence JPEG under `<root>/<inspection>/<spec>.jpg`.
    /// Re-captures overwrite in place so the file always matches the stored
    /// result row.
    async fn write_evidence(
        &self,
        inspection_id: &str,
        spec_id: &str,
        frame: &Frame,
    ) -> Result<String, PersistenceError> {
        let dir = self.evidence_root.join(inspection_id);
        let path = dir.join(format!("{spec_id}.jpg"));
        let bytes = frame.jpeg.clone();

        let written = tokio::task::spawn_blocking(move || -> anyhow::Result<PathBuf> {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create evidence dir {}", dir.display()))?;
            std::fs::write(&path, &bytes)
                .with_context(|| format!("failed to write evidence {}", path.display()))?;
            Ok(path)
        })
        .await
        .map_err(|err| PersistenceError::Storage(anyhow!("evidence writer panicked: {err}")))??;

        Ok(written.display().to_string())
    }
}
