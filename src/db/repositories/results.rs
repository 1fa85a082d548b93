use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, parse_result_status},
    models::{AiMeta, ResultStatus, SpecResult},
    Database,
};

fn row_to_result(row: &Row) -> Result<SpecResult> {
    let status: String = row.get("status")?;
    let ai_analyzed: i64 = row.get("ai_analyzed")?;
    let ai_confidence: Option<f64> = row.get("ai_confidence")?;
    let rationale_en: Option<String> = row.get("rationale_en")?;
    let rationale_ar: Option<String> = row.get("rationale_ar")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let ai = if ai_analyzed != 0 || ai_confidence.is_some() {
        Some(AiMeta {
            analyzed: ai_analyzed != 0,
            confidence: ai_confidence,
            rationale_en,
            rationale_ar,
        })
    } else {
        None
    };

    Ok(SpecResult {
        id: row.get("id")?,
        inspection_id: row.get("inspection_id")?,
        spec_id: row.get("spec_id")?,
        spec_code: row.get("spec_code")?,
        status: parse_result_status(&status)?,
        evidence_path: row.get("evidence_path")?,
        ai,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

const RESULT_COLUMNS: &str = "id, inspection_id, spec_id, spec_code, status, evidence_path, \
     ai_analyzed, ai_confidence, rationale_en, rationale_ar, created_at, updated_at";

/// Per-status tallies for one inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub passed: u32,
    pub failed: u32,
    pub uncertain: u32,
    pub skipped: u32,
}

impl Database {
    /// Insert or overwrite the result for `(inspection_id, spec_id)`.
    /// Re-captures replace the stored verdict; `created_at` keeps the time
    /// of the first capture.
    pub async fn upsert_result(&self, result: SpecResult) -> Result<SpecResult> {
        self.execute(move |conn| {
            let (analyzed, confidence, rationale_en, rationale_ar) = match &result.ai {
                Some(ai) => (
                    ai.analyzed,
                    ai.confidence,
                    ai.rationale_en.clone(),
                    ai.rationale_ar.clone(),
                ),
                None => (false, None, None, None),
            };

            conn.execute(
                "INSERT INTO results (id, inspection_id, spec_id, spec_code, status, evidence_path,
                                      ai_analyzed, ai_confidence, rationale_en, rationale_ar,
                                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(inspection_id, spec_id) DO UPDATE SET
                     status = excluded.status,
                     evidence_path = excluded.evidence_path,
                     ai_analyzed = excluded.ai_analyzed,
                     ai_confidence = excluded.ai_confidence,
                     rationale_en = excluded.rationale_en,
                     rationale_ar = excluded.rationale_ar,
                     updated_at = excluded.updated_at",
                params![
                    result.id,
                    result.inspection_id,
                    result.spec_id,
                    result.spec_code,
                    result.status.as_str(),
                    result.evidence_path,
                    analyzed,
                    confidence,
                    rationale_en,
                    rationale_ar,
                    result.created_at.to_rfc3339(),
                    result.updated_at.to_rfc3339(),
                ],
            )?;

            // Fetch the stored row; on conflict the id and created_at of the
            // original insert win.
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESULT_COLUMNS} FROM results
                 WHERE inspection_id = ?1 AND spec_id = ?2"
            ))?;

            let mut rows = stmt.query(params![result.inspection_id, result.spec_id])?;
            match rows.next()? {
                Some(row) => row_to_result(row),
                None => Err(anyhow::anyhow!("result disappeared after upsert")),
            }
        })
        .await
    }

    pub async fn get_result(
        &self,
        inspection_id: &str,
        spec_id: &str,
    ) -> Result<Option<SpecResult>> {
        let inspection_id = inspection_id.to_string();
        let spec_id = spec_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESULT_COLUMNS} FROM results
                 WHERE inspection_id = ?1 AND spec_id = ?2"
            ))?;

            let mut rows = stmt.query(params![inspection_id, spec_id])?;
            let result = match rows.next()? {
                Some(row) => Some(row_to_result(row)?),
                None => None,
            };
            Ok(result)
        })
        .await
    }

    pub async fn list_results(&self, inspection_id: &str) -> Result<Vec<SpecResult>> {
        let inspection_id = inspection_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESULT_COLUMNS} FROM results
                 WHERE inspection_id = ?1
                 ORDER BY updated_at"
            ))?;

            let mut rows = stmt.query(params![inspection_id])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_result(row)?);
            }
            Ok(results)
        })
        .await
    }

    pub async fn count_results_by_status(&self, inspection_id: &str) -> Result<StatusCounts> {
        let inspection_id = inspection_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM results
                 WHERE inspection_id = ?1
                 GROUP BY status",
            )?;

            let mut counts = StatusCounts::default();
            let mut rows = stmt.query(params![inspection_id])?;
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let count = u32::try_from(count).unwrap_or(0);
                match parse_result_status(&status)? {
                    ResultStatus::Pass => counts.passed = count,
                    ResultStatus::Fail => counts.failed = count,
                    ResultStatus::Uncertain => counts.uncertain = count,
                    ResultStatus::Skipped => counts.skipped = count,
                }
            }
            Ok(counts)
        })
        .await
    }
}
