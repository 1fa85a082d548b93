use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, parse_inspection_status, parse_optional_datetime, to_i64, to_u32},
    models::{Inspection, InspectionStatus},
    Database,
};

fn row_to_inspection(row: &Row) -> Result<Inspection> {
    let status: String = row.get("status")?;
    let total_specs: i64 = row.get("total_specs")?;
    let passed_count: Option<i64> = row.get("passed_count")?;
    let failed_count: Option<i64> = row.get("failed_count")?;
    let started_at: String = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Inspection {
        id: row.get("id")?,
        inspector_id: row.get("inspector_id")?,
        category: row.get("category")?,
        site: row.get("site")?,
        status: parse_inspection_status(&status)?,
        total_specs: to_u32(total_specs, "total_specs")?,
        passed_count: passed_count
            .map(|value| to_u32(value, "passed_count"))
            .transpose()?,
        failed_count: failed_count
            .map(|value| to_u32(value, "failed_count"))
            .transpose()?,
        pass_rate: row.get("pass_rate")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        completed_at: parse_optional_datetime(completed_at, "completed_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

const INSPECTION_COLUMNS: &str = "id, inspector_id, category, site, status, total_specs, \
     passed_count, failed_count, pass_rate, started_at, completed_at, created_at, updated_at";

impl Database {
    pub async fn insert_inspection(&self, inspection: &Inspection) -> Result<()> {
        let record = inspection.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO inspections (id, inspector_id, category, site, status, total_specs, started_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    record.inspector_id,
                    record.category,
                    record.site,
                    record.status.as_str(),
                    to_i64(record.total_specs),
                    record.started_at.to_rfc3339(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_inspection(&self, inspection_id: &str) -> Result<Option<Inspection>> {
        let inspection_id = inspection_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSPECTION_COLUMNS} FROM inspections WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![inspection_id])?;
            let inspection = match rows.next()? {
                Some(row) => Some(row_to_inspection(row)?),
                None => None,
            };
            Ok(inspection)
        })
        .await
    }

    pub async fn list_inspections(&self, inspector_id: &str) -> Result<Vec<Inspection>> {
        let inspector_id = inspector_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSPECTION_COLUMNS} FROM inspections
                 WHERE inspector_id = ?1
                 ORDER BY started_at DESC"
            ))?;

            let mut rows = stmt.query(params![inspector_id])?;
            let mut inspections = Vec::new();
            while let Some(row) = rows.next()? {
                inspections.push(row_to_inspection(row)?);
            }
            Ok(inspections)
        })
        .await
    }

    /// Freeze aggregates and mark the inspection completed.
    pub async fn mark_inspection_completed(
        &self,
        inspection_id: &str,
        passed_count: u32,
        failed_count: u32,
        pass_rate: f64,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let inspection_id = inspection_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE inspections
                 SET status = ?1,
                     passed_count = ?2,
                     failed_count = ?3,
                     pass_rate = ?4,
                     completed_at = ?5,
                     updated_at = ?6
                 WHERE id = ?7",
                params![
                    InspectionStatus::Completed.as_str(),
                    to_i64(passed_count),
                    to_i64(failed_count),
                    pass_rate,
                    completed_at.to_rfc3339(),
                    completed_at.to_rfc3339(),
                    inspection_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn touch_inspection(
        &self,
        inspection_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let inspection_id = inspection_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE inspections SET updated_at = ?1 WHERE id = ?2",
                params![updated_at.to_rfc3339(), inspection_id],
            )?;
            Ok(())
        })
        .await
    }
}
