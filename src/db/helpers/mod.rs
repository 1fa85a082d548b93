use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::db::models::{InspectionStatus, ResultStatus};

pub fn to_i64(value: u32) -> i64 {
    i64::from(value)
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} holds out-of-range value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_inspection_status(value: &str) -> Result<InspectionStatus> {
    match value {
        "Active" => Ok(InspectionStatus::Active),
        "Completed" => Ok(InspectionStatus::Completed),
        other => Err(anyhow!("unknown inspection status {other}")),
    }
}

pub fn parse_result_status(value: &str) -> Result<ResultStatus> {
    match value {
        "PASS" => Ok(ResultStatus::Pass),
        "FAIL" => Ok(ResultStatus::Fail),
        "UNCERTAIN" => Ok(ResultStatus::Uncertain),
        "SKIPPED" => Ok(ResultStatus::Skipped),
        other => Err(anyhow!("unknown result status {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_status_round_trips_through_storage_form() {
        for status in [
            ResultStatus::Pass,
            ResultStatus::Fail,
            ResultStatus::Uncertain,
            ResultStatus::Skipped,
        ] {
            assert_eq!(parse_result_status(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(parse_result_status("MAYBE").is_err());
        assert!(parse_inspection_status("Archived").is_err());
    }
}
