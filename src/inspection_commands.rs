use serde::Serialize;
use tauri::State;

use crate::{
    catalog::Spec,
    db::{Inspection, InspectionProgress, ResultStatus, SavedResult, SpecResult},
    AppState,
};

/// One checklist row: the spec plus whatever has been recorded for it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistEntry {
    pub spec: Spec,
    pub result: Option<SpecResult>,
}

fn inspector_id(state: &State<'_, AppState>) -> String {
    state.settings.inspector().inspector_id
}

#[tauri::command]
pub async fn list_categories(state: State<'_, AppState>) -> Result<Vec<String>, String> {
    Ok(state.catalog.categories())
}

#[tauri::command]
pub async fn get_specs_for_category(
    state: State<'_, AppState>,
    category: String,
) -> Result<Vec<Spec>, String> {
    Ok(state.catalog.specs_for_category(&category))
}

#[tauri::command]
pub async fn start_inspection(
    state: State<'_, AppState>,
    category: String,
    site: Option<String>,
) -> Result<Inspection, String> {
    let specs = state.catalog.specs_for_category(&category);
    if specs.is_empty() {
        return Err(format!("no active specs for category {category}"));
    }
    let inspector = inspector_id(&state);
    state
        .gateway
        .start(&inspector, &category, site, specs.len() as u32)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn list_inspections(state: State<'_, AppState>) -> Result<Vec<Inspection>, String> {
    let inspector = inspector_id(&state);
    state
        .db
        .list_inspections(&inspector)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_inspection_progress(
    state: State<'_, AppState>,
    inspection_id: String,
) -> Result<InspectionProgress, String> {
    let inspector = inspector_id(&state);
    state
        .gateway
        .progress(&inspector, &inspection_id)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_checklist(
    state: State<'_, AppState>,
    inspection_id: String,
) -> Result<Vec<ChecklistEntry>, String> {
    let inspector = inspector_id(&state);
    let inspection = state
        .gateway
        .owned_inspection(&inspector, &inspection_id)
        .await
        .map_err(|e| e.to_string())?;

    let specs = state.catalog.specs_for_category(&inspection.category);
    let results = state
        .db
        .list_results(&inspection_id)
        .await
        .map_err(|e| e.to_string())?;

    Ok(specs
        .into_iter()
        .map(|spec| ChecklistEntry {
            result: results
                .iter()
                .find(|result| result.spec_id == spec.id)
                .cloned(),
            spec,
        })
        .collect())
}

/// Set a spec aside without a verdict. The capture queue passes over it,
/// but it stays pending in the progress roll-up until it gets a verdict,
/// and the checklist can pick it up again at any time.
#[tauri::command]
pub async fn skip_spec(
    state: State<'_, AppState>,
    inspection_id: String,
    spec_id: String,
) -> Result<SavedResult, String> {
    let spec = state
        .catalog
        .get(&spec_id)
        .ok_or_else(|| format!("unknown spec {spec_id}"))?;
    let inspector = inspector_id(&state);
    state
        .gateway
        .save(
            &inspector,
            &inspection_id,
            &spec,
            ResultStatus::Skipped,
            None,
            None,
        )
        .await
        .map_err(|e| e.to_string())
}

/// Record an operator judgment made without the camera, for manual-entry
/// specs or when the inspector simply knows the answer.
#[tauri::command]
pub async fn record_manual_result(
    state: State<'_, AppState>,
    inspection_id: String,
    spec_id: String,
    status: ResultStatus,
) -> Result<SavedResult, String> {
    let spec = state
        .catalog
        .get(&spec_id)
        .ok_or_else(|| format!("unknown spec {spec_id}"))?;
    let inspector = inspector_id(&state);
    state
        .gateway
        .save(&inspector, &inspection_id, &spec, status, None, None)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn complete_inspection(
    state: State<'_, AppState>,
    inspection_id: String,
) -> Result<Inspection, String> {
    let inspector = inspector_id(&state);
    state
        .gateway
        .complete(&inspector, &inspection_id)
        .await
        .map_err(|e| e.to_string())
}
