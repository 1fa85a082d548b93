use tauri::State;

use crate::{
    db::ResultStatus,
    session::{CommitFeedback, SessionController, SessionSnapshot},
};

use crate::AppState;

fn controller_from_state(state: &State<'_, AppState>) -> SessionController<tauri::Wry> {
    state.session.clone()
}

#[tauri::command]
pub async fn get_session_snapshot(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(&state);
    Ok(controller.snapshot().await)
}

#[tauri::command]
pub async fn open_capture_session(
    state: State<'_, AppState>,
    inspection_id: String,
    spec_id: String,
) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(&state);
    controller
        .open_session(inspection_id, spec_id)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn manual_capture(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(&state);
    controller.manual_capture().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn commit_result(
    state: State<'_, AppState>,
    decision: Option<ResultStatus>,
) -> Result<CommitFeedback, String> {
    let controller = controller_from_state(&state);
    controller.commit(decision).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn cancel_auto_advance(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(&state);
    controller
        .cancel_auto_advance()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn retake_capture(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(&state);
    controller.retake().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn retry_session(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(&state);
    controller.retry().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn set_auto_scan(
    state: State<'_, AppState>,
    enabled: bool,
) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(&state);
    controller
        .set_auto_scan(enabled)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn close_capture_session(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(&state);
    controller.close_session().await.map_err(|e| e.to_string())
}
