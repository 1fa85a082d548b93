pub mod analysis;
pub mod camera;
pub mod catalog;
pub mod db;
pub mod error;
pub mod inspection_commands;
pub mod session;
pub mod settings;
pub mod testing;

use std::sync::Arc;

use analysis::AnalysisClient;
use camera::{FrameSource, NokhwaSource};
use catalog::CatalogStore;
use db::{Database, ResultsGateway};
use inspection_commands::{
    complete_inspection, get_checklist, get_inspection_progress, get_specs_for_category,
    list_categories, list_inspections, record_manual_result, skip_spec, start_inspection,
};
use session::{
    commands::{
        cancel_auto_advance, close_capture_session, commit_result, get_session_snapshot,
        manual_capture, open_capture_session, retake_capture, retry_session, set_auto_scan,
    },
    SessionController, SourceFactory,
};
use settings::{AnalyzerSettings, CameraSettings, InspectorProfile, SettingsStore};
use tauri::{Emitter, Manager, State};

pub struct AppState {
    pub db: Database,
    pub catalog: Arc<CatalogStore>,
    pub settings: Arc<SettingsStore>,
    pub gateway: ResultsGateway,
    pub session: SessionController<tauri::Wry>,
}

#[tauri::command]
fn get_analyzer_settings(state: State<AppState>) -> Result<AnalyzerSettings, String> {
    Ok(state.settings.analyzer())
}

#[tauri::command]
fn set_analyzer_settings(
    settings: AnalyzerSettings,
    state: State<AppState>,
) -> Result<(), String> {
    state
        .settings
        .update_analyzer(settings)
        .map_err(|e| e.to_string())
}

#[tauri::command]
fn get_inspector_profile(state: State<AppState>) -> Result<InspectorProfile, String> {
    Ok(state.settings.inspector())
}

#[tauri::command]
fn set_inspector_profile(
    profile: InspectorProfile,
    state: State<AppState>,
) -> Result<(), String> {
    state
        .settings
        .update_inspector(profile)
        .map_err(|e| e.to_string())
}

#[tauri::command]
fn get_camera_settings(state: State<AppState>) -> Result<CameraSettings, String> {
    Ok(state.settings.camera())
}

#[tauri::command]
fn set_camera_settings(settings: CameraSettings, state: State<AppState>) -> Result<(), String> {
    state
        .settings
        .update_camera(settings)
        .map_err(|e| e.to_string())
}

#[tauri::command]
fn get_catalog_version(state: State<AppState>) -> Result<u32, String> {
    Ok(state.catalog.version())
}

#[tauri::command]
fn reload_spec_catalog(
    state: State<AppState>,
    app_handle: tauri::AppHandle,
) -> Result<u32, String> {
    state.catalog.reload().map_err(|e| e.to_string())?;
    let version = state.catalog.version();
    app_handle
        .emit("catalog-reloaded", version)
        .map_err(|e| e.to_string())?;
    Ok(version)
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("FieldLens starting up...");

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let result = (|| -> anyhow::Result<()> {
                let app_data_dir = app
                    .path()
                    .app_data_dir()
                    .map_err(|err| anyhow::anyhow!(err))?;
                std::fs::create_dir_all(&app_data_dir)?;

                let db_path = app_data_dir.join("fieldlens.sqlite3");
                let database = Database::new(db_path)?;

                let catalog = Arc::new(CatalogStore::new(app_data_dir.join("catalog.json"))?);
                let settings = Arc::new(SettingsStore::new(app_data_dir.join("settings.json"))?);

                let evidence_root = app_data_dir.join("evidence");
                std::fs::create_dir_all(&evidence_root)?;
                let gateway = ResultsGateway::new(database.clone(), evidence_root);

                let analyzer = Arc::new(AnalysisClient::new(Arc::clone(&settings))?);

                let camera_settings = Arc::clone(&settings);
                let source_factory: SourceFactory = Arc::new(move || {
                    let device_index = camera_settings.camera().device_index;
                    NokhwaSource::open(device_index)
                        .map(|source| Box::new(source) as Box<dyn FrameSource>)
                });

                let session = SessionController::new(
                    app.handle().clone(),
                    gateway.clone(),
                    Arc::clone(&catalog),
                    Arc::clone(&settings),
                    analyzer,
                    source_factory,
                );

                app.manage(AppState {
                    db: database,
                    catalog,
                    settings,
                    gateway,
                    session,
                });

                Ok(())
            })();

            result.map_err(|err| err.into())
        })
        .invoke_handler(tauri::generate_handler![
            get_session_snapshot,
            open_capture_session,
            manual_capture,
            commit_result,
            cancel_auto_advance,
            retake_capture,
            retry_session,
            set_auto_scan,
            close_capture_session,
            list_categories,
            get_specs_for_category,
            start_inspection,
            list_inspections,
            get_inspection_progress,
            get_checklist,
            skip_spec,
            record_manual_result,
            complete_inspection,
            get_analyzer_settings,
            set_analyzer_settings,
            get_inspector_profile,
            set_inspector_profile,
            get_camera_settings,
            set_camera_settings,
            get_catalog_version,
            reload_spec_catalog,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
