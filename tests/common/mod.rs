#![allow(dead_code)]

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tauri::test::{mock_app, MockRuntime};
use tauri::Listener;
use tempfile::TempDir;

use fieldlens_lib::{
    camera::{FrameSource, RawFrame},
    catalog::CatalogStore,
    db::{Database, ResultsGateway},
    error::CameraError,
    session::{SessionController, SessionSnapshot, SourceFactory},
    settings::SettingsStore,
    testing::{ScriptedAnalyzer, ScriptedReply, SyntheticSource},
};

/// Everything a session test needs, wired the way the app's setup hook
/// wires it but against temp storage, a synthetic camera, and a scripted
/// analyzer.
pub struct Harness {
    pub app: tauri::App<MockRuntime>,
    pub controller: SessionController<MockRuntime>,
    pub db: Database,
    pub gateway: ResultsGateway,
    pub catalog: Arc<CatalogStore>,
    pub settings: Arc<SettingsStore>,
    pub analyzer: Arc<ScriptedAnalyzer>,
    pub dir: TempDir,
}

impl Harness {
    pub fn inspector_id(&self) -> String {
        self.settings.inspector().inspector_id
    }

    pub async fn start_inspection(&self) -> String {
        let total = self.catalog.specs_for_category("siteSafety").len() as u32;
        self.gateway
            .start(&self.inspector_id(), "siteSafety", None, total)
            .await
            .unwrap()
            .id
    }

    /// Count emissions of one event; the counter updates as events fire.
    pub fn count_events(&self, event: &str) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        self.app.handle().listen(event.to_string(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        counter
    }

    /// Poll the session snapshot until `pred` holds. Panics with `what`
    /// after 30 (virtual) seconds.
    pub async fn wait_for<F>(&self, what: &str, mut pred: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        for _ in 0..600 {
            let snapshot = self.controller.snapshot().await;
            if pred(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {what}");
    }

    /// Poll until the analyzer has recorded `count` calls.
    pub async fn wait_for_calls(&self, count: usize) {
        for _ in 0..600 {
            if self.analyzer.calls().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {count} analyzer calls");
    }
}

/// Three-spec checklist: two photo specs and a closing manual one, so
/// commits can advance once and then hand off to manual entry.
fn write_catalog(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("catalog.json");
    let catalog = json!({
        "version": 1,
        "specs": [
            {
                "id": "spec-ext",
                "code": "SS-01",
                "textEn": "Fire extinguisher mounted near the exit",
                "textAr": "طفاية الحريق مثبتة قرب المخرج",
                "evidence": "photo",
                "category": "siteSafety",
                "active": true,
                "orderIndex": 1
            },
            {
                "id": "spec-sign",
                "code": "SS-02",
                "textEn": "Emergency exit signage is illuminated",
                "textAr": "لافتة مخرج الطوارئ مضاءة",
                "evidence": "photo",
                "category": "siteSafety",
                "active": true,
                "orderIndex": 2
            },
            {
                "id": "spec-log",
                "code": "SS-03",
                "textEn": "Maintenance log is up to date",
                "textAr": "سجل الصيانة محدث",
                "evidence": "manual",
                "category": "siteSafety",
                "active": true,
                "orderIndex": 3
            }
        ]
    });
    fs::write(&path, serde_json::to_string_pretty(&catalog).unwrap()).unwrap();
    path
}

pub fn synthetic_factory() -> SourceFactory {
    Arc::new(|| Ok(Box::new(SyntheticSource::new(64, 48)) as Box<dyn FrameSource>))
}

/// A camera whose scene changes on every grab, defeating the unchanged-
/// scene skip so each scan tick reaches the analyzer.
pub fn varying_factory() -> SourceFactory {
    Arc::new(|| {
        Ok(Box::new(SyntheticSource::new(64, 48).with_varying_scene()) as Box<dyn FrameSource>)
    })
}

/// Synthetic source that flips a flag when released, so tests can observe
/// the camera being let go.
pub struct TrackedSource {
    inner: SyntheticSource,
    released: Arc<AtomicBool>,
}

impl FrameSource for TrackedSource {
    fn grab(&mut self) -> Result<RawFrame, CameraError> {
        self.inner.grab()
    }

    fn label(&self) -> String {
        self.inner.label()
    }
}

impl Drop for TrackedSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

pub fn tracked_factory(released: Arc<AtomicBool>) -> SourceFactory {
    Arc::new(move || {
        Ok(Box::new(TrackedSource {
            inner: SyntheticSource::new(64, 48),
            released: Arc::clone(&released),
        }) as Box<dyn FrameSource>)
    })
}

pub fn harness_with(replies: Vec<ScriptedReply>, source_factory: SourceFactory) -> Harness {
    let dir = TempDir::new().unwrap();

    let catalog_path = write_catalog(&dir);
    let catalog = Arc::new(CatalogStore::new(catalog_path).unwrap());
    let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());

    let db = Database::new(dir.path().join("fieldlens-test.sqlite3")).unwrap();
    let evidence_root = dir.path().join("evidence");
    fs::create_dir_all(&evidence_root).unwrap();
    let gateway = ResultsGateway::new(db.clone(), evidence_root);

    let analyzer = Arc::new(ScriptedAnalyzer::new(replies));

    let app = mock_app();
    let controller = SessionController::new(
        app.handle().clone(),
        gateway.clone(),
        Arc::clone(&catalog),
        Arc::clone(&settings),
        Arc::clone(&analyzer) as Arc<dyn fieldlens_lib::analysis::SpecAnalyzer>,
        source_factory,
    );

    Harness {
        app,
        controller,
        db,
        gateway,
        catalog,
        settings,
        analyzer,
        dir,
    }
}
