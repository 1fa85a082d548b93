use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerSettings {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".into(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorProfile {
    pub inspector_id: String,
    pub display_name: String,
}

impl Default for InspectorProfile {
    fn default() -> Self {
        Self {
            inspector_id: format!("insp_{}", uuid::Uuid::new_v4()),
            display_name: "Inspector".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSettings {
    pub device_index: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self { device_index: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    analyzer: AnalyzerSettings,
    inspector: InspectorProfile,
    camera: CameraSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        let store = Self {
            path,
            data: RwLock::new(data),
        };

        // The inspector id is generated on first run; persist it so results
        // stay attributable across launches.
        store.persist(&store.data.read().unwrap())?;

        Ok(store)
    }

    pub fn analyzer(&self) -> AnalyzerSettings {
        self.data.read().unwrap().analyzer.clone()
    }

    pub fn inspector(&self) -> InspectorProfile {
        self.data.read().unwrap().inspector.clone()
    }

    pub fn camera(&self) -> CameraSettings {
        self.data.read().unwrap().camera.clone()
    }

    pub fn update_analyzer(&self, settings: AnalyzerSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.analyzer = settings;
        self.persist(&guard)
    }

    pub fn update_inspector(&self, profile: InspectorProfile) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.inspector = profile;
        self.persist(&guard)
    }

    pub fn update_camera(&self, settings: CameraSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.camera = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
