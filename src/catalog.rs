//! Spec catalog: the versioned checklist of inspectable requirements.
//!
//! The app ships with a bundled seed catalog. Field deployments can drop an
//! updated `catalog.json` into the app data directory and it takes precedence
//! over the seed on the next load.

use std::{fs, path::PathBuf, sync::RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const SEED_CATALOG: &str = include_str!("catalog_seed.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvidenceKind {
    Photo,
    Document,
    Video,
    Qr,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub id: String,
    /// Short human-facing code, e.g. "FS-12".
    pub code: String,
    pub text_en: String,
    pub text_ar: String,
    pub evidence: EvidenceKind,
    pub category: String,
    pub active: bool,
    /// Position within the category checklist; drives auto-advance order.
    pub order_index: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    version: u32,
    specs: Vec<Spec>,
}

pub struct CatalogStore {
    path: PathBuf,
    version: RwLock<u32>,
    specs: RwLock<Vec<Spec>>,
}

impl CatalogStore {
    /// Load the catalog, preferring an override file at `path` over the
    /// bundled seed. A malformed override is an error rather than a silent
    /// fallback so a bad deployment is caught at startup.
    pub fn new(path: PathBuf) -> Result<Self> {
        let file = Self::load_from(&path)?;

        Ok(Self {
            path,
            version: RwLock::new(file.version),
            specs: RwLock::new(file.specs),
        })
    }

    fn load_from(path: &PathBuf) -> Result<CatalogFile> {
        let contents = if path.exists() {
            fs::read_to_string(path)
                .with_context(|| format!("failed to read catalog from {}", path.display()))?
        } else {
            SEED_CATALOG.to_string()
        };

        let mut file: CatalogFile =
            serde_json::from_str(&contents).context("failed to parse spec catalog")?;
        file.specs.sort_by_key(|spec| spec.order_index);
        Ok(file)
    }

    pub fn reload(&self) -> Result<()> {
        let file = Self::load_from(&self.path)?;
        *self.version.write().unwrap() = file.version;
        *self.specs.write().unwrap() = file.specs;
        Ok(())
    }

    pub fn version(&self) -> u32 {
        *self.version.read().unwrap()
    }

    pub fn get(&self, spec_id: &str) -> Option<Spec> {
        self.specs
            .read()
            .unwrap()
            .iter()
            .find(|spec| spec.id == spec_id)
            .cloned()
    }

    /// Active specs for one category, in checklist order.
    pub fn specs_for_category(&self, category: &str) -> Vec<Spec> {
        self.specs
            .read()
            .unwrap()
            .iter()
            .filter(|spec| spec.active && spec.category == category)
            .cloned()
            .collect()
    }

    pub fn categories(&self) -> Vec<String> {
        let specs = self.specs.read().unwrap();
        let mut categories: Vec<String> = Vec::new();
        for spec in specs.iter().filter(|spec| spec.active) {
            if !categories.contains(&spec.category) {
                categories.push(spec.category.clone());
            }
        }
        categories
    }
}
