//! Pipeline configuration

use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::collect::global_variables::{
    get_work_root, DEFAULT_BOUNDARY_LOCATOR, DEFAULT_GRID_LOCATOR, DEFAULT_ORTHOMOSAIC_LOCATOR,
    DEFAULT_OUTPUT_PREFIX,
};
use crate::error::{Error, Result};
use crate::geometric::index::{BandMap, IndexFormula};
use crate::geometric::quality::DEFAULT_CLOUD_THRESHOLD;

pub const ENV_WEBHOOK_URL: &str = "AGRORANK_WEBHOOK_URL";
pub const ENV_STORAGE_ROOT: &str = "AGRORANK_STORAGE_ROOT";

/// Settings shared by every job a pipeline runs.
///
/// Locator templates may reference `{project}` and `{parcel}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parent of the per-job working directories
    pub work_root: PathBuf,
    /// Root directory of [`LocalStorage`](crate::collect::storage::LocalStorage)
    pub storage_root: PathBuf,
    /// Keep `<work_root>/<job_id>` once the job ends
    pub keep_work_dir: bool,
    pub formula: IndexFormula,
    pub band_map: BandMap,
    pub orthomosaic_locator: String,
    pub boundary_locator: String,
    pub grid_locator: String,
    pub output_prefix: String,
    /// Minimum percentile of a hotspot cell
    pub hotspot_percentile: f64,
    pub cloud_threshold: f64,
    pub webhook_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            work_root: get_work_root(),
            storage_root: PathBuf::from("./storage"),
            keep_work_dir: true,
            formula: IndexFormula::Vari,
            band_map: BandMap::default(),
            orthomosaic_locator: DEFAULT_ORTHOMOSAIC_LOCATOR.to_string(),
            boundary_locator: DEFAULT_BOUNDARY_LOCATOR.to_string(),
            grid_locator: DEFAULT_GRID_LOCATOR.to_string(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            hotspot_percentile: 90.0,
            cloud_threshold: DEFAULT_CLOUD_THRESHOLD,
            webhook_url: None,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {:?}: {}", path, e)))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("Invalid configuration {:?}: {}", path, e)))?;
        config.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply `AGRORANK_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_WEBHOOK_URL).filter(|v| !v.trim().is_empty()) {
            self.webhook_url = Some(url);
        }
        if let Some(root) = lookup(ENV_STORAGE_ROOT).filter(|v| !v.trim().is_empty()) {
            self.storage_root = PathBuf::from(root);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.webhook()?;
        if !(0.0..=100.0).contains(&self.hotspot_percentile) {
            return Err(Error::Config(format!(
                "hotspot_percentile must be within [0, 100], got {}",
                self.hotspot_percentile
            )));
        }
        if !(0.0..=1.0).contains(&self.cloud_threshold) {
            return Err(Error::Config(format!(
                "cloud_threshold must be within [0, 1], got {}",
                self.cloud_threshold
            )));
        }
        for (name, template) in [
            ("orthomosaic_locator", &self.orthomosaic_locator),
            ("boundary_locator", &self.boundary_locator),
            ("grid_locator", &self.grid_locator),
        ] {
            if template.trim().is_empty() {
                return Err(Error::Config(format!("{} is empty", name)));
            }
        }
        Ok(())
    }

    /// Parsed webhook URL, if one is configured
    pub fn webhook(&self) -> Result<Option<Url>> {
        self.webhook_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| Error::Config(format!("Invalid webhook URL {:?}: {}", raw, e)))
            })
            .transpose()
    }
}

/// Substitute `{project}` and `{parcel}` in a locator template
pub fn resolve_locator(template: &str, project_id: &str, parcel_id: &str) -> String {
    template
        .replace("{project}", project_id)
        .replace("{parcel}", parcel_id)
}
