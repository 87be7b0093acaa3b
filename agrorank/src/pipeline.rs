//! Job orchestration: fetch inputs, run the stages, publish artifacts

use std::fs::{create_dir_all, remove_dir_all, write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::collect::storage::{LocalStorage, Storage};
use crate::config::{resolve_locator, PipelineConfig};
use crate::error::{Error, Result};
use crate::geometric::clip::clip;
use crate::geometric::index::{self, IndexFormula, IndexSummary};
use crate::geometric::quality::{self, QualityReport};
use crate::geometric::ranking::{self, GlobalMetrics, RankedGrid};
use crate::geometric::zonal;
use crate::io::{geojson_io, geotiff};
use crate::notify::{JobNotification, JobStatus, LogNotifier, Notifier};

pub const CLIPPED_ARTIFACT: &str = "ortomosaico_recortado.tif";
pub const GRID_ARTIFACT: &str = "grade_saida.geojson";
pub const METRICS_ARTIFACT: &str = "metricas.json";

/// One processing request: a parcel of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    pub project_id: String,
    pub parcel_id: String,
}

impl JobRequest {
    /// Request with a job id derived from the ids and the current time
    pub fn new(project_id: &str, parcel_id: &str) -> Self {
        let job_id = format!(
            "{}_{}_{}",
            project_id,
            parcel_id,
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        );
        JobRequest::with_job_id(&job_id, project_id, parcel_id)
    }

    pub fn with_job_id(job_id: &str, project_id: &str, parcel_id: &str) -> Self {
        JobRequest {
            job_id: job_id.to_string(),
            project_id: project_id.to_string(),
            parcel_id: parcel_id.to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("job_id", &self.job_id),
            ("project_id", &self.project_id),
            ("parcel_id", &self.parcel_id),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidParameter {
                    name,
                    value: value.clone(),
                    reason: "must not be empty".to_string(),
                });
            }
            if value.contains(['/', '\\']) || value == ".." || value == "." {
                return Err(Error::InvalidParameter {
                    name,
                    value: value.clone(),
                    reason: "must not contain path separators".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Configuration resolved for a single job
#[derive(Debug, Clone)]
pub struct JobContext<'a> {
    pub request: &'a JobRequest,
    pub config: &'a PipelineConfig,
    pub work_dir: PathBuf,
}

impl<'a> JobContext<'a> {
    pub fn new(config: &'a PipelineConfig, request: &'a JobRequest) -> Self {
        JobContext {
            request,
            config,
            work_dir: config.work_root.join(&request.job_id),
        }
    }

    fn resolve(&self, template: &str) -> String {
        resolve_locator(template, &self.request.project_id, &self.request.parcel_id)
    }

    pub fn orthomosaic_locator(&self) -> String {
        self.resolve(&self.config.orthomosaic_locator)
    }

    pub fn boundary_locator(&self) -> String {
        self.resolve(&self.config.boundary_locator)
    }

    pub fn grid_locator(&self) -> String {
        self.resolve(&self.config.grid_locator)
    }

    pub fn output_locator(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.resolve(&self.config.output_prefix).trim_end_matches('/'),
            name
        )
    }

    pub fn index_artifact(&self) -> String {
        format!("{}.tif", self.config.formula.name())
    }
}

/// A file produced by a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    /// Copy in the job working directory
    pub path: PathBuf,
    /// Where storage put it
    pub locator: String,
}

/// Content of `metricas.json`, read by the report renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    pub job_id: String,
    pub project_id: String,
    pub parcel_id: String,
    pub formula: IndexFormula,
    pub metrics: GlobalMetrics,
    pub index_summary: Option<IndexSummary>,
    pub quality: QualityReport,
    /// Ids of the cells at or above the hotspot percentile, best first
    pub hotspots: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub artifacts: Vec<Artifact>,
    pub metrics: GlobalMetrics,
    pub index_summary: Option<IndexSummary>,
    pub quality: QualityReport,
    pub hotspots: Vec<i64>,
    pub ranked: RankedGrid,
}

impl JobOutcome {
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}

/// Runs parcel ranking jobs against a storage and a notifier.
///
/// Jobs share nothing but the configuration and the collaborators, so one
/// pipeline may run jobs from several threads.
pub struct Pipeline {
    config: PipelineConfig,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Pipeline {
            config,
            storage,
            notifier,
        }
    }

    /// Pipeline with local storage under `storage_root` and the notifier the
    /// configuration asks for
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(LocalStorage::new(&config.storage_root));
        let notifier = notifier_for(&config)?;
        Ok(Pipeline::new(config, storage, notifier))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one job end to end.
    ///
    /// The notifier sees `Started`, then `Completed` or `Failed`. On failure
    /// the stage error is returned unchanged.
    pub fn run(&self, request: &JobRequest) -> Result<JobOutcome> {
        let ctx = JobContext::new(&self.config, request);
        log::info!(
            "Starting job {} for project {}, parcel {}",
            request.job_id,
            request.project_id,
            request.parcel_id
        );
        self.send(JobNotification::new(
            &request.job_id,
            &request.project_id,
            &request.parcel_id,
            JobStatus::Started,
        ));

        // invalid ids still get a Failed notification, but never name a
        // directory to work in or remove
        let validation = request.validate();
        let ids_valid = validation.is_ok();
        let result = validation.and_then(|()| self.execute(&ctx));

        match &result {
            Ok(outcome) => {
                log::info!(
                    "Job {} completed: {} of {} cells ranked",
                    request.job_id,
                    outcome.metrics.ranked_cells,
                    outcome.metrics.total_cells
                );
                self.send(JobNotification::new(
                    &request.job_id,
                    &request.project_id,
                    &request.parcel_id,
                    JobStatus::Completed,
                ));
            }
            Err(e) => {
                log::error!("Job {} failed: {}", request.job_id, e);
                self.send(
                    JobNotification::new(
                        &request.job_id,
                        &request.project_id,
                        &request.parcel_id,
                        JobStatus::Failed,
                    )
                    .with_message(e.to_string()),
                );
            }
        }

        if ids_valid && !self.config.keep_work_dir {
            cleanup(&ctx.work_dir);
        }
        result
    }

    fn send(&self, notification: JobNotification) {
        if let Err(e) = self.notifier.notify(&notification) {
            log::warn!(
                "Could not deliver {:?} notification for job {}: {}",
                notification.status,
                notification.job_id,
                e
            );
        }
    }

    fn execute(&self, ctx: &JobContext<'_>) -> Result<JobOutcome> {
        let config = ctx.config;
        create_dir_all(&ctx.work_dir)?;

        let orthomosaic = geotiff::read_bytes(&self.storage.fetch(&ctx.orthomosaic_locator())?)?;
        let boundary = geojson_io::read_boundary(&utf8(
            self.storage.fetch(&ctx.boundary_locator())?,
            "boundary",
        )?)?;
        let grid = geojson_io::read_grid(&utf8(
            self.storage.fetch(&ctx.grid_locator())?,
            "grid",
        )?)?;

        let quality = quality::assess(&orthomosaic, config.cloud_threshold);
        let clipped = clip(&orthomosaic, &boundary)?;
        let index = index::compute(&clipped, config.formula, &config.band_map)?;
        let index_summary = index::summarize(&index);
        let aggregated = zonal::aggregate(&index, &grid)?;
        let ranked = ranking::rank(&aggregated);
        let metrics = ranking::global_metrics(&ranked);
        let hotspots: Vec<i64> = ranking::hotspots(&ranked, config.hotspot_percentile)
            .iter()
            .map(|c| c.cell.id)
            .collect();
        log::info!(
            "{} hotspot cell(s) at or above percentile {}: {:?}",
            hotspots.len(),
            config.hotspot_percentile,
            hotspots
        );

        let document = MetricsDocument {
            job_id: ctx.request.job_id.clone(),
            project_id: ctx.request.project_id.clone(),
            parcel_id: ctx.request.parcel_id.clone(),
            formula: config.formula,
            metrics: metrics.clone(),
            index_summary,
            quality: quality.clone(),
            hotspots: hotspots.clone(),
        };

        let artifacts = vec![
            self.publish(ctx, CLIPPED_ARTIFACT, geotiff::to_bytes(&clipped)?)?,
            self.publish(ctx, &ctx.index_artifact(), geotiff::to_bytes(&index)?)?,
            self.publish(
                ctx,
                GRID_ARTIFACT,
                geojson_io::write_ranked_grid(&ranked).into_bytes(),
            )?,
            self.publish(ctx, METRICS_ARTIFACT, serde_json::to_vec_pretty(&document)?)?,
        ];

        Ok(JobOutcome {
            job_id: ctx.request.job_id.clone(),
            artifacts,
            metrics,
            index_summary,
            quality,
            hotspots,
            ranked,
        })
    }

    /// Write an artifact to the working directory, then to storage
    fn publish(&self, ctx: &JobContext<'_>, name: &str, bytes: Vec<u8>) -> Result<Artifact> {
        let path = ctx.work_dir.join(name);
        write(&path, &bytes)?;
        let locator = self.storage.store(&bytes, &ctx.output_locator(name))?;
        log::info!("Published {} ({} bytes) to {}", name, bytes.len(), locator);
        Ok(Artifact {
            name: name.to_string(),
            path,
            locator,
        })
    }
}

fn utf8(bytes: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| Error::Geometry(format!("The {} file is not valid UTF-8: {}", what, e)))
}

fn cleanup(work_dir: &Path) {
    if work_dir.exists() {
        match remove_dir_all(work_dir) {
            Ok(()) => log::debug!("Removed working directory {:?}", work_dir),
            Err(e) => log::warn!("Could not remove working directory {:?}: {}", work_dir, e),
        }
    }
}

/// Webhook notifier when a URL is configured, log notifier otherwise
pub fn notifier_for(config: &PipelineConfig) -> Result<Arc<dyn Notifier>> {
    match config.webhook()? {
        #[cfg(feature = "webhook")]
        Some(url) => {
            log::info!("Job notifications go to {}", url);
            Ok(Arc::new(crate::notify::WebhookNotifier::new(url)?))
        }
        #[cfg(not(feature = "webhook"))]
        Some(url) => {
            log::warn!(
                "Webhook {} configured but the webhook feature is disabled, logging notifications",
                url
            );
            Ok(Arc::new(LogNotifier))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
