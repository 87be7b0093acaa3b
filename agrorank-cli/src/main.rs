//! agrorank CLI - parcel ranking from drone orthomosaics

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::{error, info};

use agrorank::config::PipelineConfig;
use agrorank::geometric::index::{self, BandMap, IndexFormula};
use agrorank::geometric::quality;
use agrorank::io::geotiff;
use agrorank::pipeline::{JobRequest, Pipeline};

#[derive(Parser)]
#[command(name = "agrorank")]
#[command(author, version, about = "Parcel ranking from drone orthomosaics", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ranking job against the configured storage
    Run {
        /// Project identifier
        #[arg(long)]
        project: String,
        /// Parcel (talhão) identifier
        #[arg(long)]
        parcel: String,
        /// Job identifier; generated from the ids and the time when absent
        #[arg(long)]
        job_id: Option<String>,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Root directory of the local storage
        #[arg(long)]
        storage_root: Option<PathBuf>,
        /// Vegetation index: vari, ndvi, gndvi
        #[arg(short, long)]
        formula: Option<IndexFormula>,
        /// Keep the job working directory
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        keep_work_dir: Option<bool>,
    },
    /// Compute a vegetation index raster from a GeoTIFF
    Index {
        /// Input orthomosaic
        input: PathBuf,
        /// Output index GeoTIFF
        output: PathBuf,
        /// Vegetation index: vari, ndvi, gndvi
        #[arg(short, long, default_value = "vari")]
        formula: IndexFormula,
        #[arg(long, default_value = "1")]
        red: usize,
        #[arg(long, default_value = "2")]
        green: usize,
        #[arg(long, default_value = "3")]
        blue: usize,
        #[arg(long, default_value = "4")]
        nir: usize,
    },
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(level)).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            project,
            parcel,
            job_id,
            config,
            storage_root,
            formula,
            keep_work_dir,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(root) = storage_root {
                config.storage_root = root;
            }
            if let Some(formula) = formula {
                config.formula = formula;
            }
            if let Some(keep) = keep_work_dir {
                config.keep_work_dir = keep;
            }

            let request = match job_id {
                Some(id) => JobRequest::with_job_id(&id, &project, &parcel),
                None => JobRequest::new(&project, &parcel),
            };
            let pipeline =
                Pipeline::from_config(config).context("Failed to set up the pipeline")?;

            let start = Instant::now();
            let outcome = pipeline
                .run(&request)
                .with_context(|| format!("Job {} failed", request.job_id))?;
            info!("Job {} finished in {:.2?}", outcome.job_id, start.elapsed());

            for artifact in &outcome.artifacts {
                println!("{}: {}", artifact.name, artifact.locator);
            }
            println!("{}", serde_json::to_string_pretty(&outcome.metrics)?);
        }

        Commands::Index {
            input,
            output,
            formula,
            red,
            green,
            blue,
            nir,
        } => {
            let raster = geotiff::read(&input)
                .with_context(|| format!("Failed to read raster: {}", input.display()))?;
            let band_map = BandMap {
                red,
                green,
                blue,
                nir,
            };
            let start = Instant::now();
            let result = index::compute(&raster, formula, &band_map)
                .with_context(|| format!("Failed to compute {}", formula))?;
            info!("{} computed in {:.2?}", formula, start.elapsed());

            geotiff::write(&result, &output)
                .with_context(|| format!("Failed to write output: {}", output.display()))?;
            if let Some(summary) = index::summarize(&result) {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }

        Commands::Info { input } => {
            let raster = geotiff::read(&input)
                .with_context(|| format!("Failed to read raster: {}", input.display()))?;
            let bounds = raster.bounds();
            let report = quality::assess(&raster, quality::DEFAULT_CLOUD_THRESHOLD);

            println!("File: {}", input.display());
            println!(
                "Dimensions: {} x {} ({} band(s), {:?})",
                raster.width(),
                raster.height(),
                raster.band_count(),
                raster.sample_type()
            );
            println!("Resolution: {}", report.resolution);
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
            );
            println!("CRS: {}", report.crs);
            if let Some(nodata) = raster.nodata() {
                println!("NoData: {}", nodata);
            }
            println!("Zero samples (band 1): {:.2}%", report.zero_fraction * 100.0);
            if let Some(cover) = report.cloud_cover {
                println!("Cloud cover: {:.2}%", cover * 100.0);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
