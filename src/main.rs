use anyhow::{Context, Result};
use clap::Parser;
use ort::execution_providers::CoreMLExecutionProvider;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use swaplab_rs::config::SwapperConfig;
use swaplab_rs::face_processor::FaceLocator;
use swaplab_rs::face_swapper::FaceSwapper;
use swaplab_rs::pipeline::{BatchDriver, SwapUnit, UnitPipeline};
use swaplab_rs::post_processor::{Enhancers, PostProcessor};
use swaplab_rs::registry::ModelRegistry;
use tracing_subscriber::EnvFilter;

/// Swap source identities into target photos.
#[derive(Parser, Debug)]
#[command(name = "swaplab", version)]
struct Cli {
    /// TOML configuration with the swap units.
    #[arg(short, long, default_value = "swaplab.toml")]
    config: PathBuf,

    /// Output directory, overrides `output_dir` from the config.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use the 4x upscaled swap branch.
    #[arg(long)]
    upscaled: bool,

    /// Keep each untouched target in the results.
    #[arg(long)]
    keep_original: bool,

    /// Target images.
    #[arg(required = true)]
    targets: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let now = Instant::now();

    let mut config = SwapperConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    if cli.upscaled {
        config.upscaled_swapper.enabled = true;
    }
    if cli.keep_original {
        config.keep_original = true;
    }
    let output_dir = cli.output.or_else(|| config.output_dir.clone());

    ort::init()
        .with_name("swaplab")
        .with_execution_providers([CoreMLExecutionProvider::default().build()])
        .commit()?;

    let registry = ModelRegistry::global();
    let model_dir = &config.model_dir;
    let analyser = registry
        .analyser(model_dir)
        .context("failed to load the face analysis models")?;
    let engine = registry
        .swap_engine(&model_dir.join(&config.swap_model), &model_dir.join(&config.embedding_map))
        .context("failed to load the swap model")?;

    let mut enhancers = Enhancers::with_builtin_upscalers();
    let restorer_path = model_dir.join(&config.restorer_model);
    if restorer_path.exists() {
        enhancers.register_restorer(registry.restorer(&restorer_path, Some(analyser.clone()))?);
    } else {
        tracing::info!(path = %restorer_path.display(), "no restorer model, face restoration disabled");
    }
    let enhancers = Arc::new(enhancers);

    let mut swapper = FaceSwapper::new(engine, enhancers.clone()).with_options(config.upscaled_swapper.clone());
    let parsing_path = model_dir.join(&config.parsing_model);
    if parsing_path.exists() {
        swapper = swapper.with_segmenter(registry.segmenter(&parsing_path)?);
    } else if config.upscaled_swapper.improved_mask {
        tracing::info!(path = %parsing_path.display(), "no face parsing model, improved mask disabled");
    }
    tracing::info!(elapsed = ?now.elapsed(), "models ready");

    let locator = FaceLocator::new(analyser, config.detection_threshold);
    let units = config
        .units
        .iter()
        .enumerate()
        .filter(|(_, unit)| unit.enabled)
        .map(|(i, unit)| SwapUnit::build(unit, &locator).with_context(|| format!("failed to build unit {i}")))
        .collect::<Result<Vec<_>>>()?;

    let targets = cli
        .targets
        .iter()
        .map(|path| {
            image::open(path)
                .map(|img| img.to_rgb8())
                .with_context(|| format!("failed to open {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let pipeline = UnitPipeline::new(locator, Arc::new(swapper)).with_upscale(config.upscaled_swapper.enabled);
    let driver = BatchDriver::new(pipeline, PostProcessor::new(enhancers)).with_keep_original(config.keep_original);
    let results = driver.run(&targets, output_dir.as_deref(), &units, &config.postprocessing)?;

    match &output_dir {
        Some(dir) => tracing::info!(results = results.len(), dir = %dir.display(), elapsed = ?now.elapsed(), "done"),
        None => tracing::warn!(results = results.len(), "no output directory given, results were not saved"),
    }
    Ok(())
}
