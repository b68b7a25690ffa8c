use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use fusion_core::GraphPolicy;
use fusion_optim::LrSchedule;
use fusion_pipeline::oracle::PredictionCacheOracle;
use fusion_pipeline::store::{discover_images, load_images};
use fusion_pipeline::{
    run_reconstruction, validate_config, FusionConfig, FusionReport, FusionSession, GeometryMode,
};

/// Pair-graph policy names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SceneGraph {
    /// Every pair of images.
    Complete,
    /// Each image with its `--winsize` successors.
    Swin,
    /// Every image with the `--refid` image.
    Oneref,
}

/// Multi-view 3D reconstruction from pairwise predictions.
#[derive(Debug, Parser)]
#[command(author, version, about = "Fuse pairwise point maps into one 3D model")]
struct Args {
    /// Directory with the input images (jpg, jpeg, png).
    #[arg(long)]
    input_dir: PathBuf,

    /// Output directory for the model and debug images.
    #[arg(long, default_value = "fusion_out")]
    tmp_dir: PathBuf,

    /// Pairwise prediction cache produced by the network.
    #[arg(long)]
    weights: PathBuf,

    /// Compute device the predictions were made on.
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Optional JSON configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Resize target: 224 or a multiple of 16 (default 512).
    #[arg(long)]
    image_size: Option<u32>,

    /// Minimum confidence of exported points (default 3.0).
    #[arg(long)]
    min_conf_thr: Option<f64>,

    /// Alignment iterations (default 300).
    #[arg(long)]
    niter: Option<usize>,

    /// Learning-rate schedule: cosine or linear.
    #[arg(long)]
    schedule: Option<LrSchedule>,

    /// Initial learning rate (default 0.01).
    #[arg(long)]
    lr: Option<f64>,

    #[arg(long, value_enum)]
    scenegraph: Option<SceneGraph>,

    /// Window size of the `swin` graph (default 1).
    #[arg(long, requires = "scenegraph")]
    winsize: Option<usize>,

    /// Wrap the `swin` window around the end of the sequence.
    #[arg(long, requires = "scenegraph")]
    cyclic: bool,

    /// Reference image of the `oneref` graph (default 0).
    #[arg(long, requires = "scenegraph")]
    refid: Option<usize>,

    /// Pairs per inference call (default 1).
    #[arg(long)]
    batch_size: Option<usize>,

    /// Export a point cloud (true) or a mesh (false).
    #[arg(long)]
    as_pointcloud: Option<bool>,

    #[arg(long)]
    mask_sky: Option<bool>,

    #[arg(long)]
    clean_depth: Option<bool>,

    #[arg(long)]
    transparent_cams: Option<bool>,

    /// Camera frustum size (default 0.005).
    #[arg(long)]
    cam_size: Option<f64>,

    /// trace, debug, info, warn or error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logger(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stderr);
    builder.filter_level(log::LevelFilter::Info);
    builder.parse_filters(level);
    if let Err(err) = builder.try_init() {
        eprintln!("failed to initialize logger: {err}");
    }
}

/// Config file (or defaults) with the command-line overrides applied.
fn build_config(args: &Args) -> Result<FusionConfig> {
    let mut config = match &args.config {
        Some(path) => FusionConfig::load(path)?,
        None => FusionConfig::default(),
    };

    if let Some(size) = args.image_size {
        config.image_size = size;
    }
    if let Some(thr) = args.min_conf_thr {
        config.export.min_conf_thr = thr;
    }
    if let Some(niter) = args.niter {
        config.optimize.niter = niter;
    }
    if let Some(schedule) = args.schedule {
        config.optimize.schedule = schedule;
    }
    if let Some(lr) = args.lr {
        config.optimize.lr = lr;
    }
    if let Some(graph) = args.scenegraph {
        if graph != SceneGraph::Swin && (args.winsize.is_some() || args.cyclic) {
            log::warn!("--winsize and --cyclic only apply to --scenegraph swin");
        }
        if graph != SceneGraph::Oneref && args.refid.is_some() {
            log::warn!("--refid only applies to --scenegraph oneref");
        }
        config.graph.policy = match graph {
            SceneGraph::Complete => GraphPolicy::Complete,
            SceneGraph::Swin => GraphPolicy::SlidingWindow {
                window: args.winsize.unwrap_or(1),
                cyclic: args.cyclic,
            },
            SceneGraph::Oneref => GraphPolicy::SingleReference {
                reference: args.refid.unwrap_or(0),
            },
        };
    }
    if let Some(batch) = args.batch_size {
        config.inference.batch_size = batch;
    }
    if let Some(pc) = args.as_pointcloud {
        config.export.mode = if pc {
            GeometryMode::PointCloud
        } else {
            GeometryMode::Mesh
        };
    }
    if let Some(sky) = args.mask_sky {
        config.post.mask_sky = sky;
    }
    if let Some(clean) = args.clean_depth {
        config.post.clean_depth = clean;
    }
    if let Some(transparent) = args.transparent_cams {
        config.export.transparent_cams = transparent;
    }
    if let Some(size) = args.cam_size {
        config.export.cam_size = size;
    }

    validate_config(&config).context("invalid configuration")?;
    Ok(config)
}

fn run(args: &Args) -> Result<FusionReport> {
    let config = build_config(args)?;
    let mut oracle = PredictionCacheOracle::open(&args.weights, &args.device)
        .with_context(|| format!("cannot load weights from {}", args.weights.display()))?;

    let paths = discover_images(&args.input_dir)?;
    log::info!(
        "found {} images in {}",
        paths.len(),
        args.input_dir.display()
    );
    let images = load_images(&paths, config.image_size)
        .with_context(|| format!("failed to load images from {}", args.input_dir.display()))?;

    let mut session = FusionSession::with_description(format!(
        "reconstruction of {}",
        args.input_dir.display()
    ));
    session.set_input(images)?;
    run_reconstruction(&mut session, &mut oracle, &args.tmp_dir, Some(config))
}

fn write_report_json(report: &FusionReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);
    let report = run(&args)?;
    if let Some(path) = &report.scene_path {
        log::info!("scene written to {}", path.display());
    }
    println!("{}", write_report_json(&report)?);
    Ok(())
}
