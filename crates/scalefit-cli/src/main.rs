//! scalefit: search resampling kernel parameters against a reference.
//!
//! Rescales a source image to the resolution of a reference image for
//! every combination of radius, blur, p1, and p2 in the requested
//! ranges, scores each result with SSIM, and prints one line per
//! combination followed by the best one.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin scalefit -- --ref-img ref.png --scld-img small.png \
//!     --kernel 0 --radius-lo 1 --radius-hi 4 --radius-i 0.5
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{ArgAction, Parser, ValueEnum};
use scalefit_gpu::GpuBackend;
use scalefit_pipeline::{
    Clock, CpuBackend, Dimensions, FilterMode, GrayImage, Kernel, RenderBackend,
    ResamplingPipeline, Ssim, SweepConfig, SweepDiagnostics, SweepDriver, SweepRange,
    SweepRecord,
};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};

/// Grid search over resampling kernel parameters, scored by SSIM.
///
/// The scaled image is resampled to the reference image's resolution
/// for every parameter combination; each result is compared with the
/// reference and the best combination is reported last.
#[derive(Parser)]
#[command(name = "scalefit", version, allow_negative_numbers = true)]
struct Cli {
    /// Reference image at the target resolution (1-channel grayscale).
    #[arg(long = "ref-img")]
    ref_img: Option<PathBuf>,

    /// Image to rescale (1-channel grayscale).
    #[arg(long = "scld-img")]
    scld_img: Option<PathBuf>,

    /// Filter mode: 0 = orthogonal, 1 = cylindrical.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_FILTER)]
    filter: i64,

    /// Kernel selector (0-11): Lanczos, Ginseng, Hamming, PowCosine,
    /// Kaiser, PowGaramond, PowBlackman, GNW, Said, Bicubic, FSR, BCSpline.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_KERNEL)]
    kernel: i64,

    /// Radius sweep lower bound.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_RADIUS_LO)]
    radius_lo: f32,

    /// Radius sweep upper bound.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_RADIUS_HI)]
    radius_hi: f32,

    /// Radius sweep increment (0 = single value).
    #[arg(long, default_value_t = SweepConfig::DEFAULT_RADIUS_INC)]
    radius_i: f32,

    /// Blur sweep lower bound.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_BLUR_LO)]
    blur_lo: f32,

    /// Blur sweep upper bound.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_BLUR_HI)]
    blur_hi: f32,

    /// Blur sweep increment (0 = single value).
    #[arg(long, default_value_t = SweepConfig::DEFAULT_BLUR_INC)]
    blur_i: f32,

    /// First free parameter sweep lower bound.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_P1_LO)]
    p1_lo: f32,

    /// First free parameter sweep upper bound.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_P1_HI)]
    p1_hi: f32,

    /// First free parameter sweep increment (0 = single value).
    #[arg(long, default_value_t = SweepConfig::DEFAULT_P1_INC)]
    p1_i: f32,

    /// Second free parameter sweep lower bound.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_P2_LO)]
    p2_lo: f32,

    /// Second free parameter sweep upper bound.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_P2_HI)]
    p2_hi: f32,

    /// Second free parameter sweep increment (0 = single value).
    #[arg(long, default_value_t = SweepConfig::DEFAULT_P2_INC)]
    p2_i: f32,

    /// Antiringing strength (0-1), applied when upscaling.
    #[arg(long, default_value_t = SweepConfig::DEFAULT_ANTIRINGING)]
    ar: f32,

    /// Render backend.
    #[arg(long, value_enum, default_value_t = Backend::Gpu)]
    backend: Backend,

    /// Output records, best result and diagnostics as one JSON document.
    #[arg(long)]
    json: bool,

    /// Full sweep config as a JSON string.
    ///
    /// When provided, the filter, kernel, sweep and antiringing flags are
    /// ignored. The JSON must be a valid `SweepConfig` serialization;
    /// missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Re-render the best parameters and write the result as a PNG.
    #[arg(long)]
    save_best: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Render backend selection.
#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// Software rendering on the host.
    Cpu,
    /// `wgpu` rendering on the default adapter.
    Gpu,
}

/// Build a [`SweepConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual sweep flags are ignored. Either way the result is clamped
/// and checked before use.
fn config_from_cli(cli: &Cli) -> Result<SweepConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        SweepConfig {
            filter: FilterMode::from_index_clamped(cli.filter),
            kernel: Kernel::from_index_clamped(cli.kernel),
            radius: SweepRange::new(cli.radius_lo, cli.radius_hi, cli.radius_i),
            blur: SweepRange::new(cli.blur_lo, cli.blur_hi, cli.blur_i),
            p1: SweepRange::new(cli.p1_lo, cli.p1_hi, cli.p1_i),
            p2: SweepRange::new(cli.p2_lo, cli.p2_hi, cli.p2_i),
            antiringing: cli.ar,
        }
    };
    let config = config.sanitized();
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load the image named by `flag`, which is optional on the command line
/// but required to run.
fn load_arg(path: Option<&Path>, flag: &str) -> Result<GrayImage, String> {
    path.map_or_else(|| Err(format!("Error: {flag} <path> is required")), load_gray)
}

/// Read and decode a single-channel image.
fn load_gray(path: &Path) -> Result<GrayImage, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    let image = scalefit_pipeline::decode_gray(&bytes)
        .map_err(|e| format!("Error loading {}: {e}", path.display()))?;
    debug!(path = %path.display(), dimensions = %Dimensions::of(&image), "loaded image");
    Ok(image)
}

/// Everything `--json` prints.
#[derive(Serialize)]
struct JsonReport<'a> {
    config: &'a SweepConfig,
    source: Dimensions,
    reference: Dimensions,
    records: &'a [SweepRecord],
    best: &'a SweepRecord,
    diagnostics: &'a SweepDiagnostics,
}

/// Run the sweep on `backend` and print the results.
fn run<B: RenderBackend>(
    backend: B,
    source: &GrayImage,
    reference: &GrayImage,
    config: &SweepConfig,
    cli: &Cli,
) -> Result<(), String> {
    let mut pipeline =
        ResamplingPipeline::new(backend, source, Dimensions::of(reference), config.filter)
            .map_err(|e| e.to_string())?;
    info!(
        backend = pipeline.backend().name(),
        scale = pipeline.scale(),
        downscaling = pipeline.is_downscaling(),
        "rendering"
    );

    let driver = SweepDriver::from_config(config);
    let metric = Ssim::default();
    let mut records = Vec::new();
    let outcome = driver
        .run(&mut pipeline, reference, &metric, &StdClock, |record| {
            if cli.json {
                records.push(*record);
            } else {
                println!("{record}");
            }
        })
        .map_err(|e| e.to_string())?;

    if cli.json {
        let report = JsonReport {
            config,
            source: pipeline.source_dimensions(),
            reference: pipeline.target_dimensions(),
            records: &records,
            best: &outcome.best,
            diagnostics: &outcome.diagnostics,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("Error serializing results: {e}"))?;
        println!("{json}");
    } else {
        println!("The best: {}", outcome.best);
        eprintln!("{}", outcome.diagnostics.report());
    }

    if let Some(ref path) = cli.save_best {
        let params = driver.kernel_parameters(outcome.best.point());
        let rendered = pipeline.render(&params).map_err(|e| e.to_string())?;
        let png = scalefit_pipeline::encode_png(&rendered.to_gray()).map_err(|e| e.to_string())?;
        std::fs::write(path, png).map_err(|e| format!("Error writing {}: {e}", path.display()))?;
        info!(path = %path.display(), "saved best render");
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    debug!(?config, "sweep configuration");

    let images = load_arg(cli.ref_img.as_deref(), "--ref-img")
        .and_then(|r| load_arg(cli.scld_img.as_deref(), "--scld-img").map(|s| (r, s)));
    let (reference, source) = match images {
        Ok(pair) => pair,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.backend {
        Backend::Cpu => run(CpuBackend::new(), &source, &reference, &config, &cli),
        Backend::Gpu => GpuBackend::new()
            .map_err(|e| e.to_string())
            .and_then(|gpu| run(gpu, &source, &reference, &config, &cli)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}
