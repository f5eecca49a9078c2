//! lashview-preview: composite an eyelash style onto a photo from the
//! command line.
//!
//! Reads a photo, loads the style's overlay from a directory of
//! `<style-id>.png` files, writes the composite JPEG and prints the
//! diagnostics report. Useful for:
//!
//! - Checking new overlay artwork against real photos
//! - Tuning shadow, mask depth and heuristic constants via `--config-json`
//! - Reproducing a composite from known landmarks with `--landmarks`
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin lashview-preview -- <IMAGE> --assets <DIR> -o <OUT.jpg> [OPTIONS]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use lashview_pipeline::{
    CompositeRequest, Compositor, DetectionResult, DirectoryAssetStore, EyeLandmarks,
    LandmarkMethod, PipelineConfig, Point, StyleId,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Eyelash-extension preview compositor.
///
/// Draws the chosen style onto both upper eyelids of the input photo and
/// writes the result as JPEG.
#[derive(Parser)]
#[command(name = "lashview-preview", version)]
struct Cli {
    /// Path to the input photo (PNG, JPEG, BMP, WebP).
    #[arg(required_unless_present = "list_styles")]
    image_path: Option<PathBuf>,

    /// Style id; unknown ids fall back to the default style.
    #[arg(long, default_value_t = StyleId::default().as_str().to_string())]
    style: String,

    /// Directory holding `<style-id>.png` overlays.
    #[arg(long, required_unless_present = "list_styles")]
    assets: Option<PathBuf>,

    /// Where to write the composite JPEG.
    #[arg(short, long, required_unless_present = "list_styles")]
    output: Option<PathBuf>,

    /// Catmull-Rom samples per landmark span.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CURVE_RESOLUTION, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    resolution: usize,

    /// JPEG quality of the output (1-100).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_JPEG_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Known upper-lid landmarks as JSON, skipping detection:
    /// `{"left":[[x,y],...],"right":[[x,y],...]}`.
    #[arg(long)]
    landmarks: Option<String>,

    /// Tier to report for `--landmarks`.
    #[arg(long, value_enum, default_value_t = Tier::Primary)]
    landmark_method: Tier,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, `--resolution` and `--jpeg-quality` are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Print the style catalog and exit.
    #[arg(long)]
    list_styles: bool,
}

/// Landmark tier selection.
#[derive(Clone, Copy, ValueEnum)]
enum Tier {
    /// Dense face mesh.
    Primary,
    /// 68-point landmarks.
    Secondary,
    /// Histogram estimate.
    Heuristic,
}

impl From<Tier> for LandmarkMethod {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Primary => Self::Primary,
            Tier::Secondary => Self::Secondary,
            Tier::Heuristic => Self::Heuristic,
        }
    }
}

/// `--landmarks` payload.
#[derive(Deserialize)]
struct LandmarksArg {
    left: Vec<[f64; 2]>,
    right: Vec<[f64; 2]>,
}

fn to_eye(points: &[[f64; 2]]) -> EyeLandmarks {
    EyeLandmarks::new(points.iter().map(|&[x, y]| Point::new(x, y)).collect())
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        curve_resolution: cli.resolution,
        jpeg_quality: cli.jpeg_quality,
        ..PipelineConfig::default()
    })
}

fn landmarks_from_cli(cli: &Cli) -> Result<Option<DetectionResult>, String> {
    let Some(ref json) = cli.landmarks else {
        return Ok(None);
    };
    let parsed: LandmarksArg =
        serde_json::from_str(json).map_err(|e| format!("Error parsing --landmarks: {e}"))?;
    Ok(Some(DetectionResult::from_eyes(
        to_eye(&parsed.left),
        to_eye(&parsed.right),
        cli.landmark_method.into(),
    )))
}

fn print_styles() {
    println!("{:<20} {:<28} {:>8} {:>6}", "Id", "Name", "Segments", "Mask");
    println!("{}", "-".repeat(65));
    for style in StyleId::ALL {
        let tuning = style.config();
        println!(
            "{:<20} {:<28} {:>8} {:>6}",
            style.as_str(),
            style.label(),
            tuning.segment_count,
            if tuning.wants_advanced_mask() { "yes" } else { "no" },
        );
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_styles {
        print_styles();
        return ExitCode::SUCCESS;
    }

    let (Some(image_path), Some(assets), Some(output)) = (&cli.image_path, &cli.assets, &cli.output)
    else {
        eprintln!("IMAGE, --assets and --output are required");
        return ExitCode::FAILURE;
    };

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let landmarks = match landmarks_from_cli(&cli) {
        Ok(l) => l,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let source_image = match lashview_pipeline::decode_image(&image_bytes) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error decoding {}: {e}", image_path.display());
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        image = %image_path.display(),
        width = source_image.width(),
        height = source_image.height(),
        style = %cli.style,
        "compositing"
    );

    let compositor = Compositor::new(Arc::new(DirectoryAssetStore::new(assets)), config);
    let request = CompositeRequest::new(source_image, cli.style.as_str());
    let result = match landmarks {
        Some(landmarks) => compositor.composite_landmarks(&request, landmarks),
        None => compositor.composite(&request),
    };

    let Some(ref jpeg) = result.output_image else {
        eprintln!(
            "Composite failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        return ExitCode::FAILURE;
    };

    if let Err(e) = std::fs::write(output, jpeg) {
        eprintln!("Error writing {}: {e}", output.display());
        return ExitCode::FAILURE;
    }
    eprintln!("JPEG written to {} ({} bytes)", output.display(), jpeg.len());

    if cli.json {
        match serde_json::to_string_pretty(&result.diagnostics) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing diagnostics: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else if let Some(ref diagnostics) = result.diagnostics {
        println!("{}", diagnostics.report());
        if let Some(score) = result.quality_score {
            println!("\nQuality score: {score}");
        }
    }

    ExitCode::SUCCESS
}
