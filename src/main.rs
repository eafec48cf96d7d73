mod codec;
mod compositor;
mod error;
mod segmentation;

use anyhow::{Context, Result};
use clap::Parser;
use compositor::{Compositor, CompositorConfig, DEFAULT_MAX_DIMENSION};
use segmentation::Refinement;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Foreground image (JPEG/PNG) whose subject is kept
    #[arg(short, long)]
    foreground: PathBuf,

    /// Background image (JPEG/PNG) placed behind the subject
    #[arg(short, long)]
    background: PathBuf,

    /// Where to write the composited PNG
    #[arg(short, long, default_value = codec::OUTPUT_FILE_NAME)]
    output: PathBuf,

    /// Path to a U2-Net segmentation model (ONNX file)
    /// If not provided, the foreground's border colour is keyed out instead
    #[arg(long)]
    model: Option<String>,

    /// Longest side of the foreground before segmentation
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION)]
    max_dimension: u32,

    /// Use the raw segmentation matte without boundary refinement
    #[arg(long)]
    no_alpha_matting: bool,

    /// Colour distance still treated as backdrop when no model is given
    #[arg(long, default_value_t = 30)]
    color_tolerance: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Backdrop starting");
    tracing::info!("Foreground: {}", args.foreground.display());
    tracing::info!("Background: {}", args.background.display());

    let config = CompositorConfig {
        max_dimension: args.max_dimension,
        refinement: if args.no_alpha_matting {
            Refinement::None
        } else {
            Refinement::AlphaMatting
        },
    };

    let segmenter = segmentation::create_segmenter(args.model.as_deref(), args.color_tolerance)
        .context("Failed to initialize segmentation")?;

    let mut compositor =
        Compositor::new(segmenter, config).context("Invalid compositor configuration")?;
    tracing::info!(
        "Max dimension: {}, refinement: {:?}",
        compositor.config().max_dimension,
        compositor.config().refinement
    );

    let foreground = read_input(&args.foreground)?;
    let background = read_input(&args.background)?;

    let png = compositor
        .composite_png(&foreground, &background)
        .context("Failed to composite images")?;

    write_output(&args.output, &png)
        .with_context(|| format!("Failed to write output to {}", args.output.display()))?;

    tracing::info!(
        "Wrote {} ({} bytes)",
        args.output.display(),
        png.len()
    );

    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Write `bytes` next to `path` first and rename into place, so a failed
/// write never leaves a truncated image at `path`
fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    let partial = partial_path(path);
    if let Err(err) = std::fs::write(&partial, bytes) {
        let _ = std::fs::remove_file(&partial);
        return Err(err).with_context(|| format!("Failed to write {}", partial.display()));
    }
    std::fs::rename(&partial, path).with_context(|| {
        let _ = std::fs::remove_file(&partial);
        format!("Failed to move {} into place", partial.display())
    })
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| codec::OUTPUT_FILE_NAME.to_string());
    path.with_file_name(format!(".{name}.partial"))
}
