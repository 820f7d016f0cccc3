use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use imageproc::image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage,
};
use rayon::prelude::*;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use pixload::{
    Bitmap, FailureKind, FittingMode, ImageAttributes, LoadStatus, LoaderConfig, PixelFormat,
    ResourceCache, ResourceId, ResourceKind, ResourceLoader, ResourceRequest, SamplingMode,
};

#[derive(Parser)]
#[command(name = "pixload")]
#[command(about = "Decode and downscale images through the pixload pipeline", long_about = None)]
#[command(version)]
struct Args {
    /// Image files or http(s) URLs
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<String>,

    /// Target width, 0 derives it from the height
    #[arg(long, value_name = "PIXELS", default_value_t = 0)]
    width: u32,

    /// Target height, 0 derives it from the width
    #[arg(long, value_name = "PIXELS", default_value_t = 0)]
    height: u32,

    /// Fitting mode (defaults to the configured one)
    #[arg(long, value_enum)]
    fitting: Option<FittingArg>,

    /// Sampling mode (defaults to the configured one)
    #[arg(long, value_enum)]
    sampling: Option<SamplingArg>,

    /// Ignore EXIF orientation
    #[arg(long, default_value_t)]
    no_orientation: bool,

    /// Write results here as PNG, or KTX for compressed textures
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Decode in parallel on the calling threads instead of the loader queues
    #[arg(long, default_value_t)]
    sync: bool,

    /// Cancel the request with this id (the input's position) right after queueing
    #[arg(long, value_name = "ID")]
    cancel: Vec<ResourceId>,

    /// Only print the size each input would load at
    #[arg(long, default_value_t)]
    size_only: bool,

    /// Store the fitting, sampling and orientation flags as the new defaults
    #[arg(long, default_value_t)]
    save_config: bool,

    /// Verbose output
    #[arg(short, long, default_value_t)]
    verbose: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long, default_value_t)]
    quiet: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum FittingArg {
    ShrinkToFit,
    ScaleToFill,
    FitWidth,
    FitHeight,
}

impl From<FittingArg> for FittingMode {
    fn from(arg: FittingArg) -> Self {
        match arg {
            FittingArg::ShrinkToFit => FittingMode::ShrinkToFit,
            FittingArg::ScaleToFill => FittingMode::ScaleToFill,
            FittingArg::FitWidth => FittingMode::FitWidth,
            FittingArg::FitHeight => FittingMode::FitHeight,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum SamplingArg {
    Box,
    Nearest,
    Linear,
    BoxThenNearest,
    BoxThenLinear,
    NoFilter,
    DontCare,
}

impl From<SamplingArg> for SamplingMode {
    fn from(arg: SamplingArg) -> Self {
        match arg {
            SamplingArg::Box => SamplingMode::Box,
            SamplingArg::Nearest => SamplingMode::Nearest,
            SamplingArg::Linear => SamplingMode::Linear,
            SamplingArg::BoxThenNearest => SamplingMode::BoxThenNearest,
            SamplingArg::BoxThenLinear => SamplingMode::BoxThenLinear,
            SamplingArg::NoFilter => SamplingMode::NoFilter,
            SamplingArg::DontCare => SamplingMode::DontCare,
        }
    }
}

type Outcome = (ResourceId, Result<Bitmap, String>);

/// Collects whatever the loader delivers.
#[derive(Default)]
struct Collector {
    outcomes: Vec<Outcome>,
}

impl ResourceCache for Collector {
    fn load_response(
        &mut self,
        id: ResourceId,
        _kind: ResourceKind,
        bitmap: Bitmap,
        _status: LoadStatus,
    ) {
        self.outcomes.push((id, Ok(bitmap)));
    }

    fn load_failed(&mut self, id: ResourceId, failure: FailureKind) {
        self.outcomes.push((id, Err(format!("{failure:?}"))));
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(args.verbose, args.quiet);

    // Load config, falling back to defaults
    let mut config = LoaderConfig::load().unwrap_or_default();
    let attributes = build_attributes(&args, &config);

    if args.save_config {
        config.default_fitting = attributes.fitting;
        config.default_sampling = attributes.sampling;
        config.orientation_correction = attributes.orientation_correction;
        let path = config.save().context("Failed to save config")?;
        log::info!("Saved config to {}", path.display());
    }

    // Create output directory if it doesn't exist
    if let Some(dir) = &args.output_dir {
        if !dir.exists() {
            std::fs::create_dir_all(dir).context("Failed to create output directory")?;
        }
    }

    let mut loader = ResourceLoader::new(&config).context("Failed to start loader")?;

    let requests: Vec<_> = args
        .inputs
        .iter()
        .enumerate()
        .map(|(id, input)| ResourceRequest::from_location(id as ResourceId, input, attributes))
        .collect();

    if args.size_only {
        for request in &requests {
            let size = loader.closest_image_size(&request.source, &request.attributes);
            println!(
                "{}\t{}x{}",
                args.inputs[request.id as usize], size.width, size.height
            );
        }
        return Ok(());
    }

    // Load images
    let outcomes = if args.sync {
        if !args.cancel.is_empty() {
            log::warn!("--cancel has no effect with --sync");
        }
        load_parallel(&loader, &requests)
    } else {
        load_queued(&mut loader, requests, &args.cancel)
    };

    // Report and write results
    let mut failures = 0;
    for (id, outcome) in outcomes {
        let input = &args.inputs[id as usize];
        match outcome {
            Ok(bitmap) => {
                if !args.quiet {
                    log::info!(
                        "{input}: {}x{} {}",
                        bitmap.width(),
                        bitmap.height(),
                        bitmap.format()
                    );
                }
                if let Some(dir) = &args.output_dir {
                    let path = write_bitmap(bitmap, dir, id, input)?;
                    log::debug!("Wrote {}", path.display());
                }
            }
            Err(failure) => {
                log::error!("{input}: {failure}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} inputs failed", args.inputs.len());
    }

    Ok(())
}

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn build_attributes(args: &Args, config: &LoaderConfig) -> ImageAttributes {
    let mut attributes = config.attributes(args.width, args.height);
    if let Some(fitting) = args.fitting {
        attributes.fitting = fitting.into();
    }
    if let Some(sampling) = args.sampling {
        attributes.sampling = sampling.into();
    }
    if args.no_orientation {
        attributes.orientation_correction = false;
    }
    attributes
}

fn load_parallel(loader: &ResourceLoader, requests: &[ResourceRequest]) -> Vec<Outcome> {
    requests
        .par_iter()
        .map(|request| {
            let outcome = loader
                .load_resource_synchronously(request)
                .map_err(|e| e.to_string());
            (request.id, outcome)
        })
        .collect()
}

fn load_queued(
    loader: &mut ResourceLoader,
    requests: Vec<ResourceRequest>,
    cancel: &[ResourceId],
) -> Vec<Outcome> {
    for request in requests {
        loader.load_resource(request);
    }
    for &id in cancel {
        loader.cancel_load(id, ResourceKind::Bitmap);
        log::info!("Cancelled request {id}");
    }

    let mut collector = Collector::default();
    while loader.pending() > 0 {
        if loader.get_resources(&mut collector) == 0 {
            thread::sleep(Duration::from_millis(10));
        }
    }
    collector.outcomes
}

fn write_bitmap(bitmap: Bitmap, dir: &Path, id: ResourceId, input: &str) -> Result<PathBuf> {
    let stem = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");

    if !bitmap.is_packed() {
        let bytes = pixload::image::encode_ktx(&bitmap)
            .with_context(|| format!("No KTX encoding for {}", bitmap.format()))?;
        let path = dir.join(format!("{id:03}-{stem}.ktx"));
        std::fs::write(&path, bytes).context("Failed to write KTX file")?;
        return Ok(path);
    }

    let format = bitmap.format();
    let image = to_dynamic_image(bitmap)
        .with_context(|| format!("Cannot convert {format} bitmap to PNG"))?;
    let path = dir.join(format!("{id:03}-{stem}.png"));
    image
        .save_with_format(&path, ImageFormat::Png)
        .context("Failed to write PNG file")?;
    Ok(path)
}

fn to_dynamic_image(bitmap: Bitmap) -> Option<DynamicImage> {
    let (width, height) = bitmap.dimensions();
    let format = bitmap.format();
    let pixels = bitmap.into_buffer();

    let image = match format {
        PixelFormat::L8 => DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, pixels)?),
        PixelFormat::La88 => {
            DynamicImage::ImageLumaA8(GrayAlphaImage::from_raw(width, height, pixels)?)
        }
        PixelFormat::A8 => {
            let pixels = pixels.iter().flat_map(|&a| [255, a]).collect();
            DynamicImage::ImageLumaA8(GrayAlphaImage::from_raw(width, height, pixels)?)
        }
        PixelFormat::Rgb888 => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, pixels)?),
        PixelFormat::Rgba8888 => {
            DynamicImage::ImageRgba8(RgbaImage::from_raw(width, height, pixels)?)
        }
        PixelFormat::Rgb565 => {
            let pixels = pixels
                .chunks_exact(2)
                .flat_map(|c| {
                    let p = u16::from_ne_bytes([c[0], c[1]]);
                    let (r, g, b) = ((p >> 11) as u8, ((p >> 5) & 63) as u8, (p & 31) as u8);
                    [r << 3 | r >> 2, g << 2 | g >> 4, b << 3 | b >> 2]
                })
                .collect();
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, pixels)?)
        }
        _ => return None,
    };

    Some(image)
}
