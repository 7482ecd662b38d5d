use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use radcal::{
    align::{AlignmentSettings, WarpMode},
    batch::BatchOptions,
    exiftool::ExifTool,
    pipeline::{self, PipelineConfig},
    raster::{ImageSet, TranslationAligner},
};
use std::{path::PathBuf, time::Instant};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding the calibration panel captures.
    #[arg(short, long)]
    panel: PathBuf,

    /// Directory holding the flight captures.
    #[arg(short, long)]
    imageset: PathBuf,

    /// Directory that receives `stacks/` and `thumbnail/`.
    #[arg(short, long)]
    output: PathBuf,

    /// Write an RGB thumbnail for every stack.
    #[arg(short, long, default_value_t = true, action = ArgAction::Set)]
    thumbnail: bool,

    /// Request downwelling light sensor correction.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    dls: bool,

    /// Recalibrate captures whose stack already exists.
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    overwrite: bool,

    #[arg(long, default_value_t = 1)]
    reference_band: usize,

    #[arg(long, default_value_t = 30)]
    max_iterations: usize,

    #[arg(long, default_value_t = WarpMode::Translation)]
    warp_mode: WarpMode,

    #[arg(long, default_value_t = 1)]
    pyramid_levels: usize,

    /// Index of the flight capture used to estimate the alignment.
    #[arg(long, default_value_t = 4)]
    reference_capture: usize,

    /// Reuse a `warp_matrices.txt` from an earlier run.
    #[arg(long)]
    warp_matrices: Option<PathBuf>,

    /// Bands shown as red, green and blue in thumbnails.
    #[arg(long, value_delimiter = ',', default_value = "2,1,0")]
    rgb_bands: Vec<usize>,

    /// Calibrate captures in parallel.
    #[arg(short, long)]
    jobs: bool,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Result<PipelineConfig> {
        let rgb_bands: [usize; 3] = match self.rgb_bands.as_slice() {
            [r, g, b] => [*r, *g, *b],
            other => bail!("expected three rgb bands but got {}", other.len()),
        };

        Ok(PipelineConfig {
            alignment: AlignmentSettings {
                reference_band: self.reference_band,
                max_iterations: self.max_iterations,
                warp_mode: self.warp_mode,
                pyramid_levels: self.pyramid_levels,
            },
            reference_capture: self.reference_capture,
            warp_matrices: self.warp_matrices.clone(),
            batch: BatchOptions {
                overwrite: self.overwrite,
                thumbnails: self.thumbnail,
                rgb_bands,
            },
            use_dls: self.dls,
            parallel: self.jobs,
            ..PipelineConfig::new(&self.output)
        })
    }
}

fn init_tracing(verbose: bool) {
    let default = match verbose {
        true => "debug",
        false => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_timer(fmt::time::Uptime::default())
        .finish()
        .try_init();
}

fn main() -> Result<()> {
    let start = Instant::now();
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.config()?;
    let exiftool = ExifTool::from_env();
    info!("using {}", exiftool.program().display());

    let mut panels = ImageSet::from_directory(&args.panel, &exiftool)
        .with_context(|| format!("failed to load panel captures from {}", args.panel.display()))?
        .into_captures();
    let mut flight = ImageSet::from_directory(&args.imageset, &exiftool)
        .with_context(|| {
            format!(
                "failed to load flight captures from {}",
                args.imageset.display()
            )
        })?
        .into_captures();

    let summary = pipeline::run(
        &config,
        &mut panels,
        &mut flight,
        &TranslationAligner::default(),
        &exiftool,
    )
    .context("calibration failed")?;

    info!(
        "wrote {} stacks and {}",
        summary.report.calibrated(),
        summary.ledger.display()
    );
    println!("finished in {:.2?}", start.elapsed());
    Ok(())
}
