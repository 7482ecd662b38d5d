//! Calibration of one flight from panel captures to tagged output stacks.
//!
//! Stages run strictly in order: panel irradiance, output directories,
//! reference alignment, the per-capture batch, the ledger and finally the tag
//! writer. Only the batch stage may run in parallel.

use crate::{
    align::{Aligner, Alignment, AlignmentSettings, solve_reference},
    batch::{BatchExecutor, BatchOptions, BatchReport, OutputLayout},
    capture::Capture,
    error::Error,
    exiftool::TagWriter,
    irradiance::Irradiance,
    ledger::Ledger,
};
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Directory that receives `stacks/` and `thumbnail/`.
    pub output: PathBuf,

    pub alignment: AlignmentSettings,

    /// Index of the flight capture the alignment is estimated from.
    pub reference_capture: usize,

    /// Reuse transforms dumped by an earlier run instead of estimating them.
    pub warp_matrices: Option<PathBuf>,

    pub batch: BatchOptions,

    /// Whether downwelling light sensor readings should be used. Only
    /// reported; panel irradiance is always used when available.
    pub use_dls: bool,

    /// Calibrate captures on the rayon thread pool.
    pub parallel: bool,
}

impl PipelineConfig {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            alignment: AlignmentSettings::default(),
            reference_capture: 4,
            warp_matrices: None,
            batch: BatchOptions::default(),
            use_dls: true,
            parallel: false,
        }
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.output)
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub irradiance: Option<Irradiance>,
    pub alignment: Alignment,
    pub report: BatchReport,
    pub ledger: PathBuf,
    pub elapsed: Duration,
}

/// Calibrate every `flight` capture against the `panels`.
///
/// Individual capture failures are recorded in the returned report. Failing
/// to align, to write the ledger or to write tags aborts the run.
pub fn run<C, A, T>(
    config: &PipelineConfig,
    panels: &mut [C],
    flight: &mut [C],
    aligner: &A,
    tagger: &T,
) -> Result<RunSummary, Error>
where
    C: Capture + Send,
    A: Aligner<C>,
    T: TagWriter,
{
    let start = Instant::now();
    if flight.is_empty() {
        return Err(Error::InvalidInput("no flight captures to calibrate".into()));
    }
    if config.use_dls {
        debug!("downwelling light sensor correction was requested but is not applied");
    }

    let irradiance = Irradiance::from_panels(panels);
    match &irradiance {
        Some(irradiance) => info!("panel irradiance {:?}", irradiance.as_slice()),
        None => warn!("no usable panel captures, stacks are not irradiance normalized"),
    }

    let layout = config.layout();
    layout.create_dirs(config.batch.thumbnails)?;

    let alignment = match &config.warp_matrices {
        Some(path) => {
            info!("reusing warp matrices from {}", path.display());
            Alignment::load(path)?
        }
        None => solve_reference(
            flight,
            config.reference_capture,
            &config.alignment,
            aligner,
        )?,
    };
    alignment.save(layout.warp_matrices_path())?;

    let executor = BatchExecutor::new(&layout, irradiance.as_ref(), &alignment, config.batch);
    let report = match config.parallel {
        true => executor.par_run(flight),
        false => executor.run(flight),
    };
    info!(
        "{} captures: {} calibrated, {} already present, {} with a mismatched band count, {} failed",
        report.len(),
        report.calibrated(),
        report.existing(),
        report.mismatched(),
        report.failed()
    );

    let ledger = Ledger::build(flight, &layout).save(layout.ledger_path())?;
    tagger.write_tags(&ledger, &layout.stacks_dir())?;

    let elapsed = start.elapsed();
    info!("calibration finished in {elapsed:.2?}");

    Ok(RunSummary {
        irradiance,
        alignment,
        report,
        ledger,
        elapsed,
    })
}
