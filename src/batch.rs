use crate::{
    align::Alignment,
    capture::{Capture, Stack},
    error::Error,
    irradiance::Irradiance,
};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};

/// File layout of a calibration run below one output directory.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn stacks_dir(&self) -> PathBuf {
        self.root.join("stacks")
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.root.join("thumbnail")
    }

    pub fn stack_path(&self, id: &str) -> PathBuf {
        self.stacks_dir().join(format!("{id}.tif"))
    }

    pub fn thumbnail_path(&self, id: &str) -> PathBuf {
        self.thumbnail_dir().join(format!("{id}.jpg"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.stacks_dir().join("log.csv")
    }

    pub fn warp_matrices_path(&self) -> PathBuf {
        self.stacks_dir().join("warp_matrices.txt")
    }

    /// Create the stack directory, and the thumbnail directory if
    /// `thumbnails` is set.
    pub fn create_dirs(&self, thumbnails: bool) -> Result<(), Error> {
        fs::create_dir_all(self.stacks_dir())?;
        if thumbnails {
            fs::create_dir_all(self.thumbnail_dir())?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchOptions {
    /// Recalibrate captures whose stack already exists.
    pub overwrite: bool,

    /// Render an RGB preview next to each stack.
    pub thumbnails: bool,

    /// Bands rendered as red, green and blue in the preview.
    pub rgb_bands: [usize; 3],
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            thumbnails: true,
            rgb_bands: [2, 1, 0],
        }
    }
}

/// What happened to a single capture during a batch.
#[derive(Debug)]
pub enum Outcome {
    Calibrated {
        stack: PathBuf,
        thumbnail: Option<PathBuf>,
    },

    /// The stack already existed and overwriting was not requested.
    Exists(PathBuf),

    /// The capture does not have the flight's band count.
    BandMismatch { expected: usize, found: usize },

    Failed(Error),
}

impl Outcome {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, Self::Calibrated { .. })
    }
}

/// Outcomes of a batch in capture order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, Outcome)>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn calibrated(&self) -> usize {
        self.count(|outcome| outcome.is_calibrated())
    }

    pub fn existing(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Exists(_)))
    }

    pub fn mismatched(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::BandMismatch { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| pred(outcome)).count()
    }
}

/// Applies one shared irradiance and alignment to every capture of a flight.
///
/// The executor only borrows its inputs, so a single executor can be shared
/// across worker threads.
pub struct BatchExecutor<'a> {
    layout: &'a OutputLayout,
    irradiance: Option<Vec<f64>>,
    alignment: &'a Alignment,
    options: BatchOptions,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        layout: &'a OutputLayout,
        irradiance: Option<&Irradiance>,
        alignment: &'a Alignment,
        options: BatchOptions,
    ) -> Self {
        Self {
            layout,
            irradiance: irradiance.map(Irradiance::augmented),
            alignment,
            options,
        }
    }

    /// Irradiance handed to each capture, including the trailing sentinel.
    pub fn irradiance(&self) -> Option<&[f64]> {
        self.irradiance.as_deref()
    }

    /// Calibrate a single capture.
    ///
    /// `expected_bands` is the canonical band count of the flight. The
    /// capture's image buffers are released whatever the outcome.
    pub fn process<C: Capture>(&self, capture: &mut C, expected_bands: usize) -> Outcome {
        let outcome = self.calibrate(capture, expected_bands);
        capture.clear_image_data();

        match &outcome {
            Outcome::Calibrated { stack, .. } => {
                info!("capture {}: wrote {}", capture.id(), stack.display())
            }
            Outcome::Exists(stack) => {
                debug!("capture {}: {} exists, skipping", capture.id(), stack.display())
            }
            Outcome::BandMismatch { expected, found } => warn!(
                "capture {}: has {found} bands but the flight has {expected}, skipping",
                capture.id()
            ),
            Outcome::Failed(err) => error!("capture {}: calibration failed: {err}", capture.id()),
        }

        outcome
    }

    fn calibrate<C: Capture>(&self, capture: &mut C, expected_bands: usize) -> Outcome {
        let stack_path = self.layout.stack_path(capture.id());
        if stack_path.exists() && !self.options.overwrite {
            return Outcome::Exists(stack_path);
        }

        let found = capture.band_count();
        if found != expected_bands {
            return Outcome::BandMismatch {
                expected: expected_bands,
                found,
            };
        }

        match self.write_outputs(capture, stack_path) {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Failed(err),
        }
    }

    fn write_outputs<C: Capture>(
        &self,
        capture: &mut C,
        stack_path: PathBuf,
    ) -> Result<Outcome, Error> {
        let stack = capture.aligned_stack(self.irradiance(), self.alignment)?;

        // The stack takes its final name only after every output is written.
        let partial = stack_path.with_extension("tif.partial");
        let thumbnail = match self.save_stack(capture.id(), &stack, &partial) {
            Ok(thumbnail) => thumbnail,
            Err(err) => {
                let _ = fs::remove_file(&partial);
                return Err(err);
            }
        };
        fs::rename(&partial, &stack_path)?;

        Ok(Outcome::Calibrated {
            stack: stack_path,
            thumbnail,
        })
    }

    fn save_stack<S: Stack>(
        &self,
        id: &str,
        stack: &S,
        path: &Path,
    ) -> Result<Option<PathBuf>, Error> {
        stack.save_tiff(path)?;
        if !self.options.thumbnails {
            return Ok(None);
        }

        let thumbnail = self.layout.thumbnail_path(id);
        stack.save_rgb(&thumbnail, self.options.rgb_bands)?;
        Ok(Some(thumbnail))
    }

    /// Calibrate every capture in order.
    ///
    /// The canonical band count is taken from the first capture.
    pub fn run<C: Capture>(&self, captures: &mut [C]) -> BatchReport {
        let Some(expected_bands) = captures.first().map(Capture::band_count) else {
            return BatchReport::default();
        };

        let total = captures.len();
        let outcomes = captures
            .iter_mut()
            .enumerate()
            .map(|(i, capture)| {
                debug!("processing capture {} of {total}", i + 1);
                (capture.id().to_string(), self.process(capture, expected_bands))
            })
            .collect();

        BatchReport { outcomes }
    }

    /// Calibrate every capture on the rayon thread pool.
    ///
    /// Outcomes are reported in capture order. Only the capture being
    /// processed is mutated by each worker.
    pub fn par_run<C: Capture + Send>(&self, captures: &mut [C]) -> BatchReport {
        let Some(expected_bands) = captures.first().map(Capture::band_count) else {
            return BatchReport::default();
        };

        let outcomes = captures
            .par_iter_mut()
            .map(|capture| (capture.id().to_string(), self.process(capture, expected_bands)))
            .collect();

        BatchReport { outcomes }
    }
}
