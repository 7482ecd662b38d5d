use super::{RasterCapture, band::Band};
use crate::{
    align::{Aligner, Alignment, AlignmentSettings, WarpMatrix, WarpMode},
    capture::Capture,
    error::Error,
};
use nalgebra::{Matrix3, Vector2};
use rayon::prelude::*;
use tracing::debug;

/// Share of the reference that a shifted band must still cover.
const MIN_OVERLAP: f64 = 0.25;

/// Pyramid levels are not built below this many pixels on a side.
const MIN_LEVEL_SIZE: u32 = 16;

const NEIGHBORS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Registers every band onto the reference band with a whole pixel
/// translation.
///
/// The shift is searched exhaustively within `search_radius` at the coarsest
/// pyramid level, then refined greedily one pixel at a time on each finer
/// level. Refinement steps across all levels count against
/// [`AlignmentSettings::max_iterations`]; a band that exhausts them is
/// reported as not converged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslationAligner {
    pub search_radius: i64,
}

impl TranslationAligner {
    pub fn new(search_radius: i64) -> Self {
        Self { search_radius }
    }

    /// Shift `(dx, dy)` such that `moving(x + dx, y + dy)` best matches
    /// `reference(x, y)`.
    ///
    /// Both bands must have the same dimensions.
    pub fn estimate(
        &self,
        reference: &Band,
        moving: &Band,
        settings: &AlignmentSettings,
    ) -> Option<(i64, i64)> {
        let reference = pyramid(reference.standardized(), settings.pyramid_levels);
        let moving = pyramid(moving.standardized(), settings.pyramid_levels);
        let coarsest = reference.len().min(moving.len()) - 1;

        let radius = self.search_radius.max(0);
        let candidates: Vec<(i64, i64)> = (-radius..=radius)
            .flat_map(|dy| (-radius..=radius).map(move |dx| (dx, dy)))
            .collect();
        let (mut shift, _) = candidates
            .par_iter()
            .map(|shift| (*shift, cost(&reference[coarsest], &moving[coarsest], *shift)))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;

        let mut budget = settings.max_iterations;
        for level in (0..=coarsest).rev() {
            if level != coarsest {
                shift = (shift.0 * 2, shift.1 * 2);
            }
            shift = refine(&reference[level], &moving[level], shift, &mut budget)?;
        }

        Some(shift)
    }
}

impl Default for TranslationAligner {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Aligner<RasterCapture> for TranslationAligner {
    fn align(
        &self,
        capture: &mut RasterCapture,
        settings: &AlignmentSettings,
    ) -> Result<Alignment, Error> {
        if settings.warp_mode != WarpMode::Translation {
            return Err(Error::UnsupportedWarpMode(settings.warp_mode));
        }

        let id = capture.id().to_string();
        let bands = capture.bands()?;
        let reference = bands
            .get(settings.reference_band)
            .ok_or(Error::ReferenceBandOutOfRange {
                band: settings.reference_band,
                bands: bands.len(),
            })?;
        let (width, height) = reference.dimensions();

        let estimates: Vec<Option<WarpMatrix>> = bands
            .par_iter()
            .enumerate()
            .map(|(index, band)| {
                if index == settings.reference_band {
                    return Some(WarpMatrix::identity());
                }

                // Bands at another resolution are matched on the reference grid.
                let (dx, dy) = self.estimate(reference, &band.resized(width, height), settings)?;
                debug!("capture {id}: band {index} shifted by ({dx}, {dy})");

                let scale = Matrix3::new_nonuniform_scaling(&Vector2::new(
                    band.width().saturating_sub(1) as f64 / width.saturating_sub(1).max(1) as f64,
                    band.height().saturating_sub(1) as f64 / height.saturating_sub(1).max(1) as f64,
                ));
                let shift = WarpMatrix::from_translation(dx as f64, dy as f64);
                Some(WarpMatrix::new(scale * shift.as_matrix()))
            })
            .collect();

        let aligned: Vec<usize> = (0..estimates.len())
            .filter(|band| estimates[*band].is_some())
            .collect();
        let matrices = estimates
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();

        Ok(Alignment::new(
            WarpMode::Translation,
            settings.reference_band,
            id,
            matrices,
            &aligned,
        ))
    }
}

fn pyramid(band: Band, levels: usize) -> Vec<Band> {
    let mut pyramid = vec![band];
    while pyramid.len() <= levels {
        let Some(next) = pyramid
            .last()
            .filter(|band| band.width() >= MIN_LEVEL_SIZE && band.height() >= MIN_LEVEL_SIZE)
            .map(Band::downsample)
        else {
            break;
        };
        pyramid.push(next);
    }
    pyramid
}

/// Greedy descent from `start`, spending one unit of `budget` per step.
fn refine(
    reference: &Band,
    moving: &Band,
    start: (i64, i64),
    budget: &mut usize,
) -> Option<(i64, i64)> {
    let mut shift = start;
    let mut current = cost(reference, moving, shift);

    loop {
        let (next, next_cost) = NEIGHBORS
            .iter()
            .map(|(dx, dy)| (shift.0 + dx, shift.1 + dy))
            .map(|next| (next, cost(reference, moving, next)))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;

        if next_cost >= current {
            return current.is_finite().then_some(shift);
        }

        *budget = budget.checked_sub(1)?;
        shift = next;
        current = next_cost;
    }
}

/// Mean squared difference over the overlap of `reference` and `moving`
/// shifted by `(dx, dy)`.
///
/// Overlaps smaller than [`MIN_OVERLAP`] cost infinity.
fn cost(reference: &Band, moving: &Band, (dx, dy): (i64, i64)) -> f64 {
    let (w, h) = (reference.width() as i64, reference.height() as i64);
    let (mw, mh) = (moving.width() as i64, moving.height() as i64);

    let (x0, x1) = (0.max(-dx), w.min(mw - dx));
    let (y0, y1) = (0.max(-dy), h.min(mh - dy));
    if x1 <= x0 || y1 <= y0 {
        return f64::INFINITY;
    }

    let area = ((x1 - x0) * (y1 - y0)) as f64;
    if area < MIN_OVERLAP * (w * h) as f64 {
        return f64::INFINITY;
    }

    let (r, m) = (reference.as_slice(), moving.as_slice());
    let sum: f64 = (y0..y1)
        .map(|y| {
            let row = &r[(y * w + x0) as usize..(y * w + x1) as usize];
            let shifted = &m[((y + dy) * mw + x0 + dx) as usize..((y + dy) * mw + x1 + dx) as usize];
            row.iter()
                .zip(shifted)
                .map(|(a, b)| ((a - b) as f64).powi(2))
                .sum::<f64>()
        })
        .sum();

    sum / area
}
