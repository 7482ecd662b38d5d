use crate::{capture::Capture, error::Error};
use nalgebra::{Matrix3, Vector3};
use std::{fmt, fs, path::Path, str::FromStr};
use tracing::{info, warn};

/// Motion model used when estimating band-to-reference transforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WarpMode {
    #[default]
    Translation,
    Euclidean,
    Affine,
    Homography,
}

impl WarpMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Euclidean => "euclidean",
            Self::Affine => "affine",
            Self::Homography => "homography",
        }
    }
}

impl fmt::Display for WarpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WarpMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "translation" => Ok(Self::Translation),
            "euclidean" => Ok(Self::Euclidean),
            "affine" => Ok(Self::Affine),
            "homography" => Ok(Self::Homography),
            other => Err(Error::InvalidInput(format!("unknown warp mode `{other}`"))),
        }
    }
}

/// Maps pixel coordinates in the reference band onto one band's pixel
/// coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WarpMatrix {
    inner: Matrix3<f64>,
}

impl WarpMatrix {
    pub fn new(inner: Matrix3<f64>) -> Self {
        Self { inner }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_translation(dx: f64, dy: f64) -> Self {
        Self::new(Matrix3::new(1., 0., dx, 0., 1., dy, 0., 0., 1.))
    }

    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn as_matrix(&self) -> &Matrix3<f64> {
        &self.inner
    }

    /// Translation component of the transform.
    pub fn translation(&self) -> (f64, f64) {
        (self.inner[(0, 2)], self.inner[(1, 2)])
    }

    /// Map a reference pixel `(x, y)` into the band.
    ///
    /// Returns `None` for points mapped to infinity.
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let v = self.inner * Vector3::new(x, y, 1.);
        if v.z.abs() < f64::EPSILON {
            return None;
        }
        Some((v.x / v.z, v.y / v.z))
    }

    pub fn inverse(&self) -> Option<Self> {
        self.inner.try_inverse().map(Self::new)
    }
}

impl Default for WarpMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

/// Tuning for the reference alignment estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlignmentSettings {
    /// Band every other band is registered onto.
    pub reference_band: usize,

    /// Iteration budget per band before the estimator gives up.
    pub max_iterations: usize,

    pub warp_mode: WarpMode,

    /// Number of coarse-to-fine resolution halvings.
    ///
    /// Zero or one works well when the rig offsets between bands are small.
    pub pyramid_levels: usize,
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            reference_band: 1,
            max_iterations: 30,
            warp_mode: WarpMode::Translation,
            pyramid_levels: 1,
        }
    }
}

/// Per-band transforms derived once and reused for an entire flight.
#[derive(Clone, Debug, PartialEq)]
pub struct Alignment {
    warp_mode: WarpMode,
    reference_band: usize,

    /// Identifier of the capture the transforms were estimated from.
    source: String,
    matrices: Vec<WarpMatrix>,
    aligned: Vec<bool>,
}

impl Alignment {
    /// Creates an alignment from one matrix per band and the bands that
    /// converged.
    pub fn new(
        warp_mode: WarpMode,
        reference_band: usize,
        source: impl Into<String>,
        matrices: Vec<WarpMatrix>,
        aligned_bands: &[usize],
    ) -> Self {
        let mut aligned = vec![false; matrices.len()];
        for &band in aligned_bands {
            if let Some(flag) = aligned.get_mut(band) {
                *flag = true;
            }
        }

        Self {
            warp_mode,
            reference_band,
            source: source.into(),
            matrices,
            aligned,
        }
    }

    /// Identity transforms for every band, all of them aligned.
    pub fn identity(band_count: usize, reference_band: usize) -> Self {
        let bands: Vec<usize> = (0..band_count).collect();
        Self::new(
            WarpMode::Translation,
            reference_band,
            "identity",
            vec![WarpMatrix::identity(); band_count],
            &bands,
        )
    }

    pub fn warp_mode(&self) -> WarpMode {
        self.warp_mode
    }

    pub fn reference_band(&self) -> usize {
        self.reference_band
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn band_count(&self) -> usize {
        self.matrices.len()
    }

    pub fn matrices(&self) -> &[WarpMatrix] {
        &self.matrices
    }

    pub fn matrix(&self, band: usize) -> Option<&WarpMatrix> {
        self.matrices.get(band)
    }

    pub fn is_aligned(&self, band: usize) -> bool {
        self.aligned.get(band).copied().unwrap_or(false)
    }

    /// Bands that were registered successfully, in band order.
    pub fn aligned_bands(&self) -> Vec<usize> {
        (0..self.aligned.len())
            .filter(|band| self.aligned[*band])
            .collect()
    }

    /// Write the transforms to `path` in the text format read by
    /// [`Alignment::load`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        fs::read_to_string(path)?.parse()
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "warp_mode {}", self.warp_mode)?;
        writeln!(f, "reference_band {}", self.reference_band)?;
        writeln!(f, "capture {}", self.source)?;
        for (band, matrix) in self.matrices.iter().enumerate() {
            let state = match self.is_aligned(band) {
                true => "aligned",
                false => "unaligned",
            };
            writeln!(f, "band {band} {state}")?;
            for row in matrix.as_matrix().row_iter() {
                writeln!(f, "{} {} {}", row[0], row[1], row[2])?;
            }
        }
        Ok(())
    }
}

impl FromStr for Alignment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s
            .lines()
            .enumerate()
            .map(|(i, text)| (i + 1, text.trim()))
            .filter(|(_, text)| !text.is_empty() && !text.starts_with('#'));

        let (line, warp_mode) = header(&mut lines, "warp_mode")?;
        let warp_mode: WarpMode = warp_mode.parse().map_err(|err: Error| invalid(line, err))?;
        let (line, reference_band) = header(&mut lines, "reference_band")?;
        let reference_band: usize = reference_band.parse().map_err(|err| invalid(line, err))?;
        let (_, source) = header(&mut lines, "capture")?;
        let source = source.to_string();

        let mut matrices = Vec::new();
        let mut aligned = Vec::new();
        while let Some((line, text)) = lines.next() {
            let words: Vec<&str> = text.split_whitespace().collect();
            let band: usize = match words.as_slice() {
                ["band", index, "aligned" | "unaligned"] => {
                    index.parse().map_err(|err| invalid(line, err))?
                }
                _ => return Err(invalid(line, "expected `band <index> aligned|unaligned`")),
            };
            if band != matrices.len() {
                return Err(invalid(
                    line,
                    format!("expected band {} but found band {band}", matrices.len()),
                ));
            }
            if words[2] == "aligned" {
                aligned.push(band);
            }

            let mut rows = [[0.; 3]; 3];
            for row in rows.iter_mut() {
                let (line, text) = lines
                    .next()
                    .ok_or_else(|| invalid(line, format!("matrix for band {band} is truncated")))?;
                let values = text
                    .split_whitespace()
                    .map(str::parse::<f64>)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| invalid(line, err))?;
                if values.len() != 3 {
                    return Err(invalid(line, "expected three values per matrix row"));
                }
                row.copy_from_slice(&values);
            }
            matrices.push(WarpMatrix::from_rows(rows));
        }

        if reference_band >= matrices.len() {
            return Err(Error::ReferenceBandOutOfRange {
                band: reference_band,
                bands: matrices.len(),
            });
        }

        Ok(Self::new(warp_mode, reference_band, source, matrices, &aligned))
    }
}

fn header<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    key: &str,
) -> Result<(usize, &'a str), Error> {
    let (line, text) = lines.next().ok_or_else(|| invalid(0, format!("missing `{key}`")))?;
    text.strip_prefix(key)
        .map(|value| (line, value.trim()))
        .ok_or_else(|| invalid(line, format!("expected `{key}`")))
}

fn invalid(line: usize, reason: impl ToString) -> Error {
    Error::InvalidWarpMatrices {
        line,
        reason: reason.to_string(),
    }
}

/// Estimates the band-to-reference transforms of a single capture.
pub trait Aligner<C> {
    fn align(&self, capture: &mut C, settings: &AlignmentSettings) -> Result<Alignment, Error>;
}

/// Index of the capture to align from.
///
/// Uses `preferred` when the flight is long enough, otherwise the middle
/// capture. Returns `None` for an empty flight.
pub fn representative_index(len: usize, preferred: usize) -> Option<usize> {
    match len {
        0 => None,
        _ if preferred < len => Some(preferred),
        _ => Some(len / 2),
    }
}

/// Derive one [`Alignment`] for the whole flight from a single representative
/// capture.
///
/// Bands the aligner could not register are reported and left out of the
/// aligned bands. They do not fail the batch.
pub fn solve_reference<C, A>(
    captures: &mut [C],
    preferred: usize,
    settings: &AlignmentSettings,
    aligner: &A,
) -> Result<Alignment, Error>
where
    C: Capture,
    A: Aligner<C>,
{
    let index = representative_index(captures.len(), preferred)
        .ok_or_else(|| Error::InvalidInput("cannot align an empty set of captures".into()))?;
    if index != preferred {
        warn!(
            "capture index {preferred} is out of range for {} captures, aligning from capture {index}",
            captures.len()
        );
    }

    let capture = &mut captures[index];
    if settings.reference_band >= capture.band_count() {
        return Err(Error::ReferenceBandOutOfRange {
            band: settings.reference_band,
            bands: capture.band_count(),
        });
    }

    info!("aligning bands of capture {} ({index})", capture.id());
    let alignment = aligner.align(capture, settings);
    capture.clear_image_data();
    let alignment = alignment?;

    for band in (0..alignment.band_count()).filter(|band| !alignment.is_aligned(*band)) {
        warn!("band {band} did not converge and is excluded from aligned output");
    }
    info!(
        "aligned bands {:?} of {} onto band {}",
        alignment.aligned_bands(),
        alignment.band_count(),
        alignment.reference_band()
    );

    Ok(alignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn sample() -> Alignment {
        Alignment::new(
            WarpMode::Translation,
            1,
            "0SOf3q2bnDvPCyUHwqas",
            vec![
                WarpMatrix::from_translation(-3.5, 12.25),
                WarpMatrix::identity(),
                WarpMatrix::from_translation(0.125, -7.0),
            ],
            &[0, 1],
        )
    }

    #[test]
    fn dump_is_readable() {
        let dump = sample().to_string();
        assert!(dump.starts_with("warp_mode translation\nreference_band 1\ncapture 0SOf3q2bnDvPCyUHwqas\n"));
        assert!(dump.contains("band 0 aligned\n1 0 -3.5\n0 1 12.25\n0 0 1\n"));
        assert!(dump.contains("band 2 unaligned\n"));
    }

    #[test]
    fn dump_parses_back() {
        let alignment = sample();
        let parsed: Alignment = alignment.to_string().parse().expect("valid dump");

        assert_eq!(parsed, alignment);
        assert_eq!(parsed.aligned_bands(), vec![0, 1]);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("warp_matrices.txt");
        sample().save(&path).expect("writable");

        assert_eq!(Alignment::load(&path).expect("readable"), sample());
    }

    #[rstest]
    #[case("")]
    #[case("warp_mode spiral\nreference_band 0\ncapture a\n")]
    #[case("warp_mode affine\nreference_band 0\ncapture a\nband 0 aligned\n1 0 0\n0 1 0\n")]
    #[case("warp_mode affine\nreference_band 0\ncapture a\nband 1 aligned\n1 0 0\n0 1 0\n0 0 1\n")]
    #[case("warp_mode affine\nreference_band 3\ncapture a\nband 0 aligned\n1 0 0\n0 1 0\n0 0 1\n")]
    fn rejects_malformed_dump(#[case] dump: &str) {
        assert!(dump.parse::<Alignment>().is_err());
    }

    #[test]
    fn warp_matrix_maps_points() {
        let warp = WarpMatrix::from_translation(2.0, -1.5);
        let (x, y) = warp.apply(10.0, 10.0).expect("finite");
        assert_relative_eq!(x, 12.0);
        assert_relative_eq!(y, 8.5);

        let (x, y) = warp
            .inverse()
            .expect("invertible")
            .apply(x, y)
            .expect("finite");
        assert_relative_eq!(x, 10.0);
        assert_relative_eq!(y, 10.0);
    }

    #[rstest]
    #[case(10, 4, Some(4))]
    #[case(5, 4, Some(4))]
    #[case(3, 4, Some(1))]
    #[case(1, 4, Some(0))]
    #[case(0, 4, None)]
    fn picks_representative(
        #[case] len: usize,
        #[case] preferred: usize,
        #[case] expected: Option<usize>,
    ) {
        assert_eq!(representative_index(len, preferred), expected);
    }

    #[test]
    fn warp_mode_names() {
        for mode in [
            WarpMode::Translation,
            WarpMode::Euclidean,
            WarpMode::Affine,
            WarpMode::Homography,
        ] {
            assert_eq!(mode.name().parse::<WarpMode>().expect("known mode"), mode);
        }
        assert!("HOMOGRAPHY".parse::<WarpMode>().is_ok());
    }
}
