//! Captures backed by band images on disk.
//!
//! A capture is the set of single band TIFFs a multispectral camera writes for
//! one trigger. Band images are decoded lazily on first use and normalized so
//! that full scale is 1.0; these values stand in for radiance.

mod band;
mod stack;
mod translation;

pub use band::Band;
pub use stack::ReflectanceStack;
pub use translation::TranslationAligner;

use crate::{
    align::Alignment,
    capture::{Capture, CaptureMetadata},
    error::Error,
    exiftool::{ExifRecord, ExifTool},
};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    f64::consts::PI,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Share of each panel image dimension averaged for irradiance.
const PANEL_WINDOW: f64 = 0.2;

#[derive(Clone, Debug)]
pub struct RasterCapture {
    id: String,

    /// Metadata of each band image in band order.
    files: Vec<ExifRecord>,
    bands: Option<Vec<Band>>,
}

impl RasterCapture {
    pub fn new(id: impl Into<String>, files: Vec<ExifRecord>) -> Self {
        Self {
            id: id.into(),
            files,
            bands: None,
        }
    }

    /// A capture from already decoded bands.
    ///
    /// Such a capture has no files to reload from and keeps its bands through
    /// [`Capture::clear_image_data`].
    pub fn from_bands(id: impl Into<String>, bands: Vec<Band>) -> Self {
        Self {
            id: id.into(),
            files: vec![ExifRecord::default(); bands.len()],
            bands: Some(bands),
        }
    }

    pub fn files(&self) -> &[ExifRecord] {
        &self.files
    }

    /// Decoded bands, decoding them if needed.
    pub fn bands(&mut self) -> Result<&[Band], Error> {
        let bands = match self.bands.take() {
            Some(bands) => bands,
            None => self.decode()?,
        };
        let bands: &[Band] = self.bands.insert(bands);
        Ok(bands)
    }

    fn decode(&self) -> Result<Vec<Band>, Error> {
        debug!("decoding {} bands of capture {}", self.files.len(), self.id);
        self.files
            .par_iter()
            .enumerate()
            .map(|(index, record)| {
                if record.source_file.as_os_str().is_empty() {
                    return Err(Error::MissingImageData {
                        id: self.id.clone(),
                        band: index,
                    });
                }

                let band = Band::open(&record.source_file)?;
                match record.dimensions() {
                    Some(expected) if expected != band.dimensions() => {
                        Err(Error::DimensionMismatch {
                            id: self.id.clone(),
                            band: index,
                            expected,
                            found: band.dimensions(),
                        })
                    }
                    _ => Ok(band),
                }
            })
            .collect()
    }
}

impl Capture for RasterCapture {
    type Stack = ReflectanceStack;

    fn id(&self) -> &str {
        &self.id
    }

    fn band_count(&self) -> usize {
        self.files.len()
    }

    fn panel_albedo(&self) -> Option<Vec<Option<f64>>> {
        let albedo: Vec<Option<f64>> = self.files.iter().map(|record| record.albedo).collect();
        albedo.iter().any(Option::is_some).then_some(albedo)
    }

    fn panel_irradiance(&mut self, albedo: &[f64]) -> Result<Vec<f64>, Error> {
        if albedo.len() != self.band_count() {
            return Err(Error::InvalidInput(format!(
                "capture {} has {} bands but {} albedo values",
                self.id,
                self.band_count(),
                albedo.len()
            )));
        }

        let id = self.id.clone();
        self.bands()?
            .iter()
            .zip(albedo)
            .enumerate()
            .map(|(index, (band, albedo))| match *albedo > 0. {
                true => Ok(PI * band.window_mean(PANEL_WINDOW) / albedo),
                false => Err(Error::InvalidInput(format!(
                    "capture {id}: band {index} has albedo {albedo}"
                ))),
            })
            .collect()
    }

    fn metadata(&self) -> CaptureMetadata {
        let Some(record) = self.files.first() else {
            return CaptureMetadata::default();
        };

        CaptureMetadata {
            position: record.position(),
            time: record.time(),
            focal_length: record.focal_length(),
            focal_plane_resolution: record.focal_plane_resolution(),
        }
    }

    fn aligned_stack(
        &mut self,
        irradiance: Option<&[f64]>,
        alignment: &Alignment,
    ) -> Result<Self::Stack, Error> {
        if alignment.band_count() != self.band_count() {
            return Err(Error::WarpCountMismatch {
                id: self.id.clone(),
                expected: self.band_count(),
                found: alignment.band_count(),
            });
        }

        let id = self.id.clone();
        ReflectanceStack::from_bands(&id, self.bands()?, irradiance, alignment)
    }

    fn clear_image_data(&mut self) {
        if !self.files.iter().all(|record| record.source_file.as_os_str().is_empty()) {
            self.bands = None;
        }
    }
}

/// Captures found below one directory, in acquisition order.
#[derive(Clone, Debug, Default)]
pub struct ImageSet {
    captures: Vec<RasterCapture>,
}

impl ImageSet {
    /// Load every capture below `dir`.
    ///
    /// Band images are not decoded until a capture's pixels are needed.
    pub fn from_directory(dir: impl AsRef<Path>, exiftool: &ExifTool) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let files = tiff_files(dir)?;
        if files.is_empty() {
            return Err(Error::NoCaptures(dir.to_path_buf()));
        }

        let set = Self::from_records(exiftool.read_metadata(&files)?);
        info!(
            "found {} captures in {} band images below {}",
            set.len(),
            files.len(),
            dir.display()
        );
        Ok(set)
    }

    /// Group band image metadata into captures.
    ///
    /// Bands are grouped by `CaptureId`, falling back to the file stem
    /// without its `_<band>` suffix.
    pub fn from_records(records: impl IntoIterator<Item = ExifRecord>) -> Self {
        let mut groups: BTreeMap<String, Vec<ExifRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(capture_key(&record)).or_default().push(record);
        }

        let mut captures: Vec<RasterCapture> = groups
            .into_iter()
            .map(|(id, mut files)| {
                files.sort_by(|a, b| {
                    a.rig_camera_index
                        .cmp(&b.rig_camera_index)
                        .then_with(|| a.source_file.cmp(&b.source_file))
                });
                RasterCapture::new(id, files)
            })
            .collect();
        captures.sort_by_cached_key(|capture| (capture.metadata().time, capture.id.clone()));

        Self { captures }
    }

    pub fn captures(&self) -> &[RasterCapture] {
        &self.captures
    }

    pub fn into_captures(self) -> Vec<RasterCapture> {
        self.captures
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }
}

/// Every `.tif` or `.tiff` file below `dir`, sorted by path.
pub fn tiff_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, Error> {
    fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), Error> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(&path, files)?;
            } else if path
                .extension()
                .and_then(OsStr::to_str)
                .is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
            {
                files.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(dir.as_ref(), &mut files)?;
    files.sort();
    Ok(files)
}

fn capture_key(record: &ExifRecord) -> String {
    if let Some(id) = record.capture_id.as_deref().filter(|id| !id.is_empty()) {
        return id.to_string();
    }

    let stem = record
        .source_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.rsplit_once('_') {
        Some((prefix, band))
            if !prefix.is_empty() && !band.is_empty() && band.bytes().all(|b| b.is_ascii_digit()) =>
        {
            prefix.to_string()
        }
        _ => stem,
    }
}
