#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use radcal::{
    align::{Aligner, Alignment, AlignmentSettings, WarpMatrix},
    capture::{Capture, CaptureMetadata, Stack, position_from_degrees},
    error::Error,
    exiftool::TagWriter,
};
use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
};
use uom::si::{f64::Length, length::millimeter};

/// In-memory capture that records how it was used.
#[derive(Clone, Debug, Default)]
pub struct FakeCapture {
    pub id: String,
    pub bands: usize,
    pub albedo: Option<Vec<Option<f64>>>,
    pub irradiance: Vec<f64>,
    pub metadata: CaptureMetadata,
    pub fail: bool,

    /// Whether image data is currently held.
    pub loaded: bool,
    pub calibrations: usize,
    pub seen_irradiance: Option<Vec<f64>>,
}

impl FakeCapture {
    pub fn flight(id: impl Into<String>, bands: usize) -> Self {
        Self {
            id: id.into(),
            bands,
            metadata: metadata(),
            ..Default::default()
        }
    }

    pub fn panel(id: impl Into<String>, irradiance: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            bands: irradiance.len(),
            albedo: Some(vec![Some(0.5); irradiance.len()]),
            irradiance,
            ..Default::default()
        }
    }

    pub fn failing(self) -> Self {
        Self { fail: true, ..self }
    }
}

impl Capture for FakeCapture {
    type Stack = FakeStack;

    fn id(&self) -> &str {
        &self.id
    }

    fn band_count(&self) -> usize {
        self.bands
    }

    fn panel_albedo(&self) -> Option<Vec<Option<f64>>> {
        self.albedo.clone()
    }

    fn panel_irradiance(&mut self, _albedo: &[f64]) -> Result<Vec<f64>, Error> {
        self.loaded = true;
        Ok(self.irradiance.clone())
    }

    fn metadata(&self) -> CaptureMetadata {
        self.metadata.clone()
    }

    fn aligned_stack(
        &mut self,
        irradiance: Option<&[f64]>,
        alignment: &Alignment,
    ) -> Result<Self::Stack, Error> {
        self.loaded = true;
        self.seen_irradiance = irradiance.map(<[f64]>::to_vec);
        if self.fail {
            return Err(Error::InvalidInput(format!("{} is corrupt", self.id)));
        }

        self.calibrations += 1;
        Ok(FakeStack {
            id: self.id.clone(),
            bands: alignment.aligned_bands(),
        })
    }

    fn clear_image_data(&mut self) {
        self.loaded = false;
    }
}

#[derive(Debug)]
pub struct FakeStack {
    pub id: String,
    pub bands: Vec<usize>,
}

impl Stack for FakeStack {
    fn save_tiff(&self, path: &Path) -> Result<(), Error> {
        fs::write(path, format!("{} {:?}", self.id, self.bands))?;
        Ok(())
    }

    fn save_rgb(&self, path: &Path, bands: [usize; 3]) -> Result<(), Error> {
        if let Some(band) = bands.iter().find(|&&band| !self.bands.contains(&band)) {
            return Err(Error::InvalidInput(format!("band {band} is not part of the stack")));
        }
        fs::write(path, format!("{} {bands:?}", self.id))?;
        Ok(())
    }
}

/// Aligner that shifts band `i` by `i` pixels and remembers which captures
/// it was asked to align.
#[derive(Debug, Default)]
pub struct FakeAligner {
    pub aligned: RefCell<Vec<String>>,
}

impl Aligner<FakeCapture> for FakeAligner {
    fn align(
        &self,
        capture: &mut FakeCapture,
        settings: &AlignmentSettings,
    ) -> Result<Alignment, Error> {
        self.aligned.borrow_mut().push(capture.id.clone());
        capture.loaded = true;

        let matrices = (0..capture.bands)
            .map(|band| WarpMatrix::from_translation(band as f64, 0.))
            .collect();
        let bands: Vec<usize> = (0..capture.bands).collect();
        Ok(Alignment::new(
            settings.warp_mode,
            settings.reference_band,
            capture.id.clone(),
            matrices,
            &bands,
        ))
    }
}

/// Tag writer that records the ledger contents it was handed.
#[derive(Debug, Default)]
pub struct RecordingTagger {
    pub calls: RefCell<Vec<(PathBuf, PathBuf, String)>>,
}

impl TagWriter for RecordingTagger {
    fn write_tags(&self, ledger: &Path, target: &Path) -> Result<(), Error> {
        let text = fs::read_to_string(ledger)?;
        self.calls
            .borrow_mut()
            .push((ledger.to_path_buf(), target.to_path_buf(), text));
        Ok(())
    }
}

pub fn metadata() -> CaptureMetadata {
    CaptureMetadata {
        position: Some(position_from_degrees(44.2187, -76.4747, 93.5).expect("valid")),
        time: Utc.with_ymd_and_hms(2025, 6, 13, 16, 26, 47).single(),
        focal_length: Some(Length::new::<millimeter>(5.5)),
        focal_plane_resolution: Some(266.666),
    }
}

/// `count` five band flight captures named `cap00`, `cap01`, ...
pub fn flight(count: usize) -> Vec<FakeCapture> {
    (0..count)
        .map(|i| FakeCapture::flight(format!("cap{i:02}"), 5))
        .collect()
}
