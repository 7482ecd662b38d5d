use crate::{align::Alignment, error::Error};
use chrono::{DateTime, Utc};
use sguaba::systems::Wgs84;
use std::path::Path;
use uom::si::{
    angle::degree,
    f64::{Angle, Length},
    length::meter,
};

/// Geodetic and optics metadata recorded with a capture.
///
/// Every field is optional since flight logs regularly drop GPS fixes or
/// timestamps for individual captures.
#[derive(Clone, Debug, Default)]
pub struct CaptureMetadata {
    /// Position of the sensor at acquisition time.
    pub position: Option<Wgs84>,

    /// Acquisition time.
    pub time: Option<DateTime<Utc>>,

    /// Focal length of the first band's lens.
    pub focal_length: Option<Length>,

    /// Focal plane resolution of the first band in pixels per millimeter.
    pub focal_plane_resolution: Option<f64>,
}

/// Build a [`Wgs84`] position from signed decimal degrees and meters.
pub fn position_from_degrees(
    latitude: f64,
    longitude: f64,
    altitude: f64,
) -> Result<Wgs84, Error> {
    Ok(Wgs84::builder()
        .latitude(Angle::new::<degree>(latitude))
        .ok_or_else(|| Error::InvalidInput(format!("latitude {latitude} is outside -90 to 90")))?
        .longitude(Angle::new::<degree>(longitude))
        .altitude(Length::new::<meter>(altitude))
        .build())
}

/// One synchronized multi-band acquisition.
///
/// Implementations own whatever decoded image buffers they need. Those buffers
/// are released by [`Capture::clear_image_data`] so a batch only ever holds the
/// pixels of the captures currently being processed.
pub trait Capture {
    type Stack: Stack;

    /// Unique identifier used to name output artifacts.
    fn id(&self) -> &str;

    /// Number of band images that make up this capture.
    fn band_count(&self) -> usize;

    /// Panel albedo per band, if this is a panel capture.
    ///
    /// A band without an albedo reading is `None`.
    fn panel_albedo(&self) -> Option<Vec<Option<f64>>>;

    /// Per-band downwelling irradiance derived from the panel `albedo`.
    fn panel_irradiance(&mut self, albedo: &[f64]) -> Result<Vec<f64>, Error>;

    fn metadata(&self) -> CaptureMetadata;

    /// Apply irradiance normalization and `alignment` to produce an aligned,
    /// cropped reflectance stack.
    ///
    /// An `irradiance` of `None` skips normalization entirely. A zero entry
    /// skips normalization for that band only.
    fn aligned_stack(
        &mut self,
        irradiance: Option<&[f64]>,
        alignment: &Alignment,
    ) -> Result<Self::Stack, Error>;

    /// Drop every decoded image buffer held by this capture.
    fn clear_image_data(&mut self);

    /// Returns the panel albedo only if every band has a reading.
    fn complete_albedo(&self) -> Option<Vec<f64>> {
        self.panel_albedo()?.into_iter().collect()
    }
}

/// An aligned reflectance stack ready to be persisted.
pub trait Stack {
    /// Write every band of the stack to a single TIFF at `path`.
    fn save_tiff(&self, path: &Path) -> Result<(), Error>;

    /// Render the `[red, green, blue]` bands as an RGB preview at `path`.
    fn save_rgb(&self, path: &Path, bands: [usize; 3]) -> Result<(), Error>;
}
