use super::band::Band;
use crate::{
    align::{Alignment, WarpMatrix},
    capture::Stack,
    error::Error,
};
use image::RgbImage;
use rayon::prelude::*;
use std::{
    f64::consts::PI,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};
use tiff::encoder::{TiffEncoder, colortype};
use tracing::debug;

/// Lower and upper quantiles clipped by the preview stretch.
const STRETCH: (f64, f64) = (0.005, 0.995);

/// Upper bound on the pixels sampled to find the stretch quantiles.
const STRETCH_SAMPLES: usize = 1 << 16;

/// Aligned, cropped reflectance bands sharing one pixel grid.
#[derive(Clone, Debug, PartialEq)]
pub struct ReflectanceStack {
    width: u32,
    height: u32,

    /// Source band index and row major pixels of each layer.
    layers: Vec<(usize, Vec<f32>)>,
}

impl ReflectanceStack {
    pub fn new(width: u32, height: u32, layers: Vec<(usize, Vec<f32>)>) -> Result<Self, Error> {
        let len = width as usize * height as usize;
        if let Some((band, pixels)) = layers.iter().find(|(_, pixels)| pixels.len() != len) {
            return Err(Error::InvalidInput(format!(
                "layer for band {band} has {} pixels but the stack is {width}x{height}",
                pixels.len()
            )));
        }

        Ok(Self {
            width,
            height,
            layers,
        })
    }

    /// Normalize and resample the aligned `bands` of capture `id` onto the
    /// reference band's grid, cropped to where every aligned band has data.
    pub fn from_bands(
        id: &str,
        bands: &[Band],
        irradiance: Option<&[f64]>,
        alignment: &Alignment,
    ) -> Result<Self, Error> {
        let missing = |band| Error::MissingImageData {
            id: id.to_string(),
            band,
        };

        let reference = bands
            .get(alignment.reference_band())
            .ok_or_else(|| missing(alignment.reference_band()))?;

        let mut crop = Crop::full(reference.dimensions());
        let mut selected = Vec::new();
        for (index, warp) in alignment.matrices().iter().enumerate() {
            if !alignment.is_aligned(index) {
                continue;
            }
            let band = bands.get(index).ok_or_else(|| missing(index))?;
            let extent = Crop::of(band, warp).ok_or_else(|| {
                Error::InvalidInput(format!("warp matrix of band {index} is singular"))
            })?;
            crop = crop.intersect(&extent);
            selected.push((index, band, warp));
        }

        if selected.is_empty() {
            return Err(Error::InvalidInput(format!("capture {id} has no aligned bands")));
        }
        let (x0, y0, width, height) = crop.pixels().ok_or_else(|| Error::EmptyCrop {
            id: id.to_string(),
        })?;
        debug!("capture {id}: cropping to {width}x{height} at ({x0}, {y0})");

        let layers = selected
            .par_iter()
            .map(|(index, band, warp)| {
                let gain = irradiance
                    .and_then(|irradiance| irradiance.get(*index))
                    .filter(|irradiance| **irradiance != 0.)
                    .map_or(1., |irradiance| PI / irradiance);
                let pixels = resample(band, warp, (x0, y0), (width, height))
                    .map(|radiance| (radiance as f64 * gain) as f32)
                    .collect();
                (*index, pixels)
            })
            .collect();

        Self::new(width, height, layers)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Source band indices in layer order.
    pub fn bands(&self) -> Vec<usize> {
        self.layers.iter().map(|(band, _)| *band).collect()
    }

    pub fn layer(&self, band: usize) -> Option<&[f32]> {
        self.layers
            .iter()
            .find(|(index, _)| *index == band)
            .map(|(_, pixels)| pixels.as_slice())
    }
}

impl Stack for ReflectanceStack {
    fn save_tiff(&self, path: &Path) -> Result<(), Error> {
        let mut file = BufWriter::new(File::create(path)?);
        {
            let mut encoder = TiffEncoder::new(&mut file)?;
            for (_, pixels) in &self.layers {
                encoder.write_image::<colortype::Gray32Float>(self.width, self.height, pixels)?;
            }
        }
        file.flush()?;
        Ok(())
    }

    fn save_rgb(&self, path: &Path, bands: [usize; 3]) -> Result<(), Error> {
        let channels = bands
            .iter()
            .map(|band| {
                self.layer(*band).ok_or_else(|| {
                    Error::InvalidInput(format!("band {band} is not part of the stack"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (low, high) = stretch_bounds(&channels);
        let scale = 255. / (high - low);
        let rgb = (0..self.width as usize * self.height as usize)
            .flat_map(|i| channels.iter().map(move |channel| channel[i]))
            .map(|value| ((value - low) * scale).clamp(0., 255.) as u8)
            .collect();

        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| Error::InvalidInput("preview buffer does not fit the stack".into()))?
            .save(path)?;
        Ok(())
    }
}

/// Sample `band` through `warp` over the reference window at `origin`.
fn resample<'a>(
    band: &'a Band,
    warp: &'a WarpMatrix,
    origin: (u32, u32),
    (width, height): (u32, u32),
) -> impl Iterator<Item = f32> + 'a {
    let max_x = band.width().saturating_sub(1) as f64;
    let max_y = band.height().saturating_sub(1) as f64;

    (0..height)
        .flat_map(move |y| (0..width).map(move |x| (x, y)))
        .map(move |(x, y)| {
            warp.apply((origin.0 + x) as f64, (origin.1 + y) as f64)
                .and_then(|(u, v)| band.sample(u.clamp(0., max_x), v.clamp(0., max_y)))
                .unwrap_or(0.)
        })
}

/// Quantile bounds shared by every preview channel.
fn stretch_bounds(channels: &[&[f32]]) -> (f32, f32) {
    let total: usize = channels.iter().map(|channel| channel.len()).sum();
    let step = (total / STRETCH_SAMPLES).max(1);
    let mut samples: Vec<f32> = channels
        .iter()
        .flat_map(|channel| channel.iter().step_by(step))
        .copied()
        .filter(|value| value.is_finite())
        .collect();
    if samples.is_empty() {
        return (0., 1.);
    }
    samples.sort_by(f32::total_cmp);

    let quantile = |q: f64| samples[((samples.len() - 1) as f64 * q).round() as usize];
    let (low, high) = (quantile(STRETCH.0), quantile(STRETCH.1));
    match high > low {
        true => (low, high),
        false => (low, low + 1.),
    }
}

/// Region of the reference grid, in pixel coordinates, inside a band.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Crop {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl Crop {
    fn full((width, height): (u32, u32)) -> Self {
        Self {
            left: 0.,
            top: 0.,
            right: width.saturating_sub(1) as f64,
            bottom: height.saturating_sub(1) as f64,
        }
    }

    /// Reference pixels that `warp` maps inside `band`.
    fn of(band: &Band, warp: &WarpMatrix) -> Option<Self> {
        let inverse = warp.inverse()?;
        let w = band.width().saturating_sub(1) as f64;
        let h = band.height().saturating_sub(1) as f64;

        let top_left = inverse.apply(0., 0.)?;
        let top_right = inverse.apply(w, 0.)?;
        let bottom_left = inverse.apply(0., h)?;
        let bottom_right = inverse.apply(w, h)?;

        Some(Self {
            left: top_left.0.max(bottom_left.0),
            top: top_left.1.max(top_right.1),
            right: top_right.0.min(bottom_right.0),
            bottom: bottom_left.1.min(bottom_right.1),
        })
    }

    fn intersect(&self, other: &Self) -> Self {
        Self {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        }
    }

    /// Whole pixel window as `(x, y, width, height)`.
    fn pixels(&self) -> Option<(u32, u32, u32, u32)> {
        const TOLERANCE: f64 = 1e-6;

        let x0 = (self.left - TOLERANCE).ceil().max(0.);
        let y0 = (self.top - TOLERANCE).ceil().max(0.);
        let x1 = (self.right + TOLERANCE).floor();
        let y1 = (self.bottom + TOLERANCE).floor();
        if x1 < x0 || y1 < y0 {
            return None;
        }

        Some((
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32 + 1,
            (y1 - y0) as u32 + 1,
        ))
    }
}
