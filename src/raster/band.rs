use crate::error::Error;
use std::path::Path;

/// A single-channel band image with values normalized to full scale.
#[derive(Clone, Debug, PartialEq)]
pub struct Band {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
}

impl Band {
    /// Create a band from row major `pixels`.
    pub fn new(width: u32, height: u32, pixels: Vec<f32>) -> Result<Self, Error> {
        if pixels.len() != width as usize * height as usize {
            return Err(Error::InvalidInput(format!(
                "{} pixels do not fill a {width}x{height} band",
                pixels.len()
            )));
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decode the band image at `path`.
    ///
    /// Integer samples are scaled so that full scale maps to 1.0.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let image = image::ImageReader::open(path)?.decode()?.to_luma32f();
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_slice(&self) -> &[f32] {
        self.pixels.as_slice()
    }

    /// Returns the pixel at `(x, y)` if it is within the band.
    pub fn get(&self, x: i64, y: i64) -> Option<f32> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(self.pixels[y as usize * self.width as usize + x as usize])
    }

    /// Bilinear sample at a sub-pixel location.
    ///
    /// Returns `None` outside the band.
    pub fn sample(&self, x: f64, y: f64) -> Option<f32> {
        let max_x = self.width.checked_sub(1)? as f64;
        let max_y = self.height.checked_sub(1)? as f64;
        if !(0.0..=max_x).contains(&x) || !(0.0..=max_y).contains(&y) {
            return None;
        }

        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = ((x - x0) as f32, (y - y0) as f32);
        let (x0, y0) = (x0 as i64, y0 as i64);
        let x1 = (x0 + 1).min(max_x as i64);
        let y1 = (y0 + 1).min(max_y as i64);

        let top = self.get(x0, y0)? * (1. - fx) + self.get(x1, y0)? * fx;
        let bottom = self.get(x0, y1)? * (1. - fx) + self.get(x1, y1)? * fx;
        Some(top * (1. - fy) + bottom * fy)
    }

    /// Halve the resolution by averaging 2x2 blocks.
    pub fn downsample(&self) -> Self {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x as i64 * 2, y as i64 * 2)))
            .map(|(x, y)| {
                let block = [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)];
                let (sum, count) = block
                    .iter()
                    .filter_map(|(x, y)| self.get(*x, *y))
                    .fold((0., 0.), |(sum, count), value| (sum + value, count + 1.));
                sum / count
            })
            .collect();

        Self {
            width,
            height,
            pixels,
        }
    }

    /// Resample to `width` x `height` with bilinear interpolation.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if (width, height) == self.dimensions() {
            return self.clone();
        }

        let sx = self.width.saturating_sub(1) as f64 / width.saturating_sub(1).max(1) as f64;
        let sy = self.height.saturating_sub(1) as f64 / height.saturating_sub(1).max(1) as f64;
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| self.sample(x as f64 * sx, y as f64 * sy).unwrap_or(0.))
            .collect();

        Self {
            width,
            height,
            pixels,
        }
    }

    /// Shift to zero mean and unit variance.
    ///
    /// A constant band is only shifted to zero mean.
    pub fn standardized(&self) -> Self {
        let n = self.pixels.len().max(1) as f64;
        let mean = self.pixels.iter().map(|p| *p as f64).sum::<f64>() / n;
        let variance = self
            .pixels
            .iter()
            .map(|p| (*p as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let scale = match variance.sqrt() {
            std if std > f64::EPSILON => 1. / std,
            _ => 1.,
        };

        Self {
            width: self.width,
            height: self.height,
            pixels: self
                .pixels
                .iter()
                .map(|p| ((*p as f64 - mean) * scale) as f32)
                .collect(),
        }
    }

    /// Mean of the centered window covering `fraction` of each dimension.
    pub fn window_mean(&self, fraction: f64) -> f64 {
        let fraction = fraction.clamp(0., 1.);
        let w = ((self.width as f64 * fraction).round() as u32).max(1);
        let h = ((self.height as f64 * fraction).round() as u32).max(1);
        let x0 = (self.width.saturating_sub(w) / 2) as i64;
        let y0 = (self.height.saturating_sub(h) / 2) as i64;

        let (sum, count) = (y0..y0 + h as i64)
            .flat_map(|y| (x0..x0 + w as i64).map(move |x| (x, y)))
            .filter_map(|(x, y)| self.get(x, y))
            .fold((0., 0usize), |(sum, count), value| (sum + value as f64, count + 1));

        match count {
            0 => 0.,
            _ => sum / count as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(width: u32, height: u32) -> Band {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x + y * width) as f32))
            .collect();
        Band::new(width, height, pixels).expect("sized")
    }

    #[test]
    fn rejects_wrong_size() {
        assert!(Band::new(2, 2, vec![0.; 3]).is_err());
    }

    #[test]
    fn bilinear_between_pixels() {
        let band = ramp(4, 4);
        assert_relative_eq!(band.sample(1.5, 0.).expect("inside"), 1.5);
        assert_relative_eq!(band.sample(0., 0.5).expect("inside"), 2.);
        assert_relative_eq!(band.sample(3., 3.).expect("inside"), 15.);
        assert_eq!(band.sample(3.01, 0.), None);
        assert_eq!(band.sample(-0.5, 0.), None);
    }

    #[test]
    fn downsample_averages_blocks() {
        let band = ramp(4, 2).downsample();
        assert_eq!(band.dimensions(), (2, 1));
        assert_eq!(band.as_slice(), &[2.5, 4.5]);
    }

    #[test]
    fn window_mean_of_center() {
        let mut pixels = vec![0.; 16];
        for i in [5, 6, 9, 10] {
            pixels[i] = 1.;
        }
        let band = Band::new(4, 4, pixels).expect("sized");

        assert_relative_eq!(band.window_mean(0.5), 1.);
        assert_relative_eq!(band.window_mean(1.), 0.25);
    }

    #[test]
    fn standardized_has_unit_variance() {
        let band = ramp(8, 8).standardized();
        let n = band.as_slice().len() as f64;
        let mean = band.as_slice().iter().map(|p| *p as f64).sum::<f64>() / n;
        let variance = band.as_slice().iter().map(|p| (*p as f64).powi(2)).sum::<f64>() / n;

        assert_relative_eq!(mean, 0., epsilon = 1e-5);
        assert_relative_eq!(variance, 1., epsilon = 1e-5);
    }
}
