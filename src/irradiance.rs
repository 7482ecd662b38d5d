use crate::capture::Capture;
use tracing::{debug, warn};

/// Per-band downwelling irradiance derived from panel captures.
#[derive(Clone, Debug, PartialEq)]
pub struct Irradiance {
    bands: Vec<f64>,
}

impl Irradiance {
    pub fn new(bands: Vec<f64>) -> Self {
        Self { bands }
    }

    /// Element-wise arithmetic mean of `readings` in band order.
    ///
    /// Readings whose band count differs from the first reading are skipped.
    /// Returns `None` if there are no readings to average.
    pub fn mean<I>(readings: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vec<f64>>,
    {
        let mut readings = readings.into_iter();
        let mut sums = readings.next()?;
        let mut count = 1.;

        for reading in readings {
            if reading.len() != sums.len() {
                warn!(
                    "ignoring irradiance reading with {} bands, expected {}",
                    reading.len(),
                    sums.len()
                );
                continue;
            }

            sums.iter_mut()
                .zip(reading)
                .for_each(|(sum, value)| *sum += value);
            count += 1.;
        }

        Some(Self::new(sums.into_iter().map(|sum| sum / count).collect()))
    }

    /// Average the irradiance of every panel capture that has an albedo
    /// reading for all of its bands.
    ///
    /// Panels with a missing band are excluded. Returns `None` when no panel
    /// contributes, in which case calibration must run without irradiance
    /// normalization.
    pub fn from_panels<C: Capture>(panels: &mut [C]) -> Option<Self> {
        let mut readings = Vec::with_capacity(panels.len());
        for panel in panels.iter_mut() {
            let Some(albedo) = panel.complete_albedo() else {
                debug!("panel {} has incomplete albedo, skipping", panel.id());
                continue;
            };

            match panel.panel_irradiance(&albedo) {
                Ok(irradiance) => readings.push(irradiance),
                Err(err) => warn!("panel {}: failed to derive irradiance: {err}", panel.id()),
            }

            panel.clear_image_data();
        }

        debug!("{} of {} panels contribute irradiance", readings.len(), panels.len());
        Self::mean(readings)
    }

    pub fn as_slice(&self) -> &[f64] {
        self.bands.as_slice()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Irradiance with a trailing zero sentinel.
    ///
    /// The sentinel covers a band that has no panel reading (e.g. a thermal
    /// band), which is left unnormalized.
    pub fn augmented(&self) -> Vec<f64> {
        let mut bands = self.bands.clone();
        bands.push(0.);
        bands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::relative_eq;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[test]
    fn mean_of_nothing_is_unset() {
        assert_eq!(Irradiance::mean(Vec::<Vec<f64>>::new()), None);
    }

    #[test]
    fn mean_of_two_panels() {
        let irradiance = Irradiance::mean(vec![
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![3.0, 4.0, 5.0, 6.0, 7.0],
        ])
        .expect("two readings");

        assert_eq!(irradiance.as_slice(), &[2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn mean_skips_mismatched_band_count() {
        let irradiance =
            Irradiance::mean(vec![vec![1.0, 1.0], vec![9.0], vec![3.0, 5.0]]).expect("readings");

        assert_eq!(irradiance.as_slice(), &[2.0, 3.0]);
    }

    #[test]
    fn augmented_appends_zero() {
        let irradiance = Irradiance::new(vec![0.5, 0.25]);
        assert_eq!(irradiance.augmented(), vec![0.5, 0.25, 0.0]);
        assert_eq!(irradiance.len(), 2);
    }

    #[quickcheck]
    fn mean_ignores_order(seeds: Vec<(u16, u16, u16)>, shift: usize) -> TestResult {
        if seeds.is_empty() {
            return TestResult::discard();
        }

        let readings: Vec<Vec<f64>> = seeds
            .iter()
            .map(|(a, b, c)| vec![*a as f64 / 100., *b as f64 / 100., *c as f64 / 100.])
            .collect();
        let mut rotated = readings.clone();
        rotated.rotate_left(shift % readings.len());
        rotated.reverse();

        let forward = Irradiance::mean(readings).expect("non-empty");
        let shuffled = Irradiance::mean(rotated).expect("non-empty");

        TestResult::from_bool(
            forward.len() == 3
                && forward
                    .as_slice()
                    .iter()
                    .zip(shuffled.as_slice())
                    .all(|(a, b)| relative_eq!(*a, *b, epsilon = 1e-9)),
        )
    }
}
