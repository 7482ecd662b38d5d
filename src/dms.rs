use std::fmt;

/// Which geodetic axis an angle measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl Hemisphere {
    /// Hemisphere of a signed decimal angle on `axis`.
    pub fn of(axis: Axis, negative: bool) -> Self {
        match (axis, negative) {
            (Axis::Latitude, false) => Self::North,
            (Axis::Latitude, true) => Self::South,
            (Axis::Longitude, false) => Self::East,
            (Axis::Longitude, true) => Self::West,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::North => "North",
            Self::South => "South",
            Self::East => "East",
            Self::West => "West",
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Self::North => 'N',
            Self::South => 'S',
            Self::East => 'E',
            Self::West => 'W',
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A sexagesimal angle.
///
/// Minutes and seconds are always non-negative. The sign of the decimal angle
/// is kept separately so that angles between -1 and 0 degrees keep their
/// hemisphere even though their whole degrees are zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dms {
    degrees: f64,
    minutes: f64,
    seconds: f64,
    negative: bool,
}

impl Dms {
    /// Split a signed decimal angle into degrees, minutes and seconds.
    pub fn from_decimal(decimal: f64) -> Self {
        let negative = decimal.is_sign_negative() && decimal != 0.;
        let total_seconds = decimal.abs() * 3600.;
        let (total_minutes, seconds) = divmod(total_seconds, 60.);
        let (degrees, minutes) = divmod(total_minutes, 60.);

        Self {
            degrees,
            minutes,
            seconds,
            negative,
        }
    }

    /// Whole degrees, negated for angles below zero.
    pub fn degrees(&self) -> f64 {
        match self.negative {
            true => -self.degrees,
            false => self.degrees,
        }
    }

    pub fn minutes(&self) -> f64 {
        self.minutes
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn hemisphere(&self, axis: Axis) -> Hemisphere {
        Hemisphere::of(axis, self.negative)
    }

    /// Reassemble the signed decimal angle.
    pub fn to_decimal(&self) -> f64 {
        let magnitude = self.degrees + self.minutes / 60. + self.seconds / 3600.;
        match self.negative {
            true => -magnitude,
            false => magnitude,
        }
    }

    /// Format as `D deg M' S.SS" H` for the hemisphere of `axis`.
    pub fn label(&self, axis: Axis) -> String {
        format!("{self} {}", self.hemisphere(axis).letter())
    }
}

impl fmt::Display for Dms {
    /// Formats the magnitude as `D deg M' S.SS"`.
    ///
    /// Seconds that round up to 60.00 carry into the minutes and degrees.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut degrees = self.degrees as u32;
        let mut minutes = self.minutes as u32;
        let mut centiseconds = (self.seconds * 100.).round() as u32;
        if centiseconds >= 6000 {
            centiseconds -= 6000;
            minutes += 1;
        }
        if minutes >= 60 {
            minutes -= 60;
            degrees += 1;
        }

        write!(
            f,
            "{degrees} deg {minutes}' {}.{:02}\"",
            centiseconds / 100,
            centiseconds % 100
        )
    }
}

fn divmod(value: f64, divisor: f64) -> (f64, f64) {
    ((value / divisor).floor(), value.rem_euclid(divisor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_relative_eq, relative_eq};
    use quickcheck::quickcheck;
    use rstest::rstest;

    #[rstest]
    #[case(-33.5361, 33., 32., 9.96, Hemisphere::South)]
    #[case(111.8504, 111., 51., 1.44, Hemisphere::North)]
    #[case(0.5, 0., 30., 0., Hemisphere::North)]
    #[case(-0.25, 0., 15., 0., Hemisphere::South)]
    fn splits_latitude(
        #[case] decimal: f64,
        #[case] degrees: f64,
        #[case] minutes: f64,
        #[case] seconds: f64,
        #[case] hemisphere: Hemisphere,
    ) {
        let dms = Dms::from_decimal(decimal);

        assert_eq!(dms.degrees().abs(), degrees);
        assert_eq!(dms.minutes(), minutes);
        assert_relative_eq!(dms.seconds(), seconds, epsilon = 1e-6);
        assert_eq!(dms.hemisphere(Axis::Latitude), hemisphere);
    }

    #[test]
    fn negative_degrees_are_negated() {
        assert_eq!(Dms::from_decimal(-33.5361).degrees(), -33.);
        assert_eq!(Dms::from_decimal(33.5361).degrees(), 33.);
    }

    #[test]
    fn longitude_hemisphere() {
        assert_eq!(
            Dms::from_decimal(-111.85).hemisphere(Axis::Longitude),
            Hemisphere::West
        );
        assert_eq!(
            Dms::from_decimal(8.0).hemisphere(Axis::Longitude),
            Hemisphere::East
        );
    }

    #[test]
    fn label_matches_exiftool_format() {
        assert_eq!(
            Dms::from_decimal(-33.5361).label(Axis::Latitude),
            "33 deg 32' 9.96\" S"
        );
        assert_eq!(
            Dms::from_decimal(-111.8504).label(Axis::Longitude),
            "111 deg 51' 1.44\" W"
        );
    }

    #[test]
    fn label_carries_rounded_seconds() {
        // 59.999 seconds rounds to 60.00 and must carry into the minutes.
        let decimal = 10. + 59. / 60. + 59.999 / 3600.;
        assert_eq!(
            Dms::from_decimal(decimal).label(Axis::Latitude),
            "11 deg 0' 0.00\" N"
        );
    }

    quickcheck! {
        fn decimal_roundtrip(seed: i32) -> bool {
            // Spread the seed over -180 to 180 degrees.
            let decimal = seed as f64 * 180. / i32::MAX as f64;
            let dms = Dms::from_decimal(decimal);

            relative_eq!(dms.to_decimal(), decimal, epsilon = 1e-9)
                && dms.minutes() < 60.
                && dms.seconds() < 60.
        }
    }
}
