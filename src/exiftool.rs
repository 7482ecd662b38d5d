//! ExifTool process boundary.
//!
//! Metadata is read with `exiftool -j -n` and parsed with `serde_json`. Tags
//! are written back from a ledger CSV with `exiftool -csv`. Arguments are
//! passed to the process as a list, never through a shell.

use crate::{capture::position_from_degrees, error::Error};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Deserialize;
use sguaba::systems::Wgs84;
use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info};
use uom::si::{f64::Length, length::millimeter};

/// Environment variable overriding the exiftool executable.
pub const PATH_VAR: &str = "exiftoolpath";

/// Tags requested when reading capture metadata.
const TAGS: [&str; 17] = [
    "GPSLatitude",
    "GPSLatitudeRef",
    "GPSLongitude",
    "GPSLongitudeRef",
    "GPSAltitude",
    "GPSAltitudeRef",
    "DateTimeOriginal",
    "SubSecTime",
    "FocalLength",
    "FocalPlaneXResolution",
    "FocalPlaneResolutionUnit",
    "Albedo",
    "CaptureId",
    "RigCameraIndex",
    "BandName",
    "ImageWidth",
    "ImageHeight",
];

/// Files passed to a single exiftool invocation.
const FILES_PER_CALL: usize = 512;

/// Stamps ledger fields onto output files.
pub trait TagWriter {
    /// Overwrite the tags of every file named in the `ledger` CSV's
    /// `SourceFile` column below `target`.
    fn write_tags(&self, ledger: &Path, target: &Path) -> Result<(), Error>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use the executable named by [`PATH_VAR`], or `exiftool` from `PATH`.
    pub fn from_env() -> Self {
        match env::var_os(PATH_VAR) {
            Some(program) if !program.is_empty() => Self::new(program),
            _ => Self::default(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, command: &mut Command) -> Result<std::process::Output, Error> {
        let output = command.output()?;
        if !output.status.success() {
            return Err(Error::ExternalTool {
                program: self.program.display().to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Read capture metadata from `files`.
    ///
    /// Records are returned in the order exiftool reports them, which is not
    /// necessarily the order of `files`.
    pub fn read_metadata(&self, files: &[PathBuf]) -> Result<Vec<ExifRecord>, Error> {
        let mut records = Vec::with_capacity(files.len());
        for chunk in files.chunks(FILES_PER_CALL) {
            let output = self.run(
                Command::new(&self.program)
                    .args(["-j", "-n"])
                    .args(TAGS.iter().map(|tag| format!("-{tag}")))
                    .args(chunk),
            )?;

            // No matching files produces no output at all.
            if output.stdout.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            records.extend(serde_json::from_slice::<Vec<ExifRecord>>(&output.stdout)?);
        }

        debug!("read metadata of {} files", records.len());
        Ok(records)
    }
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new("exiftool")
    }
}

impl TagWriter for ExifTool {
    fn write_tags(&self, ledger: &Path, target: &Path) -> Result<(), Error> {
        let mut csv_arg = OsString::from("-csv=");
        csv_arg.push(ledger);

        info!(
            "writing tags from {} into {}",
            ledger.display(),
            target.display()
        );
        self.run(
            Command::new(&self.program)
                .arg(csv_arg)
                .arg("-overwrite_original")
                .arg(target),
        )?;
        Ok(())
    }
}

/// Metadata of one band image as reported by `exiftool -j -n`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ExifRecord {
    pub source_file: PathBuf,

    #[serde(rename = "GPSLatitude")]
    pub gps_latitude: Option<f64>,
    #[serde(rename = "GPSLatitudeRef")]
    pub gps_latitude_ref: Option<String>,
    #[serde(rename = "GPSLongitude")]
    pub gps_longitude: Option<f64>,
    #[serde(rename = "GPSLongitudeRef")]
    pub gps_longitude_ref: Option<String>,
    #[serde(rename = "GPSAltitude")]
    pub gps_altitude: Option<f64>,
    #[serde(rename = "GPSAltitudeRef")]
    pub gps_altitude_ref: Option<u8>,

    pub date_time_original: Option<String>,
    pub sub_sec_time: Option<serde_json::Value>,

    pub focal_length: Option<f64>,
    pub focal_plane_x_resolution: Option<f64>,
    pub focal_plane_resolution_unit: Option<u8>,

    pub albedo: Option<f64>,
    pub capture_id: Option<String>,
    pub rig_camera_index: Option<u32>,
    pub band_name: Option<String>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
}

impl ExifRecord {
    /// Signed position of the capture.
    ///
    /// Unsigned coordinates are negated for southern and western references.
    pub fn position(&self) -> Option<Wgs84> {
        let latitude = signed(self.gps_latitude?, self.gps_latitude_ref.as_deref(), "S");
        let longitude = signed(self.gps_longitude?, self.gps_longitude_ref.as_deref(), "W");
        let altitude = match self.gps_altitude_ref {
            Some(1) => -self.gps_altitude.unwrap_or(0.).abs(),
            _ => self.gps_altitude.unwrap_or(0.),
        };

        position_from_degrees(latitude, longitude, altitude).ok()
    }

    /// Acquisition time, read as UTC.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        let stamp = self.date_time_original.as_deref()?;
        let time = NaiveDateTime::parse_from_str(stamp.trim(), "%Y:%m:%d %H:%M:%S")
            .ok()?
            .and_utc();

        let subsec = match &self.sub_sec_time {
            Some(serde_json::Value::String(digits)) => digits.trim().to_string(),
            Some(serde_json::Value::Number(digits)) => digits.to_string(),
            _ => return Some(time),
        };
        let fraction: f64 = format!("0.{subsec}").parse().ok()?;

        Some(time + TimeDelta::microseconds((fraction * 1e6).round() as i64))
    }

    /// Recorded image dimensions, if both are present.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.image_width?, self.image_height?))
    }

    pub fn focal_length(&self) -> Option<Length> {
        self.focal_length.map(Length::new::<millimeter>)
    }

    /// Focal plane resolution in pixels per millimeter.
    pub fn focal_plane_resolution(&self) -> Option<f64> {
        let resolution = self.focal_plane_x_resolution?;
        match self.focal_plane_resolution_unit {
            // Inches.
            Some(2) => Some(resolution / 25.4),
            // Centimeters.
            Some(3) => Some(resolution / 10.),
            _ => Some(resolution),
        }
    }
}

fn signed(value: f64, reference: Option<&str>, negative_ref: &str) -> f64 {
    match reference {
        Some(r) if r.eq_ignore_ascii_case(negative_ref) && value > 0. => -value,
        _ => value,
    }
}
