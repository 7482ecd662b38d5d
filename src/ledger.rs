//! Per-capture metadata ledger.
//!
//! The ledger is a CSV file with one row per flight capture. Its columns are
//! named after the EXIF tags they are written back into, so the file can be
//! handed to `exiftool -csv` unchanged.

use crate::{
    batch::OutputLayout,
    capture::{Capture, CaptureMetadata},
    dms::{Axis, Dms},
    error::Error,
};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uom::si::{angle::degree, length::meter, length::millimeter};

/// Column names in ledger order.
pub const HEADER: [&str; 13] = [
    "SourceFile",
    "GPSDateStamp",
    "GPSTimeStamp",
    "GPSLatitude",
    "GpsLatitudeRef",
    "GPSLongitude",
    "GPSLongitudeRef",
    "GPSAltitude",
    "GPSAltitudeRef",
    "FocalLength",
    "XResolution",
    "YResolution",
    "ResolutionUnits",
];

const ALTITUDE_REF: &str = "Above Sea Level";
const RESOLUTION_UNIT: &str = "mm";

/// One ledger row.
///
/// Fields are kept as formatted strings. A field whose metadata was missing
/// is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerRecord {
    pub source_file: String,
    pub date: String,
    pub time: String,
    pub latitude: String,
    pub latitude_ref: String,
    pub longitude: String,
    pub longitude_ref: String,
    pub altitude: String,
    pub altitude_ref: String,
    pub focal_length: String,
    pub x_resolution: String,
    pub y_resolution: String,
    pub resolution_unit: String,
}

impl LedgerRecord {
    /// Format the metadata of the capture whose output is `source_file`.
    pub fn new(source_file: &Path, metadata: &CaptureMetadata) -> Self {
        let mut record = Self {
            source_file: source_file.display().to_string(),
            ..Default::default()
        };

        if let Some(time) = metadata.time {
            record.date = time.format("%Y:%m:%d").to_string();
            record.time = time.format("%H:%M:%S").to_string();
        }

        if let Some(position) = &metadata.position {
            let latitude = Dms::from_decimal(position.latitude().get::<degree>());
            let longitude = Dms::from_decimal(position.longitude().get::<degree>());

            record.latitude = latitude.label(Axis::Latitude);
            record.latitude_ref = latitude.hemisphere(Axis::Latitude).to_string();
            record.longitude = longitude.label(Axis::Longitude);
            record.longitude_ref = longitude.hemisphere(Axis::Longitude).to_string();
            record.altitude = format!(
                "{:.1} m {ALTITUDE_REF}",
                position.altitude().get::<meter>()
            );
            record.altitude_ref = ALTITUDE_REF.to_string();
        }

        if let Some(focal_length) = metadata.focal_length {
            record.focal_length = focal_length.get::<millimeter>().to_string();
        }

        if let Some(resolution) = metadata.focal_plane_resolution {
            record.x_resolution = resolution.to_string();
            record.y_resolution = resolution.to_string();
            record.resolution_unit = RESOLUTION_UNIT.to_string();
        }

        record
    }

    /// Returns `true` if the row is missing any geodetic field.
    pub fn is_missing_position(&self) -> bool {
        self.latitude.is_empty() || self.date.is_empty()
    }

    pub fn fields(&self) -> [&str; 13] {
        [
            &self.source_file,
            &self.date,
            &self.time,
            &self.latitude,
            &self.latitude_ref,
            &self.longitude,
            &self.longitude_ref,
            &self.altitude,
            &self.altitude_ref,
            &self.focal_length,
            &self.x_resolution,
            &self.y_resolution,
            &self.resolution_unit,
        ]
    }
}

/// Ordered ledger rows for a flight.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ledger {
    records: Vec<LedgerRecord>,
}

impl Ledger {
    /// Build a row for every capture, whether or not it was calibrated.
    ///
    /// Rows point at the computed stack path of each capture.
    pub fn build<C: Capture>(captures: &[C], layout: &OutputLayout) -> Self {
        let records = captures
            .iter()
            .map(|capture| {
                let record = LedgerRecord::new(&layout.stack_path(capture.id()), &capture.metadata());
                if record.is_missing_position() {
                    warn!("capture {} is missing position or time metadata", capture.id());
                }
                record
            })
            .collect();

        Self { records }
    }

    pub fn from_records(records: Vec<LedgerRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[LedgerRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the header and every row.
    pub fn to_csv(&self) -> Result<String, Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        self.write(&mut writer)?;
        let bytes = writer
            .into_inner()
            .map_err(|err| Error::Io(err.into_error()))?;
        String::from_utf8(bytes).map_err(|err| Error::InvalidInput(err.to_string()))
    }

    /// Write the ledger to `path`, replacing any previous ledger.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf, Error> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)?;
        self.write(&mut writer)?;
        writer.flush()?;
        debug!("wrote {} ledger rows to {}", self.len(), path.display());
        Ok(path.to_path_buf())
    }

    fn write<W: std::io::Write>(&self, writer: &mut csv::Writer<W>) -> Result<(), Error> {
        writer.write_record(HEADER)?;
        for record in &self.records {
            writer.write_record(record.fields())?;
        }
        Ok(())
    }
}
