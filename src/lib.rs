// #![warn(missing_docs)]

//! Radiometric Calibration of Multispectral Drone Imagery
//!
//! A flight is calibrated in four stages. Panel captures of a reflectance
//! target give a per-band irradiance ([`irradiance`]). One representative
//! flight capture gives the band-to-band registration reused for the whole
//! flight ([`align`]). Every flight capture is then normalized, aligned and
//! written as a reflectance stack ([`batch`]). Finally a CSV ledger of each
//! capture's position, time and optics is written and stamped back onto the
//! stacks ([`ledger`], [`exiftool`]).
//!
//! The calibration stages only rely on the [`capture::Capture`] and
//! [`align::Aligner`] traits. [`raster`] implements them for band images on
//! disk.

#[allow(missing_docs)]
pub mod error;

pub mod align;
pub mod batch;
pub mod capture;
pub mod dms;
pub mod exiftool;
pub mod irradiance;
pub mod ledger;
pub mod pipeline;
pub mod raster;

pub use error::Error;
