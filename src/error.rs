use crate::align::WarpMode;
use std::{path::PathBuf, process::ExitStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{program} exited with {status}: {stderr}")]
    ExternalTool {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("no captures found in {}", .0.display())]
    NoCaptures(PathBuf),

    #[error("reference band {band} is out of range for a capture with {bands} bands")]
    ReferenceBandOutOfRange { band: usize, bands: usize },

    #[error("warp mode {0} is not supported by this aligner")]
    UnsupportedWarpMode(WarpMode),

    #[error("invalid warp matrices on line {line}: {reason}")]
    InvalidWarpMatrices { line: usize, reason: String },

    #[error("capture {id}: expected {expected} warp matrices but got {found}")]
    WarpCountMismatch {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("capture {id} has no image data for band {band}")]
    MissingImageData { id: String, band: usize },

    #[error("capture {id}: band {band} is {found:?} but expected {expected:?}")]
    DimensionMismatch {
        id: String,
        band: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("capture {id}: aligned bands do not overlap")]
    EmptyCrop { id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
