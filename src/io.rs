//! Datacube and mask files
//!
//! FITS files (`.fits`, `.fit`, `.fts`) are the instrument format, NumPy
//! `.npy` files are an alternative. The format follows the file extension.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use strum_macros::{Display, EnumString};

use crate::cube::{CubeError, Datacube};

pub mod fits;
pub mod npy;

pub use fits::Header;

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("failed to open {1:?}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("failed to create {1:?}")]
    Create(#[source] std::io::Error, PathBuf),
    #[error("failed to read the array in {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("failed to write the array to {1:?}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("invalid FITS file {1:?}")]
    Fits(#[source] fitsio_pure::Error, PathBuf),
    #[error("expected a 3 dimensions array in {path:?}, found shape {shape:?}")]
    Dimensions { shape: Vec<u64>, path: PathBuf },
    #[error("Fortran ordered arrays are not supported ({0:?})")]
    FortranOrder(PathBuf),
    #[error("invalid datacube in {1:?}")]
    Cube(#[source] CubeError, PathBuf),
    #[error("unknown file format for {0:?}, expected a .fits or a .npy file")]
    Format(PathBuf),
}
type Result<T> = std::result::Result<T, IoError>;

/// File formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum Format {
    #[default]
    #[strum(to_string = "fits", serialize = "fit", serialize = "fts")]
    Fits,
    #[strum(to_string = "npy")]
    Npy,
}
impl Format {
    /// Format from the file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.to_lowercase().parse().ok())
            .ok_or_else(|| IoError::Format(path.to_path_buf()))
    }
    /// Appends the format extension to `stem`
    pub fn file_name(&self, stem: &str) -> String {
        format!("{stem}.{self}")
    }
}

/// Loads a datacube, and its header for FITS files
pub fn read_cube<P: AsRef<Path>>(path: P) -> Result<(Datacube, Option<Header>)> {
    let path = path.as_ref();
    match Format::from_path(path)? {
        Format::Fits => fits::read_cube(path).map(|(cube, header)| (cube, Some(header))),
        Format::Npy => npy::read_cube(path).map(|cube| (cube, None)),
    }
}
/// Writes a datacube, the header is only written to FITS files
pub fn write_cube<P: AsRef<Path>>(path: P, cube: &Datacube, header: Option<&Header>) -> Result<()> {
    let path = path.as_ref();
    match Format::from_path(path)? {
        Format::Fits => fits::write_cube(path, cube, header),
        Format::Npy => npy::write_cube(path, cube),
    }
}
/// Writes a 0/1 mask image
pub fn write_mask<P: AsRef<Path>>(path: P, mask: &Array2<u8>) -> Result<()> {
    let path = path.as_ref();
    match Format::from_path(path)? {
        Format::Fits => fits::write_mask(path, mask),
        Format::Npy => npy::write_mask(path, mask),
    }
}
