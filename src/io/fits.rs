//! FITS files
//!
//! Cubes are read from the primary HDU, any BITPIX, with BSCALE/BZERO applied
//! and BLANK pixels set to NaN.
//! The non-structural cards of the primary header are kept in a [`Header`]
//! and copied into the cubes written from them.

use std::{ops::Deref, path::Path, time::Instant};

use fitsio_pure::{
    hdu::parse_fits,
    header::{format_card, format_end_card, Card},
    image::{image_dimensions, read_image_physical, serialize_image_f64, serialize_image_u8},
    primary::build_primary_header,
    BLOCK_SIZE,
};
use ndarray::Array2;

use super::{IoError, Result};
use crate::cube::Datacube;

/// Keywords that describe the data layout and are rewritten with the data
const STRUCTURAL: [&str; 9] = [
    "SIMPLE", "BITPIX", "EXTEND", "BSCALE", "BZERO", "BLANK", "CHECKSUM", "DATASUM", "END",
];

/// Primary header cards carried over from an input cube
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header(Vec<Card>);
impl Deref for Header {
    type Target = [Card];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl Header {
    fn from_cards(cards: &[Card]) -> Self {
        Self(
            cards
                .iter()
                .filter(|card| {
                    let keyword = card.keyword_str();
                    !(STRUCTURAL.contains(&keyword) || keyword.starts_with("NAXIS"))
                })
                .cloned()
                .collect(),
        )
    }
    /// Value of a string keyword
    pub fn text(&self, keyword: &str) -> Option<&str> {
        self.iter()
            .find(|card| card.keyword_str() == keyword)
            .and_then(|card| match &card.value {
                Some(fitsio_pure::value::Value::String(value)) => Some(value.trim()),
                _ => None,
            })
    }
}

/// Loads a datacube and its header from the primary HDU of a FITS file
pub fn read_cube<P: AsRef<Path>>(path: P) -> Result<(Datacube, Header)> {
    let path = path.as_ref();
    log::info!("Loading {:?}...", path);
    let now = Instant::now();
    let bytes = std::fs::read(path).map_err(|e| IoError::Open(e, path.to_path_buf()))?;
    let fits_err = |e: fitsio_pure::Error| IoError::Fits(e, path.to_path_buf());
    let fits = parse_fits(&bytes).map_err(fits_err)?;
    let hdu = fits
        .hdus
        .first()
        .ok_or_else(|| IoError::Dimensions {
            shape: vec![],
            path: path.to_path_buf(),
        })?;
    let naxes = image_dimensions(hdu).map_err(fits_err)?;
    // NAXIS1 is the fastest axis
    let &[n_col, n_row, n_layer] = naxes.as_slice() else {
        return Err(IoError::Dimensions {
            shape: naxes.iter().rev().map(|&n| n as u64).collect(),
            path: path.to_path_buf(),
        });
    };
    let data = read_image_physical(&bytes, hdu).map_err(fits_err)?;
    let cube = Datacube::from_shape_vec((n_layer, n_row, n_col), data)
        .map_err(|e| IoError::Cube(e, path.to_path_buf()))?;
    log::info!("... loaded in {:}ms", now.elapsed().as_millis());
    Ok((cube, Header::from_cards(&hdu.cards)))
}

fn write_fits(
    path: &Path,
    bitpix: i64,
    naxes: &[usize],
    header: Option<&Header>,
    data: Vec<u8>,
) -> Result<()> {
    let mut cards =
        build_primary_header(bitpix, naxes).map_err(|e| IoError::Fits(e, path.to_path_buf()))?;
    if let Some(header) = header {
        cards.extend(header.iter().cloned());
    }
    let mut bytes: Vec<u8> = cards
        .iter()
        .flat_map(format_card)
        .chain(format_end_card())
        .collect();
    bytes.resize(bytes.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, b' ');
    bytes.extend(data);
    std::fs::write(path, bytes).map_err(|e| IoError::Write(e, path.to_path_buf()))?;
    log::info!("{:?} written", path);
    Ok(())
}

/// Writes a datacube to the primary HDU of a FITS file, as 64 bits floats
pub fn write_cube<P: AsRef<Path>>(path: P, cube: &Datacube, header: Option<&Header>) -> Result<()> {
    let [n_layer, n_row, n_col] = cube.dims();
    let data: Vec<f64> = cube.iter().copied().collect();
    write_fits(
        path.as_ref(),
        -64,
        &[n_col, n_row, n_layer],
        header,
        serialize_image_f64(&data),
    )
}
/// Writes a 0/1 mask image to the primary HDU of a FITS file, as bytes
pub fn write_mask<P: AsRef<Path>>(path: P, mask: &Array2<u8>) -> Result<()> {
    let (n_row, n_col) = mask.dim();
    let data: Vec<u8> = mask.iter().copied().collect();
    write_fits(
        path.as_ref(),
        8,
        &[n_col, n_row],
        None,
        serialize_image_u8(&data),
    )
}
