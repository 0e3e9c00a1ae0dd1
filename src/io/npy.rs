//! NumPy `.npy` files
//!
//! Cubes are read from C-ordered 3-D arrays of `f64` or `f32` and written as
//! `f64` arrays; masks are written as `u8` arrays.

use std::{fs::File, io::BufWriter, path::Path, time::Instant};

use ndarray::Array2;
use npyz::{AutoSerialize, NpyFile, Order, WriteOptions, WriterBuilder};

use super::{IoError, Result};
use crate::cube::Datacube;

/// Loads a datacube from a `.npy` file
pub fn read_cube<P: AsRef<Path>>(path: P) -> Result<Datacube> {
    let path = path.as_ref();
    log::info!("Loading {:?}...", path);
    let now = Instant::now();
    let bytes = std::fs::read(path).map_err(|e| IoError::Open(e, path.to_path_buf()))?;
    let npy = NpyFile::new(&bytes[..]).map_err(|e| IoError::Read(e, path.to_path_buf()))?;
    let shape = npy.shape().to_vec();
    let &[n_layer, n_row, n_col] = shape.as_slice() else {
        return Err(IoError::Dimensions {
            shape: shape.clone(),
            path: path.to_path_buf(),
        });
    };
    if matches!(npy.order(), Order::Fortran) {
        return Err(IoError::FortranOrder(path.to_path_buf()));
    }
    let data: Vec<f64> = match npy.into_vec::<f64>() {
        Ok(data) => data,
        Err(_) => NpyFile::new(&bytes[..])
            .and_then(|npy| npy.into_vec::<f32>())
            .map_err(|e| IoError::Read(e, path.to_path_buf()))?
            .into_iter()
            .map(f64::from)
            .collect(),
    };
    let cube = Datacube::from_shape_vec((n_layer as usize, n_row as usize, n_col as usize), data)
        .map_err(|e| IoError::Cube(e, path.to_path_buf()))?;
    log::info!("... loaded in {:}ms", now.elapsed().as_millis());
    Ok(cube)
}

fn write_npy<T, I>(path: &Path, shape: &[u64], data: I) -> Result<()>
where
    T: AutoSerialize,
    I: IntoIterator<Item = T>,
{
    let file = File::create(path).map_err(|e| IoError::Create(e, path.to_path_buf()))?;
    let write_err = |e: std::io::Error| IoError::Write(e, path.to_path_buf());
    let mut writer = WriteOptions::<T>::new()
        .default_dtype()
        .shape(shape)
        .writer(BufWriter::new(file))
        .begin_nd()
        .map_err(write_err)?;
    for value in data {
        writer.push(&value).map_err(write_err)?;
    }
    writer.finish().map_err(write_err)?;
    log::info!("{:?} written", path);
    Ok(())
}

/// Writes a datacube to a `.npy` file
pub fn write_cube<P: AsRef<Path>>(path: P, cube: &Datacube) -> Result<()> {
    let shape = cube.dims().map(|n| n as u64);
    write_npy(path.as_ref(), &shape, cube.iter().copied())
}
/// Writes a 0/1 mask image to a `.npy` file
pub fn write_mask<P: AsRef<Path>>(path: P, mask: &Array2<u8>) -> Result<()> {
    let shape: Vec<u64> = mask.shape().iter().map(|&n| n as u64).collect();
    write_npy(path.as_ref(), &shape, mask.iter().copied())
}
