//! IFU datacube
//!
//! A [`Datacube`] is a 3-D array of intensities indexed by
//! (wavelength layer, spatial row, spatial column).

use std::ops::Deref;

use ndarray::{s, Array2, Array3, ArrayView2, Axis, Zip};

use crate::stats;

#[derive(thiserror::Error, Debug)]
pub enum CubeError {
    #[error("a datacube cannot have an empty axis, found shape {0:?}")]
    Empty([usize; 3]),
    #[error("failed to shape the datacube samples")]
    Shape(#[from] ndarray::ShapeError),
}
type Result<T> = std::result::Result<T, CubeError>;

/// Spectral datacube
///
/// The cube is never empty along any axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Datacube(Array3<f64>);
impl Deref for Datacube {
    type Target = Array3<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl From<Datacube> for Array3<f64> {
    fn from(cube: Datacube) -> Self {
        cube.0
    }
}
impl TryFrom<Array3<f64>> for Datacube {
    type Error = CubeError;

    fn try_from(data: Array3<f64>) -> Result<Self> {
        Self::new(data)
    }
}
impl Datacube {
    pub fn new(data: Array3<f64>) -> Result<Self> {
        let (n_layer, n_row, n_col) = data.dim();
        if n_layer * n_row * n_col == 0 {
            return Err(CubeError::Empty([n_layer, n_row, n_col]));
        }
        Ok(Self(data))
    }
    /// Creates a cube from samples in (layer, row, column) order
    pub fn from_shape_vec(shape: (usize, usize, usize), data: Vec<f64>) -> Result<Self> {
        Self::new(Array3::from_shape_vec(shape, data)?)
    }
    /// Stacks the same image `n_layer` times
    pub fn from_image(image: ArrayView2<'_, f64>, n_layer: usize) -> Result<Self> {
        let (n_row, n_col) = image.dim();
        Self::new(Array3::from_shape_fn(
            (n_layer, n_row, n_col),
            |(_, row, col)| image[[row, col]],
        ))
    }
    /// Wraps arrays derived from an existing cube, which are already known to be non-empty
    pub(crate) fn wrap(data: Array3<f64>) -> Self {
        Self(data)
    }
    pub fn into_inner(self) -> Array3<f64> {
        self.0
    }
    /// Number of wavelength layers
    pub fn n_layer(&self) -> usize {
        self.0.len_of(Axis(0))
    }
    /// (rows, columns) of a layer
    pub fn spatial_shape(&self) -> (usize, usize) {
        let (_, n_row, n_col) = self.0.dim();
        (n_row, n_col)
    }
    pub fn dims(&self) -> [usize; 3] {
        let (n_layer, n_row, n_col) = self.0.dim();
        [n_layer, n_row, n_col]
    }
    pub fn layer(&self, index: usize) -> ArrayView2<'_, f64> {
        self.0.index_axis(Axis(0), index)
    }
    /// Returns a copy of the cube without `n_trim` layers at both ends
    ///
    /// `None` is returned if no layer would be left.
    pub fn trimmed(&self, n_trim: usize) -> Option<Datacube> {
        let n_layer = self.n_layer();
        (n_trim.checked_mul(2)? < n_layer)
            .then(|| Self(self.0.slice(s![n_trim..n_layer - n_trim, .., ..]).to_owned()))
    }
    /// Per-pixel median across the wavelength layers
    pub fn median_image(&self) -> Array2<f64> {
        // lanes are never empty, the NAN fallback is unreachable
        Zip::from(self.0.lanes(Axis(0)))
            .par_map_collect(|lane| stats::median(lane.iter().copied()).unwrap_or(f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ramp(n_layer: usize) -> Datacube {
        Datacube::from_shape_vec(
            (n_layer, 2, 3),
            (0..n_layer * 6).map(|x| x as f64).collect(),
        )
        .unwrap()
    }

    #[test]
    fn empty_cube() {
        assert!(matches!(
            Datacube::new(Array3::zeros((0, 4, 4))),
            Err(CubeError::Empty([0, 4, 4]))
        ));
    }

    #[test]
    fn trimming() {
        let cube = ramp(7);
        let trimmed = cube.trimmed(2).unwrap();
        assert_eq!(trimmed.n_layer(), 3);
        assert_eq!(trimmed.layer(0), cube.layer(2));
        assert!(cube.trimmed(3).is_some());
        assert!(cube.trimmed(4).is_none());
        assert_eq!(cube.trimmed(0).unwrap(), cube);
    }

    #[test]
    fn median_image() {
        let cube = Datacube::new(array![
            [[1., 9.], [0., 2.]],
            [[3., 8.], [0., 4.]],
            [[2., 7.], [5., 6.]]
        ])
        .unwrap();
        assert_eq!(cube.median_image(), array![[2., 8.], [0., 4.]]);
    }

    #[test]
    fn stacked_image() {
        let image = array![[1., 2.], [3., 4.]];
        let cube = Datacube::from_image(image.view(), 3).unwrap();
        assert_eq!(cube.dims(), [3, 2, 2]);
        assert_eq!(cube.layer(2), image);
    }
}
