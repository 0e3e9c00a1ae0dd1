//! Cube alignment
//!
//! Exposures of the same field are brought onto a common pixel grid by an
//! integer shift of the spatial axes, wrapping around the layer edges.

use std::fmt;

use ndarray::Array3;

use crate::{
    centroid::{CentroidError, CentroidFinder},
    cube::Datacube,
};

#[derive(thiserror::Error, Debug)]
pub enum AlignError {
    #[error("cube layers {cube:?} do not match the reference layers {reference:?}")]
    ShapeMismatch {
        cube: (usize, usize),
        reference: (usize, usize),
    },
    #[error("failed to locate the source")]
    Centroid(#[from] CentroidError),
}
type Result<T> = std::result::Result<T, AlignError>;

/// Integer pixel shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Shift {
    /// columns
    pub dx: isize,
    /// rows
    pub dy: isize,
}
impl Shift {
    /// Rounds a fractional shift (half to even)
    pub fn rounded(dx: f64, dy: f64) -> Self {
        Self {
            dx: dx.round_ties_even() as isize,
            dy: dy.round_ties_even() as isize,
        }
    }
}
impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:+},{:+}]", self.dx, self.dy)
    }
}

/// Returns a copy of the cube with the content at `(x + dx, y + dy)` moved to `(x, y)`
pub fn shift(cube: &Datacube, shift: Shift) -> Datacube {
    let (n_row, n_col) = cube.spatial_shape();
    let dy = shift.dy.rem_euclid(n_row as isize) as usize;
    let dx = shift.dx.rem_euclid(n_col as isize) as usize;
    Datacube::wrap(Array3::from_shape_fn(cube.dim(), |(l, row, col)| {
        cube[[l, (row + dy) % n_row, (col + dx) % n_col]]
    }))
}

/// Shifts `cube` for its source to overlap the source of `reference`
///
/// The shift is the rounded difference of the refined centroids.
pub fn align_to(
    reference: &Datacube,
    cube: &Datacube,
    finder: &CentroidFinder,
) -> Result<(Datacube, Shift)> {
    if reference.spatial_shape() != cube.spatial_shape() {
        return Err(AlignError::ShapeMismatch {
            cube: cube.spatial_shape(),
            reference: reference.spatial_shape(),
        });
    }
    let c0 = finder.find(reference)?.refined;
    let c1 = finder.find(cube)?.refined;
    let offset = Shift::rounded(c1.x - c0.x, c1.y - c0.y);
    log::info!("aligning source {c1} onto {c0} with a {offset} pixels shift");
    Ok((shift(cube, offset), offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_cube(x0: f64, y0: f64) -> Datacube {
        Datacube::new(Array3::from_shape_fn((3, 16, 20), |(l, row, col)| {
            let (dx, dy) = (col as f64 - x0, row as f64 - y0);
            (1. + l as f64) * (-(dx * dx + dy * dy) / 3.).exp()
        }))
        .unwrap()
    }

    #[test]
    fn shift_moves_pixels() {
        let mut data = Array3::zeros((2, 5, 6));
        data[[1, 3, 4]] = 1.;
        let cube = Datacube::new(data).unwrap();
        let shifted = shift(&cube, Shift { dx: 2, dy: 1 });
        assert_eq!(shifted[[1, 2, 2]], 1.);
        assert_eq!(shifted.sum(), 1.);
        // wraps around the edges
        let wrapped = shift(&cube, Shift { dx: -3, dy: 2 });
        assert_eq!(wrapped[[1, 1, 1]], 1.);
    }

    #[test]
    fn shift_round_trip() {
        let cube = source_cube(7.3, 5.1);
        let offset = Shift { dx: 3, dy: -4 };
        let back = shift(&shift(&cube, offset), Shift { dx: -3, dy: 4 });
        assert_eq!(back, cube);
    }

    #[test]
    fn rounding() {
        assert_eq!(Shift::rounded(2.5, -1.5), Shift { dx: 2, dy: -2 });
        assert_eq!(Shift::rounded(2.6, 0.4), Shift { dx: 3, dy: 0 });
    }

    #[test]
    fn alignment() {
        let reference = source_cube(8., 6.);
        let cube = source_cube(11., 4.);
        let (aligned, offset) = align_to(&reference, &cube, &CentroidFinder::default()).unwrap();
        assert_eq!(offset, Shift { dx: 3, dy: -2 });
        let c0 = CentroidFinder::default().find(&reference).unwrap();
        let c1 = CentroidFinder::default().find(&aligned).unwrap();
        assert_eq!(c0.native, c1.native);
    }

    #[test]
    fn mismatched_layers() {
        let reference = source_cube(8., 6.);
        let cube = Datacube::new(Array3::zeros((3, 10, 10))).unwrap();
        assert!(matches!(
            align_to(&reference, &cube, &CentroidFinder::default()),
            Err(AlignError::ShapeMismatch { .. })
        ));
    }
}
