//! Point source centroid
//!
//! The source is located on the median image of the cube, as the centroid of
//! the pixels brighter than a fraction of the image peak.
//! The centroid is computed on the native pixel grid and on a finer grid
//! interpolated with a bicubic (Catmull-Rom) kernel.

use std::fmt;

use ndarray::{Array2, ArrayView2};

use crate::cube::Datacube;

#[derive(thiserror::Error, Debug)]
pub enum CentroidError {
    #[error("no pixel exceeds {0} times the image peak")]
    Empty(f64),
    #[error("peak fraction must be in [0,1[, found {0}")]
    PeakFraction(f64),
    #[error("grid refinement factor must be at least 1")]
    Refinement,
}
type Result<T> = std::result::Result<T, CentroidError>;

/// Fractional pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Centroid {
    /// column
    pub x: f64,
    /// row
    pub y: f64,
}
impl fmt::Display for Centroid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3},{:.3})", self.x, self.y)
    }
}
impl Centroid {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Centroids on the native and on the refined pixel grids
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterEstimate {
    pub native: Centroid,
    pub refined: Centroid,
}

/// Centroid of the pixels brighter than `peak_fraction` times the image peak
pub fn threshold_centroid(image: ArrayView2<'_, f64>, peak_fraction: f64) -> Option<Centroid> {
    let peak = image.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let threshold = peak_fraction * peak;
    let (n, x, y) = image
        .indexed_iter()
        .filter(|&(_, &value)| value > threshold)
        .fold((0usize, 0f64, 0f64), |(n, x, y), ((row, col), _)| {
            (n + 1, x + col as f64, y + row as f64)
        });
    (n > 0).then(|| Centroid::new(x / n as f64, y / n as f64))
}

fn cubic_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.,
        -1.5 * t3 + 2. * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}
/// Neighbours and weights of every sample of a refined axis
fn axis_kernel(n: usize, factor: usize) -> Vec<([usize; 4], [f64; 4])> {
    let last = n as isize - 1;
    (0..factor * (n - 1) + 1)
        .map(|k| {
            let i = (k / factor) as isize;
            let t = (k % factor) as f64 / factor as f64;
            (
                [-1, 0, 1, 2].map(|d| (i + d).clamp(0, last) as usize),
                cubic_weights(t),
            )
        })
        .collect()
}
/// Bicubic interpolation of `image` on a grid `factor` times finer
///
/// A `n` samples axis is resampled into `factor * (n - 1) + 1` samples,
/// the samples at multiples of `factor` are the original pixels.
pub fn upsample(image: ArrayView2<'_, f64>, factor: usize) -> Array2<f64> {
    let (n_row, n_col) = image.dim();
    if n_row * n_col == 0 || factor < 2 {
        return image.to_owned();
    }
    let rows = axis_kernel(n_row, factor);
    let cols = axis_kernel(n_col, factor);
    Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| {
        let (row_idx, row_w) = &rows[i];
        let (col_idx, col_w) = &cols[j];
        row_idx
            .iter()
            .zip(row_w)
            .map(|(&r, &wr)| {
                wr * col_idx
                    .iter()
                    .zip(col_w)
                    .map(|(&c, &wc)| wc * image[[r, c]])
                    .sum::<f64>()
            })
            .sum()
    })
}

/// Point source finder
#[derive(Debug, Clone)]
pub struct CentroidFinder {
    peak_fraction: f64,
    refinement: usize,
}
impl Default for CentroidFinder {
    fn default() -> Self {
        Self {
            peak_fraction: 0.93,
            refinement: 3,
        }
    }
}
impl CentroidFinder {
    pub fn peak_fraction(self, peak_fraction: f64) -> Self {
        Self {
            peak_fraction,
            ..self
        }
    }
    /// Grid refinement factor
    pub fn refinement(self, refinement: usize) -> Self {
        Self { refinement, ..self }
    }
    /// Locates the source in the median image of the cube
    pub fn find(&self, cube: &Datacube) -> Result<CenterEstimate> {
        self.find_in_image(cube.median_image().view())
    }
    pub fn find_in_image(&self, image: ArrayView2<'_, f64>) -> Result<CenterEstimate> {
        if !(0f64..1f64).contains(&self.peak_fraction) {
            return Err(CentroidError::PeakFraction(self.peak_fraction));
        }
        if self.refinement == 0 {
            return Err(CentroidError::Refinement);
        }
        let native = threshold_centroid(image, self.peak_fraction)
            .ok_or(CentroidError::Empty(self.peak_fraction))?;
        let fine = upsample(image, self.refinement);
        let refined = threshold_centroid(fine.view(), self.peak_fraction)
            .map(|c| {
                let factor = self.refinement as f64;
                Centroid::new(c.x / factor, c.y / factor)
            })
            .ok_or(CentroidError::Empty(self.peak_fraction))?;
        log::debug!("source centroid: {native} (native grid), {refined} (refined grid)");
        Ok(CenterEstimate { native, refined })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn gaussian(shape: (usize, usize), x0: f64, y0: f64, sigma: f64) -> Array2<f64> {
        Array2::from_shape_fn(shape, |(row, col)| {
            let (dx, dy) = (col as f64 - x0, row as f64 - y0);
            (-(dx * dx + dy * dy) / (2. * sigma * sigma)).exp()
        })
    }

    #[test]
    fn upsampled_grid_keeps_pixels() {
        let image = gaussian((5, 7), 3.2, 1.7, 1.4);
        let fine = upsample(image.view(), 3);
        assert_eq!(fine.dim(), (13, 19));
        for ((row, col), value) in image.indexed_iter() {
            assert_eq!(fine[[3 * row, 3 * col]], *value);
        }
    }

    #[test]
    fn symmetric_source() {
        let image = gaussian((11, 15), 6., 4., 1.5);
        let center = CentroidFinder::default()
            .find_in_image(image.view())
            .unwrap();
        assert_eq!(center.native, Centroid::new(6., 4.));
        assert!((center.refined.x - 6.).abs() < 1e-9, "{}", center.refined);
        assert!((center.refined.y - 4.).abs() < 1e-9, "{}", center.refined);
    }

    #[test]
    fn off_grid_source() {
        let image = gaussian((11, 15), 6.4, 4.7, 1.5);
        let cube = Datacube::from_image(image.view(), 4).unwrap();
        let center = CentroidFinder::default().find(&cube).unwrap();
        for c in [center.native, center.refined] {
            assert!((c.x - 6.4).abs() < 0.5, "{c}");
            assert!((c.y - 4.7).abs() < 0.5, "{c}");
        }
    }

    #[test]
    fn invalid_settings() {
        let image = gaussian((5, 5), 2., 2., 1.);
        assert!(matches!(
            CentroidFinder::default()
                .peak_fraction(1.2)
                .find_in_image(image.view()),
            Err(CentroidError::PeakFraction(_))
        ));
        assert!(matches!(
            CentroidFinder::default()
                .refinement(0)
                .find_in_image(image.view()),
            Err(CentroidError::Refinement)
        ));
        let dark = Array2::<f64>::zeros((5, 5));
        assert!(matches!(
            CentroidFinder::default().find_in_image(dark.view()),
            Err(CentroidError::Empty(_))
        ));
    }
}
