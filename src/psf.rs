/*!
# Point source subtraction

A bright point source is removed from every layer of a (sky subtracted) cube
by scaling the median image of the cube, the reference profile, within a
rectangular cutout centered on the source.

The scale factor of each layer is either the ratio of the layer pixel at the
source location to the profile peak ([`ScaleMode::Peak`]) or the ratio of the
layer flux to the profile flux within the cutout ([`ScaleMode::Integrated`]).

## Example

```rust,no_run
use ifu_reduce::{Datacube, PsfSubtractor, ScaleMode};

# fn run(cube: Datacube) -> Result<(), ifu_reduce::psf::PsfError> {
let psf = PsfSubtractor::new(8, 10)
    .scale(ScaleMode::parse("integrated")?)
    .subtract_point_source(&cube, None)?;
println!("source at {}", psf.location);
# Ok(())
# }
```
*/

use std::{fmt, ops::Range};

use ndarray::{s, Array2, Axis};
use rayon::prelude::*;
use strum_macros::{Display, EnumString};

use crate::{centroid::threshold_centroid, cube::Datacube};

#[derive(thiserror::Error, Debug)]
pub enum PsfError {
    #[error("unknown scale method {0:?}, expected peak (p) or integrated (i)")]
    InvalidOption(String),
    #[error("PSF cutout rows {rows:?} by columns {cols:?} exceeds the {shape:?} image")]
    Bounds {
        rows: Range<isize>,
        cols: Range<isize>,
        shape: (usize, usize),
    },
    #[error("PSF cutout half-widths must be strictly positive, found ({0},{1})")]
    InvalidHalfWidth(usize, usize),
    #[error("peak fraction must be in [0,1[, found {0}")]
    PeakFraction(f64),
    #[error("no pixel exceeds {0} times the reference profile peak")]
    NoSource(f64),
    #[error("the reference profile {0} is zero")]
    ZeroReference(&'static str),
}
type Result<T> = std::result::Result<T, PsfError>;

/// Per-layer scaling of the reference profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum ScaleMode {
    /// Ratio of the layer pixel at the source location to the profile peak
    #[strum(to_string = "peak", serialize = "p")]
    Peak,
    /// Ratio of the layer flux to the profile flux within the cutout
    #[default]
    #[strum(to_string = "integrated", serialize = "i")]
    Integrated,
}
impl ScaleMode {
    /// Parses one of `peak`, `p`, `integrated` or `i`
    pub fn parse(token: &str) -> Result<Self> {
        token
            .parse::<Self>()
            .map_err(|_| PsfError::InvalidOption(token.to_string()))
    }
}

/// Integer pixel location of the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    /// column
    pub x: usize,
    /// row
    pub y: usize,
}
impl SourceLocation {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}
impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Rectangular region `[y-dpy, y+dpy[` by `[x-dpx, x+dpx[` around the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cutout {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

/// Output of [`PsfSubtractor::subtract_point_source`]
#[derive(Debug, Clone)]
pub struct PsfSubtraction {
    /// Source subtracted cube
    pub cube: Datacube,
    /// Scale factor of each layer
    pub scales: Vec<f64>,
    pub location: SourceLocation,
    pub cutout: Cutout,
    /// Median image of the input cube
    pub profile: Array2<f64>,
}
impl PsfSubtraction {
    /// Flux of the source model in each layer
    pub fn source_spectrum(&self) -> Vec<f64> {
        let flux = self
            .profile
            .slice(s![self.cutout.rows.clone(), self.cutout.cols.clone()])
            .sum();
        self.scales.iter().map(|a| a * flux).collect()
    }
}

/// Point source subtraction
#[derive(Debug, Clone)]
pub struct PsfSubtractor {
    half_width_x: usize,
    half_width_y: usize,
    scale: ScaleMode,
    peak_fraction: f64,
}
impl Default for PsfSubtractor {
    fn default() -> Self {
        Self {
            half_width_x: 8,
            half_width_y: 10,
            scale: ScaleMode::default(),
            peak_fraction: 0.9,
        }
    }
}
impl PsfSubtractor {
    /// Creates a subtractor with the cutout half-widths along columns (`dpx`) and rows (`dpy`)
    pub fn new(half_width_x: usize, half_width_y: usize) -> Self {
        Self {
            half_width_x,
            half_width_y,
            ..Default::default()
        }
    }
    pub fn scale(self, scale: ScaleMode) -> Self {
        Self { scale, ..self }
    }
    /// Fraction of the profile peak above which pixels locate the source
    pub fn peak_fraction(self, peak_fraction: f64) -> Self {
        Self {
            peak_fraction,
            ..self
        }
    }
    /// Locates the source as the rounded centroid of the brightest pixels of the profile
    pub fn locate_source(&self, profile: &Array2<f64>) -> Result<SourceLocation> {
        if !(0f64..1f64).contains(&self.peak_fraction) {
            return Err(PsfError::PeakFraction(self.peak_fraction));
        }
        let centroid = threshold_centroid(profile.view(), self.peak_fraction)
            .ok_or(PsfError::NoSource(self.peak_fraction))?;
        Ok(SourceLocation::new(
            centroid.x.round_ties_even() as usize,
            centroid.y.round_ties_even() as usize,
        ))
    }
    /// Returns the cutout around the source, failing if it does not fit in the image
    pub fn cutout(&self, location: SourceLocation, shape: (usize, usize)) -> Result<Cutout> {
        let (dpx, dpy) = (self.half_width_x as isize, self.half_width_y as isize);
        let (x, y) = (location.x as isize, location.y as isize);
        let (rows, cols) = (y - dpy..y + dpy, x - dpx..x + dpx);
        if rows.start < 0
            || cols.start < 0
            || rows.end > shape.0 as isize
            || cols.end > shape.1 as isize
        {
            return Err(PsfError::Bounds { rows, cols, shape });
        }
        Ok(Cutout {
            rows: rows.start as usize..rows.end as usize,
            cols: cols.start as usize..cols.end as usize,
        })
    }
    /// Subtracts the point source model from a copy of `cube`
    ///
    /// The source is located on the reference profile if `location` is `None`.
    pub fn subtract_point_source(
        &self,
        cube: &Datacube,
        location: Option<SourceLocation>,
    ) -> Result<PsfSubtraction> {
        if self.half_width_x == 0 || self.half_width_y == 0 {
            return Err(PsfError::InvalidHalfWidth(
                self.half_width_x,
                self.half_width_y,
            ));
        }
        let profile = cube.median_image();
        let location = match location {
            Some(location) => location,
            None => self.locate_source(&profile)?,
        };
        let cutout = self.cutout(location, cube.spatial_shape())?;
        log::info!(
            "PSF subtraction at {location} within rows {:?} and columns {:?} ({} scaling)",
            cutout.rows,
            cutout.cols,
            self.scale
        );
        let template = profile.slice(s![cutout.rows.clone(), cutout.cols.clone()]);

        let scales: Vec<f64> = match self.scale {
            ScaleMode::Peak => {
                let peak = profile.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                if peak == 0. {
                    return Err(PsfError::ZeroReference("peak"));
                }
                cube.slice(s![.., location.y, location.x])
                    .iter()
                    .map(|value| value / peak)
                    .collect()
            }
            ScaleMode::Integrated => {
                let reference = template.sum();
                if reference == 0. {
                    return Err(PsfError::ZeroReference("flux"));
                }
                (0..cube.n_layer())
                    .into_par_iter()
                    .map(|j| {
                        cube.layer(j)
                            .slice(s![cutout.rows.clone(), cutout.cols.clone()])
                            .sum()
                            / reference
                    })
                    .collect()
            }
        };

        let mut data = cube.clone().into_inner();
        data.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(scales.par_iter())
            .for_each(|(mut layer, &a)| {
                layer
                    .slice_mut(s![cutout.rows.clone(), cutout.cols.clone()])
                    .scaled_add(-a, &template);
            });

        Ok(PsfSubtraction {
            cube: Datacube::wrap(data),
            scales,
            location,
            cutout,
            profile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Zip};

    fn profile() -> Array2<f64> {
        Array2::from_shape_fn((15, 13), |(row, col)| {
            let (dx, dy) = (col as f64 - 6., row as f64 - 7.);
            100. * (-(dx * dx + dy * dy) / 4.5).exp()
        })
    }
    fn scaled_cube(scales: &[f64]) -> Datacube {
        let p = profile();
        Datacube::new(Array3::from_shape_fn(
            (scales.len(), 15, 13),
            |(l, row, col)| scales[l] * p[[row, col]],
        ))
        .unwrap()
    }

    #[test]
    fn scale_tokens() {
        assert_eq!(ScaleMode::parse("peak").unwrap(), ScaleMode::Peak);
        assert_eq!(ScaleMode::parse("p").unwrap(), ScaleMode::Peak);
        assert_eq!(ScaleMode::parse("integrated").unwrap(), ScaleMode::Integrated);
        assert_eq!(ScaleMode::parse("i").unwrap(), ScaleMode::Integrated);
        assert_eq!(ScaleMode::Integrated.to_string(), "integrated");
        assert!(matches!(
            ScaleMode::parse("median"),
            Err(PsfError::InvalidOption(token)) if token == "median"
        ));
    }

    #[test]
    fn invalid_token_leaves_cube_untouched() {
        let cube = scaled_cube(&[1., 2.]);
        let copy = cube.clone();
        let result = ScaleMode::parse("median").and_then(|scale| {
            PsfSubtractor::new(3, 3)
                .scale(scale)
                .subtract_point_source(&cube, None)
        });
        assert!(matches!(result, Err(PsfError::InvalidOption(_))));
        assert_eq!(cube, copy);
    }

    #[test]
    fn locates_the_source() {
        let psf = PsfSubtractor::default();
        assert_eq!(psf.locate_source(&profile()).unwrap(), SourceLocation::new(6, 7));
    }

    #[test]
    fn constant_scaling_leaves_no_residual() {
        let cube = scaled_cube(&[2.5; 5]);
        let psf = PsfSubtractor::new(4, 5)
            .subtract_point_source(&cube, None)
            .unwrap();
        assert_eq!(psf.location, SourceLocation::new(6, 7));
        assert_eq!(psf.cutout.rows, 2..12);
        assert_eq!(psf.cutout.cols, 2..10);
        psf.scales
            .iter()
            .for_each(|a| assert!((a - 1.).abs() < 1e-12, "{a}"));
        let residual = psf
            .cube
            .slice(s![.., psf.cutout.rows.clone(), psf.cutout.cols.clone()]);
        assert!(residual.iter().all(|r| r.abs() < 1e-9));
        // outside of the cutout the cube is unchanged
        assert_eq!(psf.cube.slice(s![.., 0..2, ..]), cube.slice(s![.., 0..2, ..]));
        assert_eq!(psf.cube.slice(s![.., .., 10..]), cube.slice(s![.., .., 10..]));
    }

    #[test]
    fn chromatic_scaling() {
        let k = [0.5, 1., 3., 2., 1.5];
        let cube = scaled_cube(&k);
        for scale in [ScaleMode::Integrated, ScaleMode::Peak] {
            let psf = PsfSubtractor::new(4, 5)
                .scale(scale)
                .subtract_point_source(&cube, Some(SourceLocation::new(6, 7)))
                .unwrap();
            // the profile is the median layer
            psf.scales
                .iter()
                .zip(k)
                .for_each(|(a, k)| assert!((a - k / 1.5).abs() < 1e-12, "{scale}: {a}"));
            let residual = psf
                .cube
                .slice(s![.., psf.cutout.rows.clone(), psf.cutout.cols.clone()]);
            assert!(residual.iter().all(|r| r.abs() < 1e-9));
        }
    }

    #[test]
    fn source_spectrum_follows_scales() {
        let cube = scaled_cube(&[1., 2., 4.]);
        let psf = PsfSubtractor::new(3, 3)
            .subtract_point_source(&cube, None)
            .unwrap();
        let spectrum = psf.source_spectrum();
        assert!((spectrum[1] / spectrum[0] - 2.).abs() < 1e-12);
        assert!((spectrum[2] / spectrum[0] - 4.).abs() < 1e-12);
        Zip::from(&psf.profile)
            .and(&cube.layer(1))
            .for_each(|&p, &c| assert!((p - c).abs() < 1e-12));
    }

    #[test]
    fn cutout_out_of_bounds() {
        let cube = scaled_cube(&[1., 1., 1.]);
        let result =
            PsfSubtractor::new(3, 3).subtract_point_source(&cube, Some(SourceLocation::new(2, 7)));
        assert!(matches!(result, Err(PsfError::Bounds { .. })));
        let result = PsfSubtractor::new(3, 8).subtract_point_source(&cube, None);
        assert!(matches!(result, Err(PsfError::Bounds { .. })));
        // the cutout upper bound is excluded
        assert!(PsfSubtractor::new(6, 7)
            .subtract_point_source(&cube, None)
            .is_ok());
    }

    #[test]
    fn invalid_settings() {
        let cube = scaled_cube(&[1.]);
        assert!(matches!(
            PsfSubtractor::new(0, 2).subtract_point_source(&cube, None),
            Err(PsfError::InvalidHalfWidth(0, 2))
        ));
        assert!(matches!(
            PsfSubtractor::default()
                .peak_fraction(1.)
                .subtract_point_source(&cube, None),
            Err(PsfError::PeakFraction(_))
        ));
        let dark = Datacube::new(Array3::zeros((2, 15, 13))).unwrap();
        assert!(matches!(
            PsfSubtractor::new(2, 2).subtract_point_source(&dark, Some(SourceLocation::new(6, 7))),
            Err(PsfError::ZeroReference(_))
        ));
    }
}
