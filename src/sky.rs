/*!
# Sky background

The sky level of every wavelength layer is estimated on a sky reference cube
with an iterative sigma-clipping of the layer pixels.
The median of the pixels surviving the clipping is subtracted from the layer
in both the sky and the science cubes.
The pixels rejected by the clipping are counted over all the layers and the
count is thresholded into the final mask.

## Example

```rust,no_run
use ifu_reduce::{Datacube, SkyEstimator};

# fn run(sky: Datacube, science: Datacube) -> Result<(), ifu_reduce::sky::SkyError> {
let reduction = SkyEstimator::new(40)
    .trim_layers(SkyEstimator::DEFAULT_INSTRUMENT_TRIM)
    .estimate_and_subtract(&sky, &science)?;
println!("sky values: {:?}", reduction.sky_values);
# Ok(())
# }
```
*/

use std::ops::Deref;

use ndarray::{Array2, ArrayView2, Axis, Zip};
use rayon::prelude::*;

use crate::{cube::Datacube, stats};

#[derive(thiserror::Error, Debug)]
pub enum SkyError {
    #[error("sky cube shape {sky:?} does not match science cube shape {science:?}")]
    ShapeMismatch { sky: [usize; 3], science: [usize; 3] },
    #[error("cannot trim {trim} layers at both ends of a cube with {n_layer} layers")]
    TrimOverflow { trim: usize, n_layer: usize },
    #[error("the mask limit must be strictly positive")]
    InvalidMaskLimit,
    #[error("layer #{layer}: no sky pixel left at sigma-clipping iteration #{iteration}")]
    DegenerateLayer { layer: usize, iteration: usize },
}
type Result<T> = std::result::Result<T, SkyError>;

/// What to do with a layer that runs out of sky pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyLayerPolicy {
    /// Abort with [`SkyError::DegenerateLayer`]
    #[default]
    Fail,
    /// Stop clipping and keep the current mask, the sky value falls back to 0
    CarryForward,
}

/// Sky level and contamination mask of a single layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSky {
    pub value: f64,
    pub mask: Array2<bool>,
}
impl LayerSky {
    /// Number of masked pixels
    pub fn n_masked(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// Number of layers each pixel has been masked in
#[derive(Debug, Clone, PartialEq)]
pub struct MaskCount(Array2<u32>);
impl Deref for MaskCount {
    type Target = Array2<u32>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl MaskCount {
    /// Accumulates the layer masks
    pub fn from_layers(layers: &[LayerSky], shape: (usize, usize)) -> Self {
        Self(
            layers
                .par_iter()
                .map(|layer| layer.mask.mapv(u32::from))
                .reduce(|| Array2::zeros(shape), |a, b| a + b),
        )
    }
    /// Returns the 0/1 mask of the pixels masked in at least `mask_limit` layers
    pub fn threshold(&self, mask_limit: u32) -> Array2<u8> {
        self.0.mapv(|count| u8::from(count >= mask_limit))
    }
    pub fn into_inner(self) -> Array2<u32> {
        self.0
    }
}

/// Output of [`SkyEstimator::estimate_and_subtract`]
#[derive(Debug, Clone)]
pub struct SkySubtraction {
    /// Sky subtracted science cube
    pub science: Datacube,
    /// Sky subtracted sky cube
    pub sky: Datacube,
    /// Index of the first kept layer in the input cubes
    pub first_layer: usize,
    /// Sky level of each kept layer
    pub sky_values: Vec<f64>,
    /// Number of masked pixels in each kept layer
    pub n_masked: Vec<usize>,
    pub mask_count: MaskCount,
    /// Pixels masked in at least `mask_limit` layers (0 or 1)
    pub mask: Array2<u8>,
}

/// Sigma-clipping sky estimator
#[derive(Debug, Clone)]
pub struct SkyEstimator {
    mask_limit: u32,
    trim_layers: usize,
    sigma: f64,
    iterations: usize,
    empty_layer: EmptyLayerPolicy,
}
impl Default for SkyEstimator {
    fn default() -> Self {
        Self {
            mask_limit: 1,
            trim_layers: 0,
            sigma: 3.,
            iterations: 10,
            empty_layer: EmptyLayerPolicy::default(),
        }
    }
}
impl SkyEstimator {
    /// Number of unreliable layers at both ends of the instrument wavelength range
    pub const DEFAULT_INSTRUMENT_TRIM: usize = 300;

    pub fn new(mask_limit: u32) -> Self {
        Self {
            mask_limit,
            ..Default::default()
        }
    }
    pub fn mask_limit(self, mask_limit: u32) -> Self {
        Self { mask_limit, ..self }
    }
    /// Discards `trim_layers` layers at both ends of the cubes
    pub fn trim_layers(self, trim_layers: usize) -> Self {
        Self {
            trim_layers,
            ..self
        }
    }
    /// Clipping threshold in units of standard deviation
    pub fn sigma(self, sigma: f64) -> Self {
        Self { sigma, ..self }
    }
    pub fn iterations(self, iterations: usize) -> Self {
        Self { iterations, ..self }
    }
    pub fn empty_layer(self, empty_layer: EmptyLayerPolicy) -> Self {
        Self {
            empty_layer,
            ..self
        }
    }
    /// Sigma-clips a sky layer and returns its sky level and mask
    ///
    /// Zero and non-finite pixels are invalid: they are neither used for the
    /// statistics nor masked.
    /// An iteration that would reject every remaining pixel either fails or,
    /// with [`EmptyLayerPolicy::CarryForward`], is discarded and ends the clipping.
    /// `index` is only used to report degenerate layers.
    pub fn clip_layer(&self, layer: ArrayView2<'_, f64>, index: usize) -> Result<LayerSky> {
        let is_candidate = |value: f64, masked: bool| !masked && value != 0. && value.is_finite();
        let candidates = |mask: &Array2<bool>| -> Vec<f64> {
            layer
                .iter()
                .zip(mask.iter())
                .filter(|&(&v, &m)| is_candidate(v, m))
                .map(|(&v, _)| v)
                .collect()
        };
        let n_candidates = |mask: &Array2<bool>| {
            Zip::from(mask)
                .and(&layer)
                .fold(0usize, |n, &m, &v| n + usize::from(is_candidate(v, m)))
        };

        let mut mask = Array2::from_elem(layer.raw_dim(), false);
        if n_candidates(&mask) == 0 {
            return match self.empty_layer {
                EmptyLayerPolicy::Fail => Err(SkyError::DegenerateLayer {
                    layer: index,
                    iteration: 0,
                }),
                EmptyLayerPolicy::CarryForward => {
                    log::warn!("layer #{index}: no valid sky pixel, the sky level is set to 0");
                    Ok(LayerSky { value: 0., mask })
                }
            };
        }
        for iteration in 0..self.iterations {
            let Some((median, std)) = stats::median_std(&mut candidates(&mask)) else {
                break;
            };
            let (lower, upper) = (median - self.sigma * std, median + self.sigma * std);
            let mut flagged = mask.clone();
            let mut n_flagged = 0usize;
            Zip::from(&mut flagged).and(&layer).for_each(|m, &v| {
                if is_candidate(v, *m) && (v < lower || v > upper) {
                    *m = true;
                    n_flagged += 1;
                }
            });
            if n_flagged == 0 {
                break;
            }
            if n_candidates(&flagged) == 0 {
                match self.empty_layer {
                    EmptyLayerPolicy::Fail => {
                        return Err(SkyError::DegenerateLayer {
                            layer: index,
                            iteration,
                        })
                    }
                    EmptyLayerPolicy::CarryForward => {
                        log::warn!("layer #{index}: clipping stopped at iteration #{iteration}");
                        break;
                    }
                }
            }
            mask = flagged;
        }

        // the kept mask always leaves a candidate
        let value = stats::median_in_place(&mut candidates(&mask)).ok_or(
            SkyError::DegenerateLayer {
                layer: index,
                iteration: self.iterations,
            },
        )?;
        Ok(LayerSky { value, mask })
    }
    /// Estimates the sky of each layer of `sky` and subtracts it from both cubes
    ///
    /// The inputs are left untouched, the subtracted cubes are new cubes
    /// without the trimmed layers.
    pub fn estimate_and_subtract(
        &self,
        sky: &Datacube,
        science: &Datacube,
    ) -> Result<SkySubtraction> {
        if self.mask_limit == 0 {
            return Err(SkyError::InvalidMaskLimit);
        }
        if sky.dims() != science.dims() {
            return Err(SkyError::ShapeMismatch {
                sky: sky.dims(),
                science: science.dims(),
            });
        }
        let trim_overflow = || SkyError::TrimOverflow {
            trim: self.trim_layers,
            n_layer: sky.n_layer(),
        };
        let sky = sky.trimmed(self.trim_layers).ok_or_else(trim_overflow)?;
        let science = science.trimmed(self.trim_layers).ok_or_else(trim_overflow)?;
        log::info!(
            "sigma-clipping {} layers ({}x{} pixels) at {} sigma",
            sky.n_layer(),
            sky.spatial_shape().0,
            sky.spatial_shape().1,
            self.sigma
        );

        let layers = (0..sky.n_layer())
            .into_par_iter()
            .map(|j| self.clip_layer(sky.layer(j), j + self.trim_layers))
            .collect::<Result<Vec<LayerSky>>>()?;

        let sky_values: Vec<f64> = layers.iter().map(|layer| layer.value).collect();
        let n_masked: Vec<usize> = layers.iter().map(LayerSky::n_masked).collect();
        let mask_count = MaskCount::from_layers(&layers, sky.spatial_shape());
        let mask = mask_count.threshold(self.mask_limit);
        log::info!(
            "{} pixels masked in at least {} layers",
            mask.iter().filter(|&&m| m > 0).count(),
            self.mask_limit
        );

        let subtract = |cube: Datacube| {
            let mut data = cube.into_inner();
            data.axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(sky_values.par_iter())
                .for_each(|(mut layer, &value)| layer -= value);
            Datacube::wrap(data)
        };
        Ok(SkySubtraction {
            science: subtract(science),
            sky: subtract(sky),
            first_layer: self.trim_layers,
            n_masked,
            mask_count,
            mask,
            sky_values,
        })
    }
}
