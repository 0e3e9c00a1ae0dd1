/*!
# IFU datacube reduction

Removal of the sky background and of a bright point source from the
spectral datacubes of an integral field unit spectrograph, before the
exposures of a field are combined.

## Key Components

- [`Datacube`] - 3-D array of intensities indexed by (layer, row, column)
- [`SkyEstimator`] - per-layer sigma-clipped sky level, subtracted from the
  science and the sky cubes, and the mask of the clipped pixels
- [`PsfSubtractor`] - per-layer scaling of the median image of the cube around
  a bright source, subtracted from each layer
- [`CentroidFinder`] and [`align`] - location of the source and integer pixel
  alignment of exposures
- [`Pipeline`] - sky then point source subtraction of an exposure
- [`io`] - FITS and `.npy` datacube files

## Usage

```rust,no_run
use ifu_reduce::{io, Pipeline, PsfSubtractor, ScaleMode, SkyEstimator};

# fn main() -> ifu_reduce::Result<()> {
let (sky, _) = io::read_cube("kb171021_00083_icuber.fits")?;
let (science, header) = io::read_cube("kb171021_00082_icuber.fits")?;

let reduction = Pipeline::new(
    SkyEstimator::new(40).trim_layers(SkyEstimator::DEFAULT_INSTRUMENT_TRIM),
)
.psf(PsfSubtractor::new(8, 10).scale(ScaleMode::Integrated))
.run(&sky, &science, None)?;

io::write_mask("mask.fits", reduction.mask())?;
io::write_cube("img.fits", &reduction.sky.science, header.as_ref())?;
io::write_cube("img_psf.fits", reduction.cube(), header.as_ref())?;
reduction.report.to_csv("layers.csv")?;
# Ok(())
# }
```
*/

pub mod align;
pub mod centroid;
pub mod cube;
mod error;
pub mod io;
pub mod pipeline;
pub mod psf;
pub mod report;
pub mod sky;
pub mod stats;

pub use centroid::{CenterEstimate, Centroid, CentroidFinder};
pub use cube::Datacube;
pub use error::{Error, Result};
pub use pipeline::{Aligned, Pipeline, Reduction};
pub use psf::{PsfSubtraction, PsfSubtractor, ScaleMode, SourceLocation};
pub use report::LayerReport;
pub use sky::{EmptyLayerPolicy, SkyEstimator, SkySubtraction};
