//! Sky then point source subtraction of an exposure

use std::time::Instant;

use ndarray::Array2;

use crate::{
    align::{self, Shift},
    centroid::CentroidFinder,
    cube::Datacube,
    psf::{PsfSubtraction, PsfSubtractor, SourceLocation},
    report::LayerReport,
    sky::{SkyEstimator, SkySubtraction},
    Result,
};

/// Reduction of an exposure
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    sky: SkyEstimator,
    psf: Option<PsfSubtractor>,
}
impl Pipeline {
    pub fn new(sky: SkyEstimator) -> Self {
        Self { sky, psf: None }
    }
    /// Adds the point source subtraction after the sky subtraction
    pub fn psf(self, psf: PsfSubtractor) -> Self {
        Self {
            psf: Some(psf),
            ..self
        }
    }
    /// Reduces the `science` cube using the `sky` reference cube
    ///
    /// `location` is the source location in the science cube, it is found
    /// from the sky subtracted cube if `None`.
    pub fn run(
        &self,
        sky: &Datacube,
        science: &Datacube,
        location: Option<SourceLocation>,
    ) -> Result<Reduction> {
        let now = Instant::now();
        let sky = self.sky.estimate_and_subtract(sky, science)?;
        let psf = self
            .psf
            .as_ref()
            .map(|psf| psf.subtract_point_source(&sky.science, location))
            .transpose()?;
        let report = LayerReport::new(&sky, psf.as_ref());
        log::info!("... reduced in {:}ms", now.elapsed().as_millis());
        Ok(Reduction { sky, psf, report })
    }
}

/// Output of [`Pipeline::run`]
#[derive(Debug)]
pub struct Reduction {
    pub sky: SkySubtraction,
    pub psf: Option<PsfSubtraction>,
    pub report: LayerReport,
}
impl Reduction {
    /// The last reduced cube: point source subtracted if any, sky subtracted otherwise
    pub fn cube(&self) -> &Datacube {
        self.psf
            .as_ref()
            .map_or(&self.sky.science, |psf| &psf.cube)
    }
    pub fn mask(&self) -> &Array2<u8> {
        &self.sky.mask
    }
    /// Aligns the reduced cubes onto the reduced cubes of `reference`
    ///
    /// The offset is measured on the sky subtracted cubes, where the source is
    /// still present, and applied to the point source subtracted cube as well.
    pub fn align_to(&self, reference: &Reduction, finder: &CentroidFinder) -> Result<Aligned> {
        let (sky, offset) = align::align_to(&reference.sky.science, &self.sky.science, finder)?;
        let psf = self.psf.as_ref().map(|psf| align::shift(&psf.cube, offset));
        Ok(Aligned { offset, sky, psf })
    }
}

/// Output of [`Reduction::align_to`]
#[derive(Debug)]
pub struct Aligned {
    pub offset: Shift,
    /// Sky subtracted cube
    pub sky: Datacube,
    /// Point source subtracted cube
    pub psf: Option<Datacube>,
}
