use crate::{
    align::AlignError, centroid::CentroidError, cube::CubeError, io::IoError,
    psf::PsfError, report::ReportError, sky::SkyError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `cube` module")]
    Cube(#[from] CubeError),
    #[error("Error in the `sky` module")]
    Sky(#[from] SkyError),
    #[error("Error in the `psf` module")]
    Psf(#[from] PsfError),
    #[error("Error in the `centroid` module")]
    Centroid(#[from] CentroidError),
    #[error("Error in the `align` module")]
    Align(#[from] AlignError),
    #[error("Error in the `io` module")]
    Io(#[from] IoError),
    #[error("Error in the `report` module")]
    Report(#[from] ReportError),
}
pub type Result<T> = std::result::Result<T, Error>;
